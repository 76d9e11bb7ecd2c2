//! Command recording for one frame, checked against the order and resource states
//! the device expects.
//!
//! A frame moves through
//! `Idle → Recording → Transitioned(ToRenderTarget) → Bound → Drawn →
//! Transitioned(ToPresent) → Closed → Submitted → Presented`, and the next frame
//! starts again from `Presented`. Every back buffer's state is tracked so a barrier
//! whose `before` state is wrong is refused instead of reaching the GPU.

use crate::gpu::Backend;
use crate::gpu::CommandAllocator;
use crate::gpu::CommandQueue;
use crate::gpu::CpuDescriptorHandle;
use crate::gpu::GpuAddress;
use crate::gpu::GraphicsCommandList;
use crate::gpu::ResourceState;
use crate::gpu::ScissorRect;
use crate::gpu::TopologyType;
use crate::gpu::VertexBufferView;
use crate::gpu::Viewport;
use crate::sample_error::FrameError;
use crate::sample_error::MyResult;
use crate::scene::DrawRange;
use crate::FRAME_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierDirection {
    ToRenderTarget,
    ToPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Recording,
    Transitioned(BarrierDirection),
    Bound,
    Drawn,
    Closed,
    Submitted,
    Presented,
}

impl FramePhase {
    fn may_advance_to(self, next: FramePhase) -> bool {
        use BarrierDirection::*;
        use FramePhase::*;
        matches!(
            (self, next),
            (Idle | Presented, Recording)
                | (Recording, Transitioned(ToRenderTarget))
                | (Transitioned(ToRenderTarget), Bound)
                | (Bound | Drawn, Bound)
                | (Bound | Drawn, Drawn)
                | (Drawn, Transitioned(ToPresent))
                | (Transitioned(ToPresent), Closed)
                | (Closed, Submitted)
                | (Submitted, Presented)
        )
    }
}

/// Everything a draw needs bound besides the pipeline state.
pub struct Bindings<'a, B: Backend> {
    pub root_signature: &'a B::RootSignature,
    pub vertex_buffer: &'a VertexBufferView,
    pub constant_buffer: GpuAddress,
    pub constant_buffer_parameter: u32,
    pub viewport: Viewport,
    pub scissor_rect: ScissorRect,
}

pub struct CommandRecorder<B: Backend> {
    command_list: B::CommandList,
    phase: FramePhase,
    back_buffer_states: [ResourceState; FRAME_COUNT as usize],
    target: Option<u32>,
    bound_topology_type: Option<TopologyType>,
}

impl<B: Backend> CommandRecorder<B> {
    /// Takes a closed command list; back buffers start in `Present`.
    pub fn new(command_list: B::CommandList) -> Self {
        Self {
            command_list,
            phase: FramePhase::Idle,
            back_buffer_states: [ResourceState::Present; FRAME_COUNT as usize],
            target: None,
            bound_topology_type: None,
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn back_buffer_state(&self, index: u32) -> ResourceState {
        self.back_buffer_states[index as usize]
    }

    pub fn command_list(&self) -> &B::CommandList {
        &self.command_list
    }

    fn check_advance(&self, next: FramePhase) -> Result<(), FrameError> {
        if !self.phase.may_advance_to(next) {
            return Err(FrameError::OutOfOrder {
                from: self.phase,
                to: next,
            });
        }
        Ok(())
    }

    fn advance(&mut self, next: FramePhase) -> Result<(), FrameError> {
        self.check_advance(next)?;
        self.phase = next;
        Ok(())
    }

    fn target(&self) -> u32 {
        self.target.unwrap_or_default()
    }

    fn require_render_target(&self) -> Result<(), FrameError> {
        let back_buffer = self.target();
        let state = self.back_buffer_state(back_buffer);
        if state != ResourceState::RenderTarget {
            return Err(FrameError::NotRenderTarget { back_buffer, state });
        }
        Ok(())
    }

    /// Resets the allocator and the list. Only valid once the GPU finished with both.
    /// A failed reset leaves the phase untouched so the frame can be retried.
    pub fn begin(
        &mut self,
        allocator: &B::CommandAllocator,
        initial_state: &B::PipelineState,
    ) -> MyResult<()> {
        self.check_advance(FramePhase::Recording)?;
        allocator.reset()?;
        self.command_list.reset(allocator, initial_state)?;
        self.phase = FramePhase::Recording;
        self.target = None;
        self.bound_topology_type = None;
        Ok(())
    }

    fn transition(
        &mut self,
        index: u32,
        resource: &B::Resource,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<(), FrameError> {
        let actual = self.back_buffer_state(index);
        if actual != before {
            return Err(FrameError::StateMismatch {
                back_buffer: index,
                expected: before,
                actual,
            });
        }
        self.command_list.transition_barrier(resource, before, after);
        self.back_buffer_states[index as usize] = after;
        Ok(())
    }

    pub fn transition_to_render_target(
        &mut self,
        index: u32,
        back_buffer: &B::Resource,
    ) -> MyResult<()> {
        let next = FramePhase::Transitioned(BarrierDirection::ToRenderTarget);
        self.check_advance(next)?;
        self.transition(
            index,
            back_buffer,
            ResourceState::Present,
            ResourceState::RenderTarget,
        )?;
        self.phase = next;
        self.target = Some(index);
        Ok(())
    }

    pub fn clear(&mut self, rtv: CpuDescriptorHandle, color: [f32; 4]) -> MyResult<()> {
        if self.phase != FramePhase::Transitioned(BarrierDirection::ToRenderTarget) {
            return Err(FrameError::OutOfOrder {
                from: self.phase,
                to: FramePhase::Bound,
            }
            .into());
        }
        self.require_render_target()?;
        self.command_list.set_render_target(rtv);
        self.command_list.clear_render_target_view(rtv, color);
        Ok(())
    }

    pub fn bind(
        &mut self,
        pipeline_state: &B::PipelineState,
        topology_type: TopologyType,
        bindings: &Bindings<'_, B>,
    ) -> MyResult<()> {
        self.advance(FramePhase::Bound)?;
        let list = &self.command_list;
        list.set_pipeline_state(pipeline_state);
        list.set_graphics_root_signature(bindings.root_signature);
        list.set_vertex_buffer(bindings.vertex_buffer);
        list.set_graphics_root_constant_buffer_view(
            bindings.constant_buffer_parameter,
            bindings.constant_buffer,
        );
        list.set_viewport(&bindings.viewport);
        list.set_scissor_rect(&bindings.scissor_rect);
        self.bound_topology_type = Some(topology_type);
        Ok(())
    }

    /// Switches pipeline state between draws, leaving other bindings in place.
    pub fn rebind_pipeline_state(
        &mut self,
        pipeline_state: &B::PipelineState,
        topology_type: TopologyType,
    ) -> MyResult<()> {
        self.advance(FramePhase::Bound)?;
        self.command_list.set_pipeline_state(pipeline_state);
        self.bound_topology_type = Some(topology_type);
        Ok(())
    }

    pub fn draw(&mut self, range: &DrawRange) -> MyResult<()> {
        self.check_advance(FramePhase::Drawn)?;
        let pipeline = self.bound_topology_type;
        if pipeline != Some(range.topology.topology_type()) {
            return Err(FrameError::TopologyMismatch {
                topology: range.topology,
                pipeline,
            }
            .into());
        }
        self.require_render_target()?;
        self.advance(FramePhase::Drawn)?;
        self.command_list.set_primitive_topology(range.topology);
        self.command_list
            .draw_instanced(range.vertex_count(), 1, range.vertices.start, 0);
        Ok(())
    }

    pub fn transition_to_present(&mut self, back_buffer: &B::Resource) -> MyResult<()> {
        let next = FramePhase::Transitioned(BarrierDirection::ToPresent);
        self.check_advance(next)?;
        self.transition(
            self.target(),
            back_buffer,
            ResourceState::RenderTarget,
            ResourceState::Present,
        )?;
        self.phase = next;
        Ok(())
    }

    pub fn close(&mut self) -> MyResult<()> {
        self.check_advance(FramePhase::Closed)?;
        self.command_list.close()?;
        self.phase = FramePhase::Closed;
        Ok(())
    }

    pub fn submit(&mut self, queue: &B::Queue) -> MyResult<()> {
        self.check_advance(FramePhase::Submitted)?;
        queue.execute(&self.command_list)?;
        self.phase = FramePhase::Submitted;
        Ok(())
    }

    pub fn presented(&mut self) -> MyResult<()> {
        self.advance(FramePhase::Presented)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::Device;
    use crate::fence::FrameFence;
    use crate::gpu::PrimitiveTopology;
    use crate::headless::HeadlessBackend;
    use crate::headless::HeadlessInstance;
    use crate::headless::QueuedWork;
    use crate::pipeline::build_pipeline;
    use crate::pipeline::Pipeline;
    use crate::sample_error::MyReport;
    use crate::scene::AXES;
    use crate::scene::INPUT_LAYOUT;
    use crate::scene::TRIANGLE;
    use crate::shader::ShaderPair;

    struct Fixture {
        instance: HeadlessInstance,
        device: crate::headless::HeadlessDevice,
        pipeline: Pipeline<HeadlessBackend>,
        allocator: crate::headless::HeadlessAllocator,
        back_buffer: crate::headless::HeadlessResource,
        recorder: CommandRecorder<HeadlessBackend>,
        view: VertexBufferView,
    }

    fn fixture() -> Fixture {
        let instance = HeadlessInstance::default();
        let device = instance.device();
        let shaders = ShaderPair {
            vertex: b"vs".to_vec(),
            pixel: b"ps".to_vec(),
        };
        let pipeline = build_pipeline::<HeadlessBackend>(&device, &shaders, &INPUT_LAYOUT).unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let list = device
            .create_command_list(&allocator, pipeline.for_topology_type(TopologyType::Triangle))
            .unwrap();
        let back_buffer = device.create_upload_buffer(16).unwrap();
        Fixture {
            instance,
            device,
            pipeline,
            allocator,
            back_buffer,
            recorder: CommandRecorder::new(list),
            view: VertexBufferView {
                buffer_location: GpuAddress(0x10000),
                size_in_bytes: 9 * 28,
                stride_in_bytes: 28,
            },
        }
    }

    fn frame_error(result: MyResult<()>) -> FrameError {
        let report: MyReport = result.expect_err("must be refused");
        report
            .downcast_ref::<FrameError>()
            .cloned()
            .expect("a frame error")
    }

    impl Fixture {
        fn record_until_bound(&mut self) {
            let pso = self.pipeline.for_topology_type(TopologyType::Triangle);
            self.recorder.begin(&self.allocator, pso).unwrap();
            self.recorder
                .transition_to_render_target(0, &self.back_buffer)
                .unwrap();
            self.recorder
                .clear(CpuDescriptorHandle { ptr: 0 }, [0.0; 4])
                .unwrap();
            let bindings = Bindings::<HeadlessBackend> {
                root_signature: &self.pipeline.root_signature,
                vertex_buffer: &self.view,
                constant_buffer: GpuAddress(0x20000),
                constant_buffer_parameter: 0,
                viewport: Viewport::covering(800, 600),
                scissor_rect: ScissorRect::covering(800, 600),
            };
            self.recorder
                .bind(pso, TopologyType::Triangle, &bindings)
                .unwrap();
        }
    }

    #[test]
    fn full_frame_round_trips_back_buffer_state() {
        let mut f = fixture();
        f.record_until_bound();
        assert_eq!(f.recorder.back_buffer_state(0), ResourceState::RenderTarget);
        f.recorder.draw(&TRIANGLE).unwrap();
        let lines = f.pipeline.for_topology_type(TopologyType::Line);
        f.recorder
            .rebind_pipeline_state(lines, TopologyType::Line)
            .unwrap();
        f.recorder.draw(&AXES).unwrap();
        f.recorder.transition_to_present(&f.back_buffer).unwrap();
        assert_eq!(f.recorder.back_buffer_state(0), ResourceState::Present);
        f.recorder.close().unwrap();
        let queue = f.device.create_command_queue().unwrap();
        f.recorder.submit(&queue).unwrap();
        f.recorder.presented().unwrap();
        assert_eq!(f.recorder.phase(), FramePhase::Presented);
    }

    #[test]
    fn line_draw_against_triangle_pipeline_is_refused() {
        let mut f = fixture();
        f.record_until_bound();
        let error = frame_error(f.recorder.draw(&AXES));
        assert_eq!(
            error,
            FrameError::TopologyMismatch {
                topology: PrimitiveTopology::LineList,
                pipeline: Some(TopologyType::Triangle),
            }
        );
    }

    #[test]
    fn present_barrier_before_drawing_is_out_of_order() {
        let mut f = fixture();
        let pso = f.pipeline.for_topology_type(TopologyType::Triangle);
        f.recorder.begin(&f.allocator, pso).unwrap();
        f.recorder
            .transition_to_render_target(0, &f.back_buffer)
            .unwrap();
        let error = frame_error(f.recorder.transition_to_present(&f.back_buffer));
        assert!(matches!(error, FrameError::OutOfOrder { .. }));
    }

    #[test]
    fn second_begin_without_submitting_is_out_of_order() {
        let mut f = fixture();
        let pso = f.pipeline.for_topology_type(TopologyType::Triangle);
        f.recorder.begin(&f.allocator, pso).unwrap();
        let error = frame_error(f.recorder.begin(&f.allocator, pso));
        assert_eq!(
            error,
            FrameError::OutOfOrder {
                from: FramePhase::Recording,
                to: FramePhase::Recording,
            }
        );
    }

    #[test]
    fn draw_before_binding_is_out_of_order() {
        let mut f = fixture();
        let pso = f.pipeline.for_topology_type(TopologyType::Triangle);
        f.recorder.begin(&f.allocator, pso).unwrap();
        f.recorder
            .transition_to_render_target(0, &f.back_buffer)
            .unwrap();
        let error = frame_error(f.recorder.draw(&TRIANGLE));
        assert_eq!(
            error,
            FrameError::OutOfOrder {
                from: FramePhase::Transitioned(BarrierDirection::ToRenderTarget),
                to: FramePhase::Drawn,
            }
        );
    }

    #[test]
    fn begin_can_be_retried_once_the_allocator_is_free() {
        let mut f = fixture();
        f.record_until_bound();
        f.recorder.draw(&TRIANGLE).unwrap();
        f.recorder.transition_to_present(&f.back_buffer).unwrap();
        f.recorder.close().unwrap();
        let queue = f.device.create_command_queue().unwrap();
        f.instance.enqueue(QueuedWork::Busy);
        f.recorder.submit(&queue).unwrap();
        f.recorder.presented().unwrap();

        let pso = f.pipeline.for_topology_type(TopologyType::Triangle);
        assert!(f.recorder.begin(&f.allocator, pso).is_err());
        assert_eq!(f.recorder.phase(), FramePhase::Presented);

        let mut fence = FrameFence::<HeadlessBackend>::new(&f.device).unwrap();
        fence.signal_and_wait(&queue).unwrap();
        f.recorder.begin(&f.allocator, pso).unwrap();
        assert_eq!(f.recorder.phase(), FramePhase::Recording);
    }

    #[test]
    fn refused_barrier_keeps_the_phase() {
        let mut f = fixture();
        let pso = f.pipeline.for_topology_type(TopologyType::Triangle);
        f.recorder.begin(&f.allocator, pso).unwrap();
        f.recorder.back_buffer_states[0] = ResourceState::RenderTarget;
        let error = frame_error(f.recorder.transition_to_render_target(0, &f.back_buffer));
        assert!(matches!(error, FrameError::StateMismatch { back_buffer: 0, .. }));
        assert_eq!(f.recorder.phase(), FramePhase::Recording);
    }

    #[test]
    fn phase_table_accepts_only_the_documented_order() {
        use BarrierDirection::*;
        use FramePhase::*;
        let order = [
            Idle,
            Recording,
            Transitioned(ToRenderTarget),
            Bound,
            Drawn,
            Transitioned(ToPresent),
            Closed,
            Submitted,
            Presented,
            Recording,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].may_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(!Recording.may_advance_to(Bound));
        assert!(!Submitted.may_advance_to(Recording));
        assert!(!Closed.may_advance_to(Presented));
    }
}
