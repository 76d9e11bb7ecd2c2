use bevy_math::Mat4;
use tracing::debug;
use tracing::info;

use crate::adapter::select_hardware_adapter;
use crate::adapter::select_warp_adapter;
use crate::adapter::SelectedAdapter;
use crate::config::RendererSettings;
use crate::fence::FrameFence;
use crate::gpu::AdapterDesc;
use crate::gpu::Backend;
use crate::gpu::Device;
use crate::gpu::ScissorRect;
use crate::gpu::TopologyType;
use crate::gpu::Viewport;
use crate::pipeline::build_pipeline;
use crate::pipeline::Pipeline;
use crate::pipeline::TRANSFORM_ROOT_PARAMETER;
use crate::recorder::Bindings;
use crate::recorder::CommandRecorder;
use crate::sample_error::MyResult;
use crate::scene::AXES;
use crate::scene::INPUT_LAYOUT;
use crate::scene::TRIANGLE;
use crate::scene::VERTICES;
use crate::shader::load_shader_pair;
use crate::swapchain::SwapchainTargets;
use crate::upload::create_vertex_buffer;
use crate::upload::ConstantBuffer;
use crate::upload::VertexBuffer;

/// Draws the triangle and the axes into a window, one fully synchronized frame at a time.
pub struct Renderer<B: Backend> {
    settings: RendererSettings,
    viewport: Viewport,
    scissor_rect: ScissorRect,
    frames_rendered: u64,

    recorder: CommandRecorder<B>,
    pipeline: Pipeline<B>,
    constant_buffer: ConstantBuffer<B>,
    vertex_buffer: VertexBuffer<B>,
    fence: FrameFence<B>,
    allocator: B::CommandAllocator,
    targets: SwapchainTargets<B>,
    queue: B::Queue,
    _device: B::Device,
    adapter_desc: AdapterDesc,
    _adapter: B::Adapter,
    _factory: B::Factory,
}

impl<B: Backend> Renderer<B> {
    pub fn init(
        factory: B::Factory,
        window: &B::Window,
        width: u32,
        height: u32,
        settings: &RendererSettings,
    ) -> MyResult<Self> {
        let level = settings.minimum_feature_level;
        let SelectedAdapter {
            adapter,
            desc: adapter_desc,
            device,
        } = if settings.use_warp_device {
            select_warp_adapter::<B>(&factory, level)?
        } else {
            select_hardware_adapter::<B>(&factory, level)?
        };

        let queue = device.create_command_queue()?;
        let targets = SwapchainTargets::<B>::new(&factory, &device, &queue, window, width, height)?;
        let allocator = device.create_command_allocator()?;

        let shaders = load_shader_pair(&B::Compiler::default(), &settings.shader)?;
        let pipeline = build_pipeline::<B>(&device, &shaders, &INPUT_LAYOUT)?;
        let command_list = device.create_command_list(
            &allocator,
            pipeline.for_topology_type(TopologyType::Triangle),
        )?;

        let vertex_buffer = create_vertex_buffer::<B>(&device, &VERTICES)?;
        let constant_buffer = ConstantBuffer::<B>::new(&device, Mat4::IDENTITY)?;
        let fence = FrameFence::<B>::new(&device)?;

        info!(
            "renderer ready on {} ({width}x{height}, back buffer {})",
            adapter_desc.name,
            targets.frame_index()
        );

        Ok(Self {
            settings: settings.clone(),
            viewport: Viewport::covering(width, height),
            scissor_rect: ScissorRect::covering(width, height),
            frames_rendered: 0,
            recorder: CommandRecorder::new(command_list),
            pipeline,
            constant_buffer,
            vertex_buffer,
            fence,
            allocator,
            targets,
            queue,
            _device: device,
            adapter_desc,
            _adapter: adapter,
            _factory: factory,
        })
    }

    /// Records, submits and presents one frame, then waits for the GPU to finish it.
    pub fn render(&mut self) -> MyResult<()> {
        let index = self.targets.frame_index();
        let back_buffer = self.targets.back_buffer(index);
        let triangles = self.pipeline.for_topology_type(TopologyType::Triangle);
        let lines = self.pipeline.for_topology_type(TopologyType::Line);

        self.recorder.begin(&self.allocator, triangles)?;
        self.recorder.transition_to_render_target(index, back_buffer)?;
        self.recorder
            .clear(self.targets.rtv_handle(index), self.settings.clear_color)?;

        let bindings = Bindings::<B> {
            root_signature: &self.pipeline.root_signature,
            vertex_buffer: &self.vertex_buffer.view,
            constant_buffer: self.constant_buffer.gpu_address(),
            constant_buffer_parameter: TRANSFORM_ROOT_PARAMETER,
            viewport: self.viewport,
            scissor_rect: self.scissor_rect,
        };
        self.recorder
            .bind(triangles, TopologyType::Triangle, &bindings)?;
        self.recorder.draw(&TRIANGLE)?;
        self.recorder
            .rebind_pipeline_state(lines, TopologyType::Line)?;
        self.recorder.draw(&AXES)?;

        self.recorder.transition_to_present(back_buffer)?;
        self.recorder.close()?;
        self.recorder.submit(&self.queue)?;
        self.targets.present(self.settings.sync_interval)?;
        self.recorder.presented()?;

        self.fence.signal_and_wait(&self.queue)?;
        self.targets.refresh_frame_index();
        self.frames_rendered += 1;
        Ok(())
    }

    /// Takes effect from the next frame; the previous one has already completed.
    pub fn set_transform(&mut self, transform: Mat4) {
        self.constant_buffer.write_transform(&transform);
    }

    pub fn frame_index(&self) -> u32 {
        self.targets.frame_index()
    }

    pub fn fence_value(&self) -> u64 {
        self.fence.value()
    }

    pub fn completed_fence_value(&self) -> u64 {
        self.fence.completed_value()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn adapter_desc(&self) -> &AdapterDesc {
        &self.adapter_desc
    }

    pub fn back_buffer(&self, index: u32) -> &B::Resource {
        self.targets.back_buffer(index)
    }

    pub fn vertex_buffer(&self) -> &VertexBuffer<B> {
        &self.vertex_buffer
    }

    pub fn constant_buffer(&self) -> &ConstantBuffer<B> {
        &self.constant_buffer
    }

    /// Waits for the GPU to go idle, then releases every object.
    pub fn destroy(mut self) -> MyResult<()> {
        let value = self.fence.signal_and_wait(&self.queue)?;
        debug!("GPU idle at fence value {value}");
        info!("renderer destroyed after {} frames", self.frames_rendered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessAdapterSpec;
    use crate::headless::HeadlessBackend;
    use crate::headless::HeadlessInstance;
    use crate::headless::HeadlessOptions;
    use crate::headless::HeadlessWindow;
    use crate::sample_error::StartupError;

    fn init(
        instance: &HeadlessInstance,
        settings: &RendererSettings,
    ) -> MyResult<Renderer<HeadlessBackend>> {
        Renderer::init(
            instance.factory(),
            &HeadlessWindow::default(),
            800,
            600,
            settings,
        )
    }

    #[test]
    fn one_frame_advances_the_fence() {
        let instance = HeadlessInstance::default();
        let mut renderer = init(&instance, &RendererSettings::default()).unwrap();
        assert_eq!(renderer.fence_value(), 1);
        renderer.render().unwrap();
        assert_eq!(renderer.fence_value(), 2);
        assert!(renderer.completed_fence_value() >= 1);
        assert_eq!(renderer.frames_rendered(), 1);
        assert!(instance.validation_errors().is_empty());
    }

    #[test]
    fn transform_is_written_in_place() {
        let instance = HeadlessInstance::default();
        let mut renderer = init(&instance, &RendererSettings::default()).unwrap();
        let transform = Mat4::from_rotation_z(0.5);
        renderer.set_transform(transform);
        let contents = renderer.constant_buffer().resource().contents();
        let columns = transform.to_cols_array();
        let expected: &[u8] = bytemuck::cast_slice(&columns);
        assert_eq!(&contents[..64], expected);
        assert_eq!(renderer.constant_buffer().resource().map_count(), 1);
        assert_ne!(
            renderer.constant_buffer().gpu_address(),
            renderer.vertex_buffer().view.buffer_location
        );
    }

    #[test]
    fn warp_flag_selects_the_software_adapter() {
        let instance = HeadlessInstance::new(HeadlessOptions {
            adapters: vec![],
            ..Default::default()
        });
        let settings = RendererSettings {
            use_warp_device: true,
            ..Default::default()
        };
        let renderer = init(&instance, &settings).unwrap();
        assert!(renderer.adapter_desc().is_software);
    }

    #[test]
    fn startup_fails_without_hardware() {
        let instance = HeadlessInstance::new(HeadlessOptions {
            adapters: vec![HeadlessAdapterSpec::software("WARP")],
            ..Default::default()
        });
        let Err(report) = init(&instance, &RendererSettings::default()) else {
            panic!("no hardware adapter");
        };
        assert!(matches!(
            report.downcast_ref::<StartupError>(),
            Some(StartupError::NoSuitableAdapter { .. })
        ));
    }

    #[test]
    fn unknown_shader_name_is_a_startup_error() {
        let instance = HeadlessInstance::default();
        let settings = RendererSettings {
            shader: "does_not_exist".to_owned(),
            ..Default::default()
        };
        let Err(report) = init(&instance, &settings) else {
            panic!("shader must not compile");
        };
        assert!(matches!(
            report.downcast_ref::<StartupError>(),
            Some(StartupError::ShaderCompile { .. })
        ));
    }
}
