//! Shared state behind every headless object: live-object bookkeeping, the queue
//! timeline and the validation replay run as the timeline drains.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::trace;
use tracing::warn;

use crate::gpu::CpuDescriptorHandle;
use crate::gpu::GpuAddress;
use crate::gpu::PrimitiveTopology;
use crate::gpu::ResourceState;
use crate::gpu::ScissorRect;
use crate::gpu::TopologyType;
use crate::gpu::VertexBufferView;
use crate::gpu::Viewport;
use crate::headless::HeadlessOptions;

pub(crate) type SharedWorld = Rc<RefCell<World>>;

/// Upload heaps hand out addresses on 64 KiB boundaries.
const BUFFER_PLACEMENT_ALIGNMENT: u64 = 0x1_0000;
const FIRST_GPU_ADDRESS: u64 = 0x1_0000_0000;
const FIRST_HEAP_START: usize = 0x1000;
/// Further validation errors are logged and counted but not stored.
const STORED_VALIDATION_ERRORS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Factory,
    Adapter,
    Device,
    Queue,
    SwapChain,
    DescriptorHeap,
    Resource,
    CommandAllocator,
    CommandList,
    RootSignature,
    PipelineState,
    Fence,
    Event,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub executed_lists: usize,
    pub presents: usize,
    pub signals: usize,
    pub event_waits: usize,
    pub events_closed: usize,
    pub validation_errors: usize,
}

/// One command as recorded into a headless command list.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Reset {
        allocator: u64,
        pipeline_state: u64,
        topology_type: TopologyType,
    },
    ResourceBarrier {
        resource: u64,
        before: ResourceState,
        after: ResourceState,
    },
    SetRenderTarget(CpuDescriptorHandle),
    ClearRenderTargetView {
        handle: CpuDescriptorHandle,
        color: [f32; 4],
    },
    SetPipelineState {
        pipeline_state: u64,
        topology_type: TopologyType,
    },
    SetGraphicsRootSignature(u64),
    SetVertexBuffer(VertexBufferView),
    SetGraphicsRootConstantBufferView {
        parameter_index: u32,
        address: GpuAddress,
    },
    SetViewport(Viewport),
    SetScissorRect(ScissorRect),
    SetPrimitiveTopology(PrimitiveTopology),
    DrawInstanced {
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    },
}

/// An entry on the queue timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedWork {
    /// Opaque work that keeps the queue busy until the timeline drains.
    Busy,
    Execute {
        list: u64,
        allocator: u64,
        commands: Vec<Command>,
    },
    Present {
        back_buffer: u64,
    },
    Signal {
        fence: u64,
        value: u64,
    },
}

#[derive(Debug, Clone, Copy)]
struct PendingEvent {
    fence: u64,
    value: u64,
    event: u64,
}

pub(crate) struct World {
    pub options: HeadlessOptions,
    pub stats: HeadlessStats,
    next_id: u64,
    live: BTreeMap<u64, ObjectKind>,
    queue: VecDeque<QueuedWork>,
    /// Resource states as seen by the GPU timeline.
    resource_states: HashMap<u64, ResourceState>,
    /// Upload buffers by start address: (resource id, size).
    buffers: BTreeMap<u64, (u64, u64)>,
    fences: HashMap<u64, u64>,
    events: HashMap<u64, bool>,
    pending_events: Vec<PendingEvent>,
    rtvs: BTreeMap<usize, u64>,
    next_gpu_address: u64,
    next_heap_start: usize,
    submitted: Vec<Vec<Command>>,
    validation_errors: Vec<String>,
}

impl World {
    pub fn new(options: HeadlessOptions) -> Self {
        Self {
            options,
            stats: HeadlessStats::default(),
            next_id: 1,
            live: BTreeMap::new(),
            queue: VecDeque::new(),
            resource_states: HashMap::new(),
            buffers: BTreeMap::new(),
            fences: HashMap::new(),
            events: HashMap::new(),
            pending_events: Vec::new(),
            rtvs: BTreeMap::new(),
            next_gpu_address: FIRST_GPU_ADDRESS,
            next_heap_start: FIRST_HEAP_START,
            submitted: Vec::new(),
            validation_errors: Vec::new(),
        }
    }

    fn register(&mut self, kind: ObjectKind) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, kind);
        id
    }

    fn release(&mut self, id: u64) {
        self.live.remove(&id);
        self.resource_states.remove(&id);
        self.buffers.retain(|_, (buffer, _)| *buffer != id);
        self.fences.remove(&id);
        self.events.remove(&id);
    }

    pub fn live_objects(&self) -> Vec<(u64, ObjectKind)> {
        self.live.iter().map(|(id, kind)| (*id, *kind)).collect()
    }

    pub fn report(&mut self, message: String) {
        warn!("validation: {message}");
        self.stats.validation_errors += 1;
        if self.validation_errors.len() < STORED_VALIDATION_ERRORS {
            self.validation_errors.push(message);
        }
    }

    pub fn validation_errors(&self) -> &[String] {
        &self.validation_errors
    }

    pub fn submitted(&self) -> &[Vec<Command>] {
        &self.submitted
    }

    pub fn queue_is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn enqueue(&mut self, work: QueuedWork) {
        self.queue.push_back(work);
    }

    // Resources

    pub fn track_resource(&mut self, id: u64, state: ResourceState) {
        self.resource_states.insert(id, state);
    }

    pub fn allocate_buffer(&mut self, id: u64, size: u64) -> GpuAddress {
        let address = self.next_gpu_address;
        let footprint = size.max(1).div_ceil(BUFFER_PLACEMENT_ALIGNMENT) * BUFFER_PLACEMENT_ALIGNMENT;
        self.next_gpu_address += footprint;
        self.buffers.insert(address, (id, size));
        GpuAddress(address)
    }

    fn view_is_backed(&self, view: &VertexBufferView) -> bool {
        let start = view.buffer_location.0;
        let end = start + u64::from(view.size_in_bytes);
        self.buffers
            .range(..=start)
            .next_back()
            .is_some_and(|(base, (_, size))| end <= base + size)
    }

    pub fn allocate_heap(&mut self, descriptor_count: u32, increment: u32) -> CpuDescriptorHandle {
        let start = self.next_heap_start;
        let bytes = (descriptor_count as usize * increment as usize).max(1);
        self.next_heap_start += bytes.div_ceil(FIRST_HEAP_START) * FIRST_HEAP_START;
        CpuDescriptorHandle { ptr: start }
    }

    pub fn create_rtv(&mut self, handle: CpuDescriptorHandle, resource: u64) {
        self.rtvs.insert(handle.ptr, resource);
    }

    pub fn render_target_views(&self) -> usize {
        self.rtvs.len()
    }

    pub fn rtv_target(&self, handle: CpuDescriptorHandle) -> Option<u64> {
        self.rtvs.get(&handle.ptr).copied()
    }

    pub fn resource_state(&self, id: u64) -> Option<ResourceState> {
        self.resource_states.get(&id).copied()
    }

    // Fences and events

    pub fn create_fence(&mut self, id: u64, initial_value: u64) {
        self.fences.insert(id, initial_value);
    }

    pub fn completed_value(&self, fence: u64) -> u64 {
        self.fences.get(&fence).copied().unwrap_or_default()
    }

    pub fn create_event(&mut self, id: u64) {
        self.events.insert(id, false);
    }

    fn complete_fence(&mut self, fence: u64, value: u64) {
        let completed = self.fences.entry(fence).or_default();
        *completed = (*completed).max(value);
        let completed = *completed;
        trace!("fence {fence} completed {completed}");

        let (fired, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_events)
            .into_iter()
            .partition(|pending| pending.fence == fence && pending.value <= completed);
        self.pending_events = waiting;
        for pending in fired {
            self.events.insert(pending.event, true);
        }
    }

    pub fn set_event_on_completion(&mut self, fence: u64, value: u64, event: u64) {
        if self.completed_value(fence) >= value {
            self.events.insert(event, true);
        } else {
            self.pending_events.push(PendingEvent {
                fence,
                value,
                event,
            });
        }
    }

    /// Blocks the "CPU" on `event`: the whole timeline runs before it returns.
    pub fn wait(&mut self, event: u64) {
        self.stats.event_waits += 1;
        self.drain();
        match self.events.get_mut(&event) {
            Some(signaled) if *signaled => *signaled = false,
            _ => self.report(format!("wait on event {event} that nothing will signal")),
        }
    }

    // Queue

    pub fn execute(&mut self, list: u64, allocator: u64, commands: Vec<Command>) {
        self.stats.executed_lists += 1;
        if self.options.record_submissions {
            self.submitted.push(commands.clone());
        }
        self.enqueue(QueuedWork::Execute {
            list,
            allocator,
            commands,
        });
    }

    pub fn present(&mut self, back_buffer: u64) {
        self.stats.presents += 1;
        self.enqueue(QueuedWork::Present { back_buffer });
    }

    pub fn signal(&mut self, fence: u64, value: u64) {
        self.stats.signals += 1;
        if self.queue_is_idle() {
            self.complete_fence(fence, value);
        } else {
            self.enqueue(QueuedWork::Signal { fence, value });
        }
    }

    pub fn allocator_in_flight(&self, allocator: u64) -> bool {
        self.queue.iter().any(|work| {
            matches!(work, QueuedWork::Execute { allocator: a, .. } if *a == allocator)
        })
    }

    pub fn drain(&mut self) {
        while let Some(work) = self.queue.pop_front() {
            match work {
                QueuedWork::Busy => {}
                QueuedWork::Execute { list, commands, .. } => self.replay(list, &commands),
                QueuedWork::Present { back_buffer } => {
                    let state = self.resource_state(back_buffer);
                    if state != Some(ResourceState::Present) {
                        self.report(format!(
                            "present of back buffer {back_buffer} in state {state:?}"
                        ));
                    }
                }
                QueuedWork::Signal { fence, value } => self.complete_fence(fence, value),
            }
        }
    }

    /// Runs `commands` against the GPU-side resource states, collecting every
    /// violation the debug layer would flag.
    fn replay(&mut self, list: u64, commands: &[Command]) {
        let mut pipeline: Option<TopologyType> = None;
        let mut render_target: Option<u64> = None;
        let mut vertex_buffer: Option<VertexBufferView> = None;
        let mut topology: Option<PrimitiveTopology> = None;
        let mut errors = Vec::new();

        for command in commands {
            match command {
                Command::Reset { topology_type, .. } => {
                    pipeline = Some(*topology_type);
                    render_target = None;
                    vertex_buffer = None;
                    topology = None;
                }
                Command::ResourceBarrier {
                    resource,
                    before,
                    after,
                } => {
                    let actual = self.resource_state(*resource);
                    if actual != Some(*before) {
                        errors.push(format!(
                            "list {list}: barrier on resource {resource} declares {before:?} but it is {actual:?}"
                        ));
                    }
                    self.resource_states.insert(*resource, *after);
                }
                Command::SetRenderTarget(handle) => {
                    render_target = self.rtv_target(*handle);
                    if render_target.is_none() {
                        errors.push(format!("list {list}: no render target view at {handle:?}"));
                    }
                }
                Command::ClearRenderTargetView { handle, .. } => {
                    let state = self
                        .rtv_target(*handle)
                        .and_then(|resource| self.resource_state(resource));
                    if state != Some(ResourceState::RenderTarget) {
                        errors.push(format!(
                            "list {list}: clear of {handle:?} while the target is {state:?}"
                        ));
                    }
                }
                Command::SetPipelineState { topology_type, .. } => pipeline = Some(*topology_type),
                Command::SetVertexBuffer(view) => {
                    if !self.view_is_backed(view) {
                        errors.push(format!(
                            "list {list}: vertex buffer view {view:?} is outside every buffer"
                        ));
                    }
                    vertex_buffer = Some(*view);
                }
                Command::SetPrimitiveTopology(t) => topology = Some(*t),
                Command::DrawInstanced {
                    vertex_count,
                    start_vertex,
                    ..
                } => {
                    let state = render_target.and_then(|resource| self.resource_state(resource));
                    if state != Some(ResourceState::RenderTarget) {
                        errors.push(format!("list {list}: draw while the target is {state:?}"));
                    }
                    match topology {
                        Some(t) if Some(t.topology_type()) == pipeline => {}
                        t => errors.push(format!(
                            "list {list}: {t:?} draw against {pipeline:?} pipeline state"
                        )),
                    }
                    let available = vertex_buffer.map(|view| view.vertex_count()).unwrap_or(0);
                    if start_vertex + vertex_count > available {
                        errors.push(format!(
                            "list {list}: draw of vertices {start_vertex}..{} exceeds the {available} bound",
                            start_vertex + vertex_count
                        ));
                    }
                }
                Command::SetGraphicsRootSignature(_)
                | Command::SetGraphicsRootConstantBufferView { .. }
                | Command::SetViewport(_)
                | Command::SetScissorRect(_) => {}
            }
        }

        for error in errors {
            self.report(error);
        }
    }
}

/// Registers an object as live for as long as the token exists.
pub(crate) struct LiveToken {
    id: u64,
    world: SharedWorld,
}

impl LiveToken {
    pub fn new(world: &SharedWorld, kind: ObjectKind) -> Self {
        let id = world.borrow_mut().register(kind);
        Self {
            id,
            world: world.clone(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn world(&self) -> &SharedWorld {
        &self.world
    }
}

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.world.borrow_mut().release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> World {
        World::new(HeadlessOptions::default())
    }

    #[test]
    fn idle_signal_completes_immediately() {
        let mut world = world();
        world.create_fence(7, 0);
        world.signal(7, 1);
        assert_eq!(world.completed_value(7), 1);
    }

    #[test]
    fn busy_signal_completes_on_wait() {
        let mut world = world();
        world.create_fence(7, 0);
        world.create_event(8);
        world.enqueue(QueuedWork::Busy);
        world.signal(7, 1);
        assert_eq!(world.completed_value(7), 0);
        world.set_event_on_completion(7, 1, 8);
        world.wait(8);
        assert_eq!(world.completed_value(7), 1);
        assert!(world.validation_errors().is_empty());
    }

    #[test]
    fn waiting_on_an_event_nothing_signals_is_reported() {
        let mut world = world();
        world.create_fence(7, 0);
        world.create_event(8);
        world.set_event_on_completion(7, 5, 8);
        world.wait(8);
        assert_eq!(world.validation_errors().len(), 1);
    }

    #[test]
    fn replay_flags_wrong_barrier_and_missing_render_target() {
        let mut world = world();
        world.track_resource(3, ResourceState::Present);
        world.execute(
            1,
            2,
            vec![
                Command::ResourceBarrier {
                    resource: 3,
                    before: ResourceState::RenderTarget,
                    after: ResourceState::Present,
                },
                Command::DrawInstanced {
                    vertex_count: 3,
                    instance_count: 1,
                    start_vertex: 0,
                    start_instance: 0,
                },
            ],
        );
        world.drain();
        // Wrong barrier, no render target, no topology, no vertex buffer.
        assert_eq!(world.validation_errors().len(), 4);
    }

    const TARGET: u64 = 3;
    const RTV: CpuDescriptorHandle = CpuDescriptorHandle { ptr: 0x1000 };

    /// A back buffer with a view and a nine-vertex buffer, ready to draw into.
    fn drawable(world: &mut World) -> Vec<Command> {
        world.track_resource(TARGET, ResourceState::Present);
        world.create_rtv(RTV, TARGET);
        let address = world.allocate_buffer(4, 9 * 28);
        vec![
            Command::Reset {
                allocator: 2,
                pipeline_state: 5,
                topology_type: TopologyType::Triangle,
            },
            Command::ResourceBarrier {
                resource: TARGET,
                before: ResourceState::Present,
                after: ResourceState::RenderTarget,
            },
            Command::SetRenderTarget(RTV),
            Command::SetVertexBuffer(VertexBufferView {
                buffer_location: address,
                size_in_bytes: 9 * 28,
                stride_in_bytes: 28,
            }),
        ]
    }

    fn draw(topology: PrimitiveTopology, start_vertex: u32, vertex_count: u32) -> [Command; 2] {
        [
            Command::SetPrimitiveTopology(topology),
            Command::DrawInstanced {
                vertex_count,
                instance_count: 1,
                start_vertex,
                start_instance: 0,
            },
        ]
    }

    #[test]
    fn replay_accepts_a_triangle_draw_inside_the_buffer() {
        let mut world = world();
        let mut commands = drawable(&mut world);
        commands.extend(draw(PrimitiveTopology::TriangleList, 0, 3));
        world.execute(1, 2, commands);
        world.drain();
        assert!(world.validation_errors().is_empty());
    }

    #[test]
    fn replay_flags_line_draw_under_triangle_pipeline() {
        let mut world = world();
        let mut commands = drawable(&mut world);
        commands.extend(draw(PrimitiveTopology::LineList, 3, 6));
        world.execute(1, 2, commands);
        world.drain();
        let errors = world.validation_errors();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("Some(LineList) draw against Some(Triangle) pipeline state"));
    }

    #[test]
    fn replay_flags_draw_past_the_vertex_buffer() {
        let mut world = world();
        let mut commands = drawable(&mut world);
        commands.extend(draw(PrimitiveTopology::TriangleList, 5, 6));
        world.execute(1, 2, commands);
        world.drain();
        let errors = world.validation_errors();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("draw of vertices 5..11 exceeds the 9 bound"));
    }

    #[test]
    fn present_of_a_render_target_is_reported() {
        let mut world = world();
        world.track_resource(TARGET, ResourceState::RenderTarget);
        world.present(TARGET);
        world.drain();
        let errors = world.validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("present of back buffer 3 in state Some(RenderTarget)"));
    }

    #[test]
    fn submissions_are_kept_only_when_asked() {
        let mut world = world();
        world.execute(1, 2, Vec::new());
        assert!(world.submitted().is_empty());

        let mut recording = World::new(HeadlessOptions {
            record_submissions: true,
            ..Default::default()
        });
        recording.execute(1, 2, Vec::new());
        assert_eq!(recording.submitted().len(), 1);
    }

    #[test]
    fn stored_errors_are_capped_but_counted() {
        let mut world = world();
        for i in 0..STORED_VALIDATION_ERRORS + 10 {
            world.report(format!("error {i}"));
        }
        assert_eq!(world.validation_errors().len(), STORED_VALIDATION_ERRORS);
        assert_eq!(world.stats.validation_errors, STORED_VALIDATION_ERRORS + 10);
    }

    #[test]
    fn views_must_sit_inside_a_buffer() {
        let mut world = world();
        let address = world.allocate_buffer(4, 252);
        let inside = VertexBufferView {
            buffer_location: address,
            size_in_bytes: 252,
            stride_in_bytes: 28,
        };
        let overrun = VertexBufferView {
            size_in_bytes: 280,
            ..inside
        };
        assert!(world.view_is_backed(&inside));
        assert!(!world.view_is_backed(&overrun));
    }
}
