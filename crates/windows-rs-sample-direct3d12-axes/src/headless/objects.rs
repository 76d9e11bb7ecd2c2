use std::cell::Cell;
use std::cell::RefCell;
use std::ops::Range;
use std::ptr::NonNull;
use std::rc::Rc;

use tracing::trace;

use super::world::Command;
use super::world::LiveToken;
use super::world::ObjectKind;
use super::world::SharedWorld;
use super::HeadlessAdapterSpec;
use super::HeadlessBackend;
use super::HeadlessWindow;
use crate::gpu::Adapter;
use crate::gpu::AdapterDesc;
use crate::gpu::BackendError;
use crate::gpu::CommandAllocator;
use crate::gpu::CommandQueue;
use crate::gpu::CpuDescriptorHandle;
use crate::gpu::DescriptorHeap;
use crate::gpu::Device;
use crate::gpu::Factory;
use crate::gpu::FeatureLevel;
use crate::gpu::Fence;
use crate::gpu::FenceEvent;
use crate::gpu::Format;
use crate::gpu::GpuAddress;
use crate::gpu::GraphicsCommandList;
use crate::gpu::HResult;
use crate::gpu::InputElement;
use crate::gpu::PipelineDesc;
use crate::gpu::PrimitiveTopology;
use crate::gpu::RasterizerDesc;
use crate::gpu::Resource;
use crate::gpu::ResourceState;
use crate::gpu::RootSignatureDesc;
use crate::gpu::ScissorRect;
use crate::gpu::SwapChain;
use crate::gpu::SwapChainDesc;
use crate::gpu::TopologyType;
use crate::gpu::VertexBufferView;
use crate::gpu::Viewport;

pub const RTV_DESCRIPTOR_SIZE: u32 = 32;
const ROOT_SIGNATURE_MAGIC: &[u8; 4] = b"RTS0";
const MAX_SYNC_INTERVAL: u32 = 4;

pub struct HeadlessFactory {
    token: LiveToken,
}

impl HeadlessFactory {
    pub(crate) fn new(world: &SharedWorld) -> Self {
        Self {
            token: LiveToken::new(world, ObjectKind::Factory),
        }
    }
}

impl Factory<HeadlessBackend> for HeadlessFactory {
    fn enum_adapters(&self) -> Result<Vec<HeadlessAdapter>, BackendError> {
        let world = self.token.world();
        let specs = world.borrow().options.adapters.clone();
        Ok(specs
            .into_iter()
            .map(|spec| HeadlessAdapter::new(world, spec))
            .collect())
    }

    fn enum_warp_adapter(&self) -> Result<HeadlessAdapter, BackendError> {
        Ok(HeadlessAdapter::new(
            self.token.world(),
            HeadlessAdapterSpec::warp(),
        ))
    }

    fn create_device(
        &self,
        adapter: &HeadlessAdapter,
        minimum_feature_level: FeatureLevel,
    ) -> Result<HeadlessDevice, BackendError> {
        if adapter.spec.max_feature_level < minimum_feature_level {
            return Err(BackendError::new(
                HResult::DXGI_ERROR_UNSUPPORTED,
                format!(
                    "D3D12CreateDevice: {} tops out at {}",
                    adapter.spec.name, adapter.spec.max_feature_level
                ),
            ));
        }
        Ok(HeadlessDevice::new(self.token.world()))
    }

    fn create_swap_chain(
        &self,
        _queue: &HeadlessQueue,
        _window: &HeadlessWindow,
        desc: &SwapChainDesc,
    ) -> Result<HeadlessSwapChain, BackendError> {
        if desc.width == 0 || desc.height == 0 || desc.buffer_count < 2 {
            return Err(BackendError::new(
                HResult::DXGI_ERROR_INVALID_CALL,
                format!("CreateSwapChainForHwnd rejected {desc:?}"),
            ));
        }
        Ok(HeadlessSwapChain::new(self.token.world(), desc))
    }
}

pub struct HeadlessAdapter {
    spec: HeadlessAdapterSpec,
    _token: LiveToken,
}

impl HeadlessAdapter {
    fn new(world: &SharedWorld, spec: HeadlessAdapterSpec) -> Self {
        Self {
            spec,
            _token: LiveToken::new(world, ObjectKind::Adapter),
        }
    }
}

impl Adapter for HeadlessAdapter {
    fn desc(&self) -> Result<AdapterDesc, BackendError> {
        Ok(AdapterDesc {
            name: self.spec.name.clone(),
            is_software: self.spec.is_software,
            dedicated_video_memory: self.spec.dedicated_video_memory,
        })
    }
}

pub struct HeadlessDevice {
    token: LiveToken,
}

impl HeadlessDevice {
    pub(crate) fn new(world: &SharedWorld) -> Self {
        Self {
            token: LiveToken::new(world, ObjectKind::Device),
        }
    }

    fn world(&self) -> &SharedWorld {
        self.token.world()
    }
}

fn invalid_arg(message: impl Into<String>) -> BackendError {
    BackendError::new(HResult::E_INVALIDARG, message)
}

impl Device<HeadlessBackend> for HeadlessDevice {
    fn create_command_queue(&self) -> Result<HeadlessQueue, BackendError> {
        Ok(HeadlessQueue {
            token: LiveToken::new(self.world(), ObjectKind::Queue),
        })
    }

    fn create_rtv_heap(&self, descriptor_count: u32) -> Result<HeadlessDescriptorHeap, BackendError> {
        if descriptor_count == 0 {
            return Err(invalid_arg("descriptor heap with no descriptors"));
        }
        let token = LiveToken::new(self.world(), ObjectKind::DescriptorHeap);
        let start = self
            .world()
            .borrow_mut()
            .allocate_heap(descriptor_count, RTV_DESCRIPTOR_SIZE);
        Ok(HeadlessDescriptorHeap {
            start,
            _token: token,
        })
    }

    fn rtv_descriptor_size(&self) -> u32 {
        RTV_DESCRIPTOR_SIZE
    }

    fn create_render_target_view(&self, resource: &HeadlessResource, handle: CpuDescriptorHandle) {
        self.world().borrow_mut().create_rtv(handle, resource.id());
    }

    fn create_command_allocator(&self) -> Result<HeadlessAllocator, BackendError> {
        Ok(HeadlessAllocator {
            token: LiveToken::new(self.world(), ObjectKind::CommandAllocator),
        })
    }

    fn create_command_list(
        &self,
        allocator: &HeadlessAllocator,
        _initial_state: &HeadlessPipelineState,
    ) -> Result<HeadlessCommandList, BackendError> {
        Ok(HeadlessCommandList {
            token: LiveToken::new(self.world(), ObjectKind::CommandList),
            allocator: Cell::new(allocator.token.id()),
            closed: Cell::new(true),
            commands: RefCell::new(Vec::new()),
        })
    }

    fn create_fence(&self, initial_value: u64) -> Result<HeadlessFence, BackendError> {
        let token = LiveToken::new(self.world(), ObjectKind::Fence);
        self.world()
            .borrow_mut()
            .create_fence(token.id(), initial_value);
        Ok(HeadlessFence { token })
    }

    fn create_event(&self) -> Result<HeadlessEvent, BackendError> {
        let token = LiveToken::new(self.world(), ObjectKind::Event);
        self.world().borrow_mut().create_event(token.id());
        Ok(HeadlessEvent { token })
    }

    fn create_upload_buffer(&self, size_in_bytes: u64) -> Result<HeadlessResource, BackendError> {
        if size_in_bytes == 0 {
            return Err(invalid_arg("buffer of zero bytes"));
        }
        Ok(HeadlessResource::buffer(self.world(), size_in_bytes))
    }

    fn serialize_root_signature(&self, desc: &RootSignatureDesc) -> Result<Vec<u8>, BackendError> {
        if self.world().borrow().options.fail_root_signature_serialization {
            return Err(
                BackendError::new(HResult::E_INVALIDARG, "D3D12SerializeRootSignature failed")
                    .with_diagnostic("Root Signature serialization: unsupported root parameter\n"),
            );
        }
        let mut blob = ROOT_SIGNATURE_MAGIC.to_vec();
        blob.push(u8::from(desc.allow_input_layout));
        blob.extend_from_slice(&(desc.constant_buffer_registers.len() as u32).to_le_bytes());
        for register in desc.constant_buffer_registers {
            blob.extend_from_slice(&register.to_le_bytes());
        }
        Ok(blob)
    }

    fn create_root_signature(&self, blob: &[u8]) -> Result<HeadlessRootSignature, BackendError> {
        if self.world().borrow().options.fail_root_signature_creation {
            return Err(invalid_arg("CreateRootSignature rejected the blob"));
        }
        let malformed = || invalid_arg("root signature blob is malformed");
        let body = blob
            .strip_prefix(ROOT_SIGNATURE_MAGIC.as_slice())
            .ok_or_else(malformed)?;
        let (&allow, body) = body.split_first().ok_or_else(malformed)?;
        let (count, body) = body.split_first_chunk::<4>().ok_or_else(malformed)?;
        let count = u32::from_le_bytes(*count) as usize;
        if body.len() != count * 4 {
            return Err(malformed());
        }
        let registers = body
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(HeadlessRootSignature {
            token: LiveToken::new(self.world(), ObjectKind::RootSignature),
            registers,
            allow_input_layout: allow != 0,
        })
    }

    fn create_pipeline_state(
        &self,
        desc: &PipelineDesc<'_, HeadlessRootSignature>,
    ) -> Result<HeadlessPipelineState, BackendError> {
        if self.world().borrow().options.fail_pipeline_state == Some(desc.topology_type) {
            return Err(invalid_arg(format!(
                "CreateGraphicsPipelineState rejected {}",
                desc.label
            )));
        }
        if desc.vertex_shader.is_empty() || desc.pixel_shader.is_empty() {
            return Err(invalid_arg(format!("{}: missing shader byte code", desc.label)));
        }
        if desc.input_layout.is_empty() || !desc.root_signature.allow_input_layout {
            return Err(invalid_arg(format!(
                "{}: input layout not permitted by the root signature",
                desc.label
            )));
        }
        Ok(HeadlessPipelineState {
            token: LiveToken::new(self.world(), ObjectKind::PipelineState),
            topology_type: desc.topology_type,
            desc: PipelineSnapshot {
                label: desc.label.to_owned(),
                root_signature: desc.root_signature.id(),
                input_layout: desc.input_layout.to_vec(),
                rasterizer: desc.rasterizer,
                blend_enabled: desc.blend_enabled,
                depth_enabled: desc.depth_enabled,
                render_target_format: desc.render_target_format,
            },
        })
    }
}

pub struct HeadlessQueue {
    token: LiveToken,
}

impl CommandQueue<HeadlessBackend> for HeadlessQueue {
    fn execute(&self, command_list: &HeadlessCommandList) -> Result<(), BackendError> {
        let list = command_list.token.id();
        if !command_list.closed.get() {
            self.token
                .world()
                .borrow_mut()
                .report(format!("execute of list {list} that is still recording"));
            return Err(invalid_arg("ExecuteCommandLists on an open command list"));
        }
        let commands = command_list.commands.borrow().clone();
        trace!("executing list {list} ({} commands)", commands.len());
        self.token
            .world()
            .borrow_mut()
            .execute(list, command_list.allocator.get(), commands);
        Ok(())
    }

    fn signal(&self, fence: &HeadlessFence, value: u64) -> Result<(), BackendError> {
        self.token
            .world()
            .borrow_mut()
            .signal(fence.token.id(), value);
        Ok(())
    }
}

pub struct HeadlessSwapChain {
    token: LiveToken,
    buffers: Vec<HeadlessResource>,
    sequence: Vec<u32>,
    presents: Cell<usize>,
}

impl HeadlessSwapChain {
    fn new(world: &SharedWorld, desc: &SwapChainDesc) -> Self {
        let token = LiveToken::new(world, ObjectKind::SwapChain);
        let buffers = (0..desc.buffer_count)
            .map(|_| HeadlessResource::back_buffer(world))
            .collect();
        let sequence = world
            .borrow()
            .options
            .back_buffer_sequence
            .iter()
            .map(|index| index % desc.buffer_count)
            .collect();
        Self {
            token,
            buffers,
            sequence,
            presents: Cell::new(0),
        }
    }
}

impl SwapChain<HeadlessBackend> for HeadlessSwapChain {
    fn get_buffer(&self, index: u32) -> Result<HeadlessResource, BackendError> {
        self.buffers.get(index as usize).cloned().ok_or_else(|| {
            BackendError::new(
                HResult::DXGI_ERROR_INVALID_CALL,
                format!("GetBuffer({index}) on a {} buffer swap chain", self.buffers.len()),
            )
        })
    }

    /// Follows the scripted sequence, then keeps rotating from where it ended.
    fn current_back_buffer_index(&self) -> u32 {
        let presents = self.presents.get();
        let count = self.buffers.len();
        let index = match self.sequence.last() {
            None => presents % count,
            Some(_) if presents < self.sequence.len() => self.sequence[presents] as usize,
            Some(&last) => (last as usize + presents + 1 - self.sequence.len()) % count,
        };
        index as u32
    }

    fn present(&self, sync_interval: u32) -> Result<(), BackendError> {
        if sync_interval > MAX_SYNC_INTERVAL {
            return Err(BackendError::new(
                HResult::DXGI_ERROR_INVALID_CALL,
                format!("Present with sync interval {sync_interval}"),
            ));
        }
        let back_buffer = self.buffers[self.current_back_buffer_index() as usize].id();
        self.token.world().borrow_mut().present(back_buffer);
        self.presents.set(self.presents.get() + 1);
        Ok(())
    }
}

pub struct HeadlessDescriptorHeap {
    start: CpuDescriptorHandle,
    _token: LiveToken,
}

impl DescriptorHeap for HeadlessDescriptorHeap {
    fn cpu_handle_start(&self) -> CpuDescriptorHandle {
        self.start
    }
}

struct ResourceInner {
    token: LiveToken,
    gpu_address: GpuAddress,
    data: Box<[Cell<u8>]>,
    cpu_accessible: bool,
    map_count: Cell<u32>,
    name: RefCell<String>,
}

/// A buffer or back buffer. Clones share the same object, like COM references.
#[derive(Clone)]
pub struct HeadlessResource(Rc<ResourceInner>);

impl HeadlessResource {
    fn buffer(world: &SharedWorld, size_in_bytes: u64) -> Self {
        let token = LiveToken::new(world, ObjectKind::Resource);
        let gpu_address = {
            let mut world = world.borrow_mut();
            world.track_resource(token.id(), ResourceState::GenericRead);
            world.allocate_buffer(token.id(), size_in_bytes)
        };
        Self(Rc::new(ResourceInner {
            token,
            gpu_address,
            data: (0..size_in_bytes).map(|_| Cell::new(0)).collect(),
            cpu_accessible: true,
            map_count: Cell::new(0),
            name: RefCell::new(String::new()),
        }))
    }

    fn back_buffer(world: &SharedWorld) -> Self {
        let token = LiveToken::new(world, ObjectKind::Resource);
        world
            .borrow_mut()
            .track_resource(token.id(), ResourceState::Present);
        Self(Rc::new(ResourceInner {
            token,
            gpu_address: GpuAddress::default(),
            data: Box::default(),
            cpu_accessible: false,
            map_count: Cell::new(0),
            name: RefCell::new(String::new()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.token.id()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.data.iter().map(Cell::get).collect()
    }

    pub fn map_count(&self) -> u32 {
        self.0.map_count.get()
    }

    pub fn name(&self) -> String {
        self.0.name.borrow().clone()
    }
}

impl Resource for HeadlessResource {
    fn gpu_virtual_address(&self) -> GpuAddress {
        self.0.gpu_address
    }

    fn map(&self, read_range: Option<Range<usize>>) -> Result<NonNull<u8>, BackendError> {
        if !self.0.cpu_accessible {
            return Err(invalid_arg(format!(
                "Map on {:?}, which has no CPU access",
                self.name()
            )));
        }
        if read_range.is_some_and(|range| range.end > self.0.data.len()) {
            return Err(invalid_arg("Map read range exceeds the resource"));
        }
        // Cell<u8> has the layout of u8 and permits writes through shared references.
        let data = NonNull::new(self.0.data.as_ptr().cast_mut().cast::<u8>())
            .ok_or_else(|| BackendError::new(HResult::E_OUTOFMEMORY, "Map returned null"))?;
        self.0.map_count.set(self.0.map_count.get() + 1);
        Ok(data)
    }

    fn unmap(&self, _written_range: Option<Range<usize>>) {
        match self.0.map_count.get() {
            0 => self
                .0
                .token
                .world()
                .borrow_mut()
                .report(format!("Unmap of resource {} that is not mapped", self.id())),
            n => self.0.map_count.set(n - 1),
        }
    }

    fn set_name(&self, name: &str) {
        *self.0.name.borrow_mut() = name.to_owned();
    }
}

pub struct HeadlessAllocator {
    token: LiveToken,
}

impl CommandAllocator for HeadlessAllocator {
    fn reset(&self) -> Result<(), BackendError> {
        let id = self.token.id();
        let mut world = self.token.world().borrow_mut();
        if world.allocator_in_flight(id) {
            world.report(format!("reset of allocator {id} while its commands are in flight"));
            return Err(BackendError::new(
                HResult::E_FAIL,
                "ID3D12CommandAllocator::Reset while the GPU is using it",
            ));
        }
        Ok(())
    }
}

pub struct HeadlessCommandList {
    token: LiveToken,
    allocator: Cell<u64>,
    closed: Cell<bool>,
    commands: RefCell<Vec<Command>>,
}

impl HeadlessCommandList {
    /// Commands recorded since the last reset.
    pub fn commands(&self) -> Vec<Command> {
        self.commands.borrow().clone()
    }

    fn record(&self, command: Command) {
        if self.closed.get() {
            self.token.world().borrow_mut().report(format!(
                "{command:?} recorded into closed list {}",
                self.token.id()
            ));
            return;
        }
        self.commands.borrow_mut().push(command);
    }
}

impl GraphicsCommandList<HeadlessBackend> for HeadlessCommandList {
    fn reset(
        &self,
        allocator: &HeadlessAllocator,
        initial_state: &HeadlessPipelineState,
    ) -> Result<(), BackendError> {
        if !self.closed.get() {
            return Err(BackendError::new(
                HResult::E_FAIL,
                "Reset on a command list that is still recording",
            ));
        }
        self.closed.set(false);
        self.allocator.set(allocator.token.id());
        let mut commands = self.commands.borrow_mut();
        commands.clear();
        commands.push(Command::Reset {
            allocator: allocator.token.id(),
            pipeline_state: initial_state.token.id(),
            topology_type: initial_state.topology_type,
        });
        Ok(())
    }

    fn close(&self) -> Result<(), BackendError> {
        if self.closed.replace(true) {
            return Err(BackendError::new(
                HResult::E_FAIL,
                "Close on a command list that is already closed",
            ));
        }
        Ok(())
    }

    fn transition_barrier(
        &self,
        resource: &HeadlessResource,
        before: ResourceState,
        after: ResourceState,
    ) {
        self.record(Command::ResourceBarrier {
            resource: resource.id(),
            before,
            after,
        });
    }

    fn set_render_target(&self, handle: CpuDescriptorHandle) {
        self.record(Command::SetRenderTarget(handle));
    }

    fn clear_render_target_view(&self, handle: CpuDescriptorHandle, color: [f32; 4]) {
        self.record(Command::ClearRenderTargetView { handle, color });
    }

    fn set_pipeline_state(&self, pipeline_state: &HeadlessPipelineState) {
        self.record(Command::SetPipelineState {
            pipeline_state: pipeline_state.token.id(),
            topology_type: pipeline_state.topology_type,
        });
    }

    fn set_graphics_root_signature(&self, root_signature: &HeadlessRootSignature) {
        self.record(Command::SetGraphicsRootSignature(root_signature.id()));
    }

    fn set_vertex_buffer(&self, view: &VertexBufferView) {
        self.record(Command::SetVertexBuffer(*view));
    }

    fn set_graphics_root_constant_buffer_view(&self, parameter_index: u32, address: GpuAddress) {
        self.record(Command::SetGraphicsRootConstantBufferView {
            parameter_index,
            address,
        });
    }

    fn set_viewport(&self, viewport: &Viewport) {
        self.record(Command::SetViewport(*viewport));
    }

    fn set_scissor_rect(&self, rect: &ScissorRect) {
        self.record(Command::SetScissorRect(*rect));
    }

    fn set_primitive_topology(&self, topology: PrimitiveTopology) {
        self.record(Command::SetPrimitiveTopology(topology));
    }

    fn draw_instanced(
        &self,
        vertex_count_per_instance: u32,
        instance_count: u32,
        start_vertex_location: u32,
        start_instance_location: u32,
    ) {
        self.record(Command::DrawInstanced {
            vertex_count: vertex_count_per_instance,
            instance_count,
            start_vertex: start_vertex_location,
            start_instance: start_instance_location,
        });
    }
}

pub struct HeadlessFence {
    token: LiveToken,
}

impl Fence<HeadlessBackend> for HeadlessFence {
    fn completed_value(&self) -> u64 {
        self.token.world().borrow().completed_value(self.token.id())
    }

    fn set_event_on_completion(&self, value: u64, event: &HeadlessEvent) -> Result<(), BackendError> {
        self.token
            .world()
            .borrow_mut()
            .set_event_on_completion(self.token.id(), value, event.token.id());
        Ok(())
    }
}

pub struct HeadlessEvent {
    token: LiveToken,
}

impl FenceEvent for HeadlessEvent {
    fn wait(&self) {
        self.token.world().borrow_mut().wait(self.token.id());
    }
}

impl Drop for HeadlessEvent {
    fn drop(&mut self) {
        self.token.world().borrow_mut().stats.events_closed += 1;
    }
}

pub struct HeadlessRootSignature {
    token: LiveToken,
    registers: Vec<u32>,
    allow_input_layout: bool,
}

impl HeadlessRootSignature {
    pub fn id(&self) -> u64 {
        self.token.id()
    }

    pub fn constant_buffer_registers(&self) -> &[u32] {
        &self.registers
    }
}

/// What a pipeline state was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSnapshot {
    pub label: String,
    pub root_signature: u64,
    pub input_layout: Vec<InputElement>,
    pub rasterizer: RasterizerDesc,
    pub blend_enabled: bool,
    pub depth_enabled: bool,
    pub render_target_format: Format,
}

pub struct HeadlessPipelineState {
    token: LiveToken,
    topology_type: TopologyType,
    desc: PipelineSnapshot,
}

impl HeadlessPipelineState {
    pub fn id(&self) -> u64 {
        self.token.id()
    }

    pub fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    pub fn desc(&self) -> &PipelineSnapshot {
        &self.desc
    }
}
