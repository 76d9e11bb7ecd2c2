//! Backend-neutral view of the handful of D3D12/DXGI objects the sample touches.
//!
//! The frame pipeline is written once against [`Backend`]; `D3D12Backend` drives a
//! real GPU and `HeadlessBackend` models one in-process.

pub mod types;

use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::ptr::NonNull;

pub use types::*;

pub trait Backend: Sized + 'static {
    type Factory: Factory<Self>;
    type Adapter: Adapter;
    type Device: Device<Self>;
    type Queue: CommandQueue<Self>;
    type SwapChain: SwapChain<Self>;
    type DescriptorHeap: DescriptorHeap;
    type Resource: Resource;
    type CommandAllocator: CommandAllocator;
    type CommandList: GraphicsCommandList<Self>;
    type RootSignature;
    type PipelineState;
    type Fence: Fence<Self>;
    type Event: FenceEvent;
    type Compiler: ShaderCompiler + Default;
    type Window;
}

pub trait Factory<B: Backend> {
    /// Every adapter, in enumeration index order.
    fn enum_adapters(&self) -> Result<Vec<B::Adapter>, BackendError>;
    fn enum_warp_adapter(&self) -> Result<B::Adapter, BackendError>;
    fn create_device(
        &self,
        adapter: &B::Adapter,
        minimum_feature_level: FeatureLevel,
    ) -> Result<B::Device, BackendError>;
    fn create_swap_chain(
        &self,
        queue: &B::Queue,
        window: &B::Window,
        desc: &SwapChainDesc,
    ) -> Result<B::SwapChain, BackendError>;
}

pub trait Adapter {
    fn desc(&self) -> Result<AdapterDesc, BackendError>;
}

pub trait Device<B: Backend> {
    fn create_command_queue(&self) -> Result<B::Queue, BackendError>;
    fn create_rtv_heap(&self, descriptor_count: u32) -> Result<B::DescriptorHeap, BackendError>;
    fn rtv_descriptor_size(&self) -> u32;
    fn create_render_target_view(&self, resource: &B::Resource, handle: CpuDescriptorHandle);
    fn create_command_allocator(&self) -> Result<B::CommandAllocator, BackendError>;
    /// The returned list is closed.
    fn create_command_list(
        &self,
        allocator: &B::CommandAllocator,
        initial_state: &B::PipelineState,
    ) -> Result<B::CommandList, BackendError>;
    fn create_fence(&self, initial_value: u64) -> Result<B::Fence, BackendError>;
    fn create_event(&self) -> Result<B::Event, BackendError>;
    /// A buffer on an upload heap, created in `GenericRead` state.
    fn create_upload_buffer(&self, size_in_bytes: u64) -> Result<B::Resource, BackendError>;
    fn serialize_root_signature(&self, desc: &RootSignatureDesc) -> Result<Vec<u8>, BackendError>;
    fn create_root_signature(&self, blob: &[u8]) -> Result<B::RootSignature, BackendError>;
    fn create_pipeline_state(
        &self,
        desc: &PipelineDesc<'_, B::RootSignature>,
    ) -> Result<B::PipelineState, BackendError>;
}

pub trait CommandQueue<B: Backend> {
    fn execute(&self, command_list: &B::CommandList) -> Result<(), BackendError>;
    fn signal(&self, fence: &B::Fence, value: u64) -> Result<(), BackendError>;
}

pub trait SwapChain<B: Backend> {
    fn get_buffer(&self, index: u32) -> Result<B::Resource, BackendError>;
    fn current_back_buffer_index(&self) -> u32;
    fn present(&self, sync_interval: u32) -> Result<(), BackendError>;
}

pub trait DescriptorHeap {
    fn cpu_handle_start(&self) -> CpuDescriptorHandle;
}

pub trait Resource {
    fn gpu_virtual_address(&self) -> GpuAddress;
    /// `read_range` of `Some(0..0)` declares the CPU will not read the mapping.
    fn map(&self, read_range: Option<Range<usize>>) -> Result<NonNull<u8>, BackendError>;
    fn unmap(&self, written_range: Option<Range<usize>>);
    fn set_name(&self, name: &str);
}

pub trait CommandAllocator {
    fn reset(&self) -> Result<(), BackendError>;
}

pub trait GraphicsCommandList<B: Backend> {
    fn reset(
        &self,
        allocator: &B::CommandAllocator,
        initial_state: &B::PipelineState,
    ) -> Result<(), BackendError>;
    fn close(&self) -> Result<(), BackendError>;
    fn transition_barrier(
        &self,
        resource: &B::Resource,
        before: ResourceState,
        after: ResourceState,
    );
    fn set_render_target(&self, handle: CpuDescriptorHandle);
    fn clear_render_target_view(&self, handle: CpuDescriptorHandle, color: [f32; 4]);
    fn set_pipeline_state(&self, pipeline_state: &B::PipelineState);
    fn set_graphics_root_signature(&self, root_signature: &B::RootSignature);
    fn set_vertex_buffer(&self, view: &VertexBufferView);
    fn set_graphics_root_constant_buffer_view(&self, parameter_index: u32, address: GpuAddress);
    fn set_viewport(&self, viewport: &Viewport);
    fn set_scissor_rect(&self, rect: &ScissorRect);
    fn set_primitive_topology(&self, topology: PrimitiveTopology);
    fn draw_instanced(
        &self,
        vertex_count_per_instance: u32,
        instance_count: u32,
        start_vertex_location: u32,
        start_instance_location: u32,
    );
}

pub trait Fence<B: Backend> {
    fn completed_value(&self) -> u64;
    fn set_event_on_completion(&self, value: u64, event: &B::Event) -> Result<(), BackendError>;
}

/// An OS wait primitive. Closed when dropped.
pub trait FenceEvent {
    /// Blocks with no timeout.
    fn wait(&self);
}

pub trait ShaderCompiler {
    fn compile_from_file(
        &self,
        path: &Path,
        entry_point: &str,
        target: &str,
        debug: bool,
    ) -> Result<Vec<u8>, BackendError>;
}

/// A failed graphics API call.
#[derive(Clone)]
pub struct BackendError {
    pub code: HResult,
    pub message: String,
    /// Compiler or serializer output, when the call produced any.
    pub diagnostic: Option<String>,
}

impl BackendError {
    pub fn new(code: HResult, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            diagnostic: None,
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (HRESULT {})", self.message, self.code)?;
        if let Some(diagnostic) = &self.diagnostic {
            write!(f, ": {}", diagnostic.trim_end())?;
        }
        Ok(())
    }
}

impl fmt::Debug for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for BackendError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display_includes_code_and_diagnostic() {
        let error = BackendError::new(HResult::E_FAIL, "D3DCompileFromFile failed")
            .with_diagnostic("shader.hlsl(3,1): error X3000: syntax error\n");
        assert_eq!(
            error.to_string(),
            "D3DCompileFromFile failed (HRESULT 0x80004005): shader.hlsl(3,1): error X3000: syntax error"
        );
    }
}
