//! The real backend: Direct3D 12, DXGI and the FXC compiler through `windows`.

mod command;
mod device;
mod factory;
mod fxc;

use windows::Win32::Foundation::HWND;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::IDXGIAdapter1;
use windows::Win32::Graphics::Dxgi::IDXGISwapChain3;

pub use command::transition_barrier;
pub use command::OwnedEvent;
pub use factory::create_factory;
pub use factory::D3D12Factory;
pub use fxc::FxcCompiler;

use crate::gpu::Backend;
use crate::gpu::BackendError;
use crate::gpu::CpuDescriptorHandle;
use crate::gpu::CullMode;
use crate::gpu::FeatureLevel;
use crate::gpu::FillMode;
use crate::gpu::Format;
use crate::gpu::HResult;
use crate::gpu::PrimitiveTopology;
use crate::gpu::ResourceState;
use crate::gpu::ScissorRect;
use crate::gpu::TopologyType;
use crate::gpu::VertexBufferView;
use crate::gpu::Viewport;

pub enum D3D12Backend {}

impl Backend for D3D12Backend {
    type Factory = D3D12Factory;
    type Adapter = IDXGIAdapter1;
    type Device = ID3D12Device;
    type Queue = ID3D12CommandQueue;
    type SwapChain = IDXGISwapChain3;
    type DescriptorHeap = ID3D12DescriptorHeap;
    type Resource = ID3D12Resource;
    type CommandAllocator = ID3D12CommandAllocator;
    type CommandList = ID3D12GraphicsCommandList;
    type RootSignature = ID3D12RootSignature;
    type PipelineState = ID3D12PipelineState;
    type Fence = ID3D12Fence;
    type Event = OwnedEvent;
    type Compiler = FxcCompiler;
    type Window = HWND;
}

impl From<windows::core::Error> for BackendError {
    fn from(error: windows::core::Error) -> Self {
        BackendError::new(HResult(error.code().0), error.message())
    }
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            blob.GetBufferPointer() as *const u8,
            blob.GetBufferSize(),
        )
    }
}

fn blob_text(blob: &ID3DBlob) -> String {
    String::from_utf8_lossy(blob_bytes(blob))
        .trim_end_matches('\0')
        .to_owned()
}

impl From<ResourceState> for D3D12_RESOURCE_STATES {
    fn from(state: ResourceState) -> Self {
        match state {
            ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
            ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
            ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
        }
    }
}

impl From<TopologyType> for D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    fn from(topology_type: TopologyType) -> Self {
        match topology_type {
            TopologyType::Triangle => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            TopologyType::Line => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        }
    }
}

impl From<PrimitiveTopology> for D3D_PRIMITIVE_TOPOLOGY {
    fn from(topology: PrimitiveTopology) -> Self {
        match topology {
            PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
            PrimitiveTopology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        }
    }
}

impl From<FeatureLevel> for D3D_FEATURE_LEVEL {
    fn from(level: FeatureLevel) -> Self {
        match level {
            FeatureLevel::Level11_0 => D3D_FEATURE_LEVEL_11_0,
            FeatureLevel::Level11_1 => D3D_FEATURE_LEVEL_11_1,
            FeatureLevel::Level12_0 => D3D_FEATURE_LEVEL_12_0,
            FeatureLevel::Level12_1 => D3D_FEATURE_LEVEL_12_1,
        }
    }
}

impl From<Format> for DXGI_FORMAT {
    fn from(format: Format) -> Self {
        match format {
            Format::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
            Format::R32G32B32Float => DXGI_FORMAT_R32G32B32_FLOAT,
            Format::R32G32B32A32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        }
    }
}

impl From<FillMode> for D3D12_FILL_MODE {
    fn from(fill_mode: FillMode) -> Self {
        match fill_mode {
            FillMode::Solid => D3D12_FILL_MODE_SOLID,
            FillMode::Wireframe => D3D12_FILL_MODE_WIREFRAME,
        }
    }
}

impl From<CullMode> for D3D12_CULL_MODE {
    fn from(cull_mode: CullMode) -> Self {
        match cull_mode {
            CullMode::None => D3D12_CULL_MODE_NONE,
            CullMode::Back => D3D12_CULL_MODE_BACK,
        }
    }
}

impl From<CpuDescriptorHandle> for D3D12_CPU_DESCRIPTOR_HANDLE {
    fn from(handle: CpuDescriptorHandle) -> Self {
        D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr }
    }
}

impl From<VertexBufferView> for D3D12_VERTEX_BUFFER_VIEW {
    fn from(view: VertexBufferView) -> Self {
        D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: view.buffer_location.0,
            SizeInBytes: view.size_in_bytes,
            StrideInBytes: view.stride_in_bytes,
        }
    }
}

impl From<Viewport> for D3D12_VIEWPORT {
    fn from(viewport: Viewport) -> Self {
        D3D12_VIEWPORT {
            TopLeftX: viewport.top_left_x,
            TopLeftY: viewport.top_left_y,
            Width: viewport.width,
            Height: viewport.height,
            MinDepth: viewport.min_depth,
            MaxDepth: viewport.max_depth,
        }
    }
}

impl From<ScissorRect> for RECT {
    fn from(rect: ScissorRect) -> Self {
        RECT {
            left: rect.left,
            top: rect.top,
            right: rect.right,
            bottom: rect.bottom,
        }
    }
}
