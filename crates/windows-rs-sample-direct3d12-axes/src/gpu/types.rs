use std::fmt;

/// Usage state of a GPU resource, as declared by transition barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Present,
    RenderTarget,
    GenericRead,
}

/// Primitive class a pipeline state object is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyType {
    Triangle,
    Line,
}

/// Per-draw primitive topology set on the input assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    TriangleList,
    LineList,
}

impl PrimitiveTopology {
    /// The pipeline topology type a draw with this topology must be issued against.
    pub const fn topology_type(self) -> TopologyType {
        match self {
            PrimitiveTopology::TriangleList => TopologyType::Triangle,
            PrimitiveTopology::LineList => TopologyType::Line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureLevel {
    Level11_0,
    Level11_1,
    Level12_0,
    Level12_1,
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureLevel::Level11_0 => "11_0",
            FeatureLevel::Level11_1 => "11_1",
            FeatureLevel::Level12_0 => "12_0",
            FeatureLevel::Level12_1 => "12_1",
        };
        write!(f, "D3D_FEATURE_LEVEL_{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    R8G8B8A8Unorm,
    R32G32B32Float,
    R32G32B32A32Float,
}

impl Format {
    pub const fn size_in_bytes(self) -> u32 {
        match self {
            Format::R8G8B8A8Unorm => 4,
            Format::R32G32B32Float => 12,
            Format::R32G32B32A32Float => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterizerDesc {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
}

/// One per-vertex attribute of the input layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputElement {
    pub semantic_name: &'static str,
    pub format: Format,
    pub aligned_byte_offset: u32,
}

/// GPU virtual address of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GpuAddress(pub u64);

/// CPU-side descriptor handle; descriptor heaps are flat, so handles are byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuDescriptorHandle {
    pub ptr: usize,
}

impl CpuDescriptorHandle {
    pub const fn offset(self, index: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + (index as usize) * (increment_size as usize),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertexBufferView {
    pub buffer_location: GpuAddress,
    pub size_in_bytes: u32,
    pub stride_in_bytes: u32,
}

impl VertexBufferView {
    pub const fn vertex_count(&self) -> u32 {
        if self.stride_in_bytes == 0 {
            0
        } else {
            self.size_in_bytes / self.stride_in_bytes
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub top_left_x: f32,
    pub top_left_y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn covering(width: u32, height: u32) -> Self {
        Self {
            top_left_x: 0.0,
            top_left_y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn covering(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterDesc {
    pub name: String,
    pub is_software: bool,
    pub dedicated_video_memory: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub buffer_count: u32,
    pub width: u32,
    pub height: u32,
    pub format: Format,
}

/// A single root parameter binding a constant buffer view directly at `shader_register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootSignatureDesc {
    pub constant_buffer_registers: &'static [u32],
    pub allow_input_layout: bool,
}

pub struct PipelineDesc<'a, R> {
    pub root_signature: &'a R,
    pub vertex_shader: &'a [u8],
    pub pixel_shader: &'a [u8],
    pub input_layout: &'a [InputElement],
    pub rasterizer: RasterizerDesc,
    pub blend_enabled: bool,
    pub depth_enabled: bool,
    pub topology_type: TopologyType,
    pub render_target_format: Format,
    pub label: &'a str,
}

/// A status code as reported by the graphics API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

impl HResult {
    pub const E_FAIL: HResult = HResult(0x8000_4005_u32 as i32);
    pub const E_INVALIDARG: HResult = HResult(0x8007_0057_u32 as i32);
    pub const E_OUTOFMEMORY: HResult = HResult(0x8007_000E_u32 as i32);
    pub const E_FILE_NOT_FOUND: HResult = HResult(0x8007_0002_u32 as i32);
    pub const DXGI_ERROR_INVALID_CALL: HResult = HResult(0x887A_0001_u32 as i32);
    pub const DXGI_ERROR_UNSUPPORTED: HResult = HResult(0x887A_0004_u32 as i32);
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}
