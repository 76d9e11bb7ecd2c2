//! Draws a triangle and a set of coordinate axes through Direct3D 12, one fully
//! synchronized frame at a time. The same frame pipeline also runs against an
//! in-process headless device, which is what the tests drive.

pub mod adapter;
pub mod config;
pub mod fence;
pub mod gpu;
pub mod headless;
pub mod pipeline;
pub mod recorder;
pub mod renderer;
pub mod sample_error;
pub mod scene;
pub mod shader;
pub mod swapchain;
pub mod upload;

#[cfg(windows)]
pub mod d3d12;
#[cfg(windows)]
pub mod window;

/// Number of swap chain back buffers.
pub const FRAME_COUNT: u32 = 2;
