use std::ptr::NonNull;

use bevy_math::Mat4;
use eyre::eyre;
use tracing::debug;

use crate::gpu::Backend;
use crate::gpu::Device;
use crate::gpu::GpuAddress;
use crate::gpu::Resource;
use crate::gpu::VertexBufferView;
use crate::sample_error::MyResult;
use crate::scene::Vertex;

/// Constant buffers must be sized in multiples of 256 bytes.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

pub const fn align_constant_buffer_size(size_in_bytes: u64) -> u64 {
    (size_in_bytes + CONSTANT_BUFFER_ALIGNMENT - 1) & !(CONSTANT_BUFFER_ALIGNMENT - 1)
}

/// A buffer on an upload heap: CPU-writable, GPU-readable.
pub struct UploadBuffer<B: Backend> {
    pub resource: B::Resource,
    pub gpu_address: GpuAddress,
    pub size: u64,
}

pub fn create_upload_buffer<B: Backend>(
    device: &B::Device,
    size_in_bytes: u64,
    name: &str,
) -> MyResult<UploadBuffer<B>> {
    let resource = device.create_upload_buffer(size_in_bytes)?;
    resource.set_name(name);
    let gpu_address = resource.gpu_virtual_address();
    debug!("created upload buffer {name} ({size_in_bytes} bytes at {gpu_address:?})");
    Ok(UploadBuffer {
        resource,
        gpu_address,
        size: size_in_bytes,
    })
}

/// Map, copy, unmap.
pub fn upload_bytes<B: Backend>(buffer: &UploadBuffer<B>, bytes: &[u8]) -> MyResult<()> {
    if bytes.len() as u64 > buffer.size {
        return Err(eyre!(
            "upload of {} bytes does not fit in a {} byte buffer",
            bytes.len(),
            buffer.size
        )
        .into());
    }
    // We do not intend to read from this resource on the CPU.
    let data = buffer.resource.map(Some(0..0))?;
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), data.as_ptr(), bytes.len()) };
    buffer.resource.unmap(None);
    Ok(())
}

pub struct VertexBuffer<B: Backend> {
    pub buffer: UploadBuffer<B>,
    pub view: VertexBufferView,
}

pub fn create_vertex_buffer<B: Backend>(
    device: &B::Device,
    vertices: &[Vertex],
) -> MyResult<VertexBuffer<B>> {
    let bytes: &[u8] = bytemuck::cast_slice(vertices);
    let buffer = create_upload_buffer::<B>(device, bytes.len() as u64, "VertexBuffer")?;
    upload_bytes(&buffer, bytes)?;

    let view = VertexBufferView {
        buffer_location: buffer.gpu_address,
        stride_in_bytes: std::mem::size_of::<Vertex>() as u32,
        size_in_bytes: bytes.len() as u32,
    };
    Ok(VertexBuffer { buffer, view })
}

/// Holds one transform. Stays mapped until dropped so updates need no map/unmap pair.
pub struct ConstantBuffer<B: Backend> {
    buffer: UploadBuffer<B>,
    mapped: NonNull<u8>,
}

impl<B: Backend> ConstantBuffer<B> {
    pub fn new(device: &B::Device, initial: Mat4) -> MyResult<Self> {
        let size = align_constant_buffer_size(std::mem::size_of::<Mat4>() as u64);
        let buffer = create_upload_buffer::<B>(device, size, "ConstantBuffer")?;
        let mapped = buffer.resource.map(Some(0..0))?;
        let constant_buffer = Self { buffer, mapped };
        constant_buffer.write_transform(&initial);
        Ok(constant_buffer)
    }

    pub fn write_transform(&self, transform: &Mat4) {
        let columns = transform.to_cols_array();
        let bytes: &[u8] = bytemuck::cast_slice(&columns);
        // The mapping is at least 256 bytes; a Mat4 is 64.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped.as_ptr(), bytes.len())
        };
    }

    pub fn gpu_address(&self) -> GpuAddress {
        self.buffer.gpu_address
    }

    pub fn size(&self) -> u64 {
        self.buffer.size
    }

    pub fn resource(&self) -> &B::Resource {
        &self.buffer.resource
    }
}

impl<B: Backend> Drop for ConstantBuffer<B> {
    fn drop(&mut self) {
        self.buffer.resource.unmap(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessBackend;
    use crate::headless::HeadlessInstance;
    use crate::scene::VERTICES;

    #[test]
    fn constant_buffer_sizes_round_up_to_256() {
        assert_eq!(align_constant_buffer_size(64), 256);
        assert_eq!(align_constant_buffer_size(256), 256);
        assert_eq!(align_constant_buffer_size(257), 512);
    }

    #[test]
    fn vertex_buffer_view_covers_all_vertices() {
        let instance = HeadlessInstance::default();
        let device = instance.device();
        let vertex_buffer = create_vertex_buffer::<HeadlessBackend>(&device, &VERTICES).unwrap();
        assert_eq!(vertex_buffer.view.stride_in_bytes, 28);
        assert_eq!(vertex_buffer.view.vertex_count(), 9);
        assert_eq!(
            vertex_buffer.view.buffer_location,
            vertex_buffer.buffer.resource.gpu_virtual_address()
        );
        assert_eq!(
            vertex_buffer.buffer.resource.contents(),
            bytemuck::cast_slice::<Vertex, u8>(&VERTICES[..])
        );
        assert_eq!(vertex_buffer.buffer.resource.map_count(), 0);
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let instance = HeadlessInstance::default();
        let device = instance.device();
        let buffer = create_upload_buffer::<HeadlessBackend>(&device, 4, "Tiny").unwrap();
        assert!(upload_bytes(&buffer, &[0u8; 8]).is_err());
    }

    #[test]
    fn constant_buffer_stays_mapped_and_updates_in_place() {
        let instance = HeadlessInstance::default();
        let device = instance.device();
        let constant_buffer = ConstantBuffer::<HeadlessBackend>::new(&device, Mat4::IDENTITY).unwrap();
        assert_eq!(constant_buffer.size(), 256);
        assert_eq!(constant_buffer.resource().map_count(), 1);

        let scale = Mat4::from_scale(bevy_math::Vec3::splat(2.0));
        constant_buffer.write_transform(&scale);
        let contents = constant_buffer.resource().contents();
        let floats: Vec<f32> = contents[..64]
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        assert_eq!(floats, scale.to_cols_array());
        assert_eq!(constant_buffer.resource().map_count(), 1);

        let resource = constant_buffer.resource().clone();
        drop(constant_buffer);
        assert_eq!(resource.map_count(), 0);
    }
}
