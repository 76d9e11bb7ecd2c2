use tracing::debug;

use crate::gpu::Backend;
use crate::gpu::CpuDescriptorHandle;
use crate::gpu::DescriptorHeap;
use crate::gpu::Device;
use crate::gpu::Factory;
use crate::gpu::Format;
use crate::gpu::Resource;
use crate::gpu::SwapChain;
use crate::gpu::SwapChainDesc;
use crate::sample_error::MyResult;
use crate::FRAME_COUNT;

pub const BACK_BUFFER_FORMAT: Format = Format::R8G8B8A8Unorm;

/// The swap chain's back buffers and one render target view per buffer.
pub struct SwapchainTargets<B: Backend> {
    swap_chain: B::SwapChain,
    render_targets: [B::Resource; FRAME_COUNT as usize],
    rtv_heap: B::DescriptorHeap,
    rtv_descriptor_size: u32,
    frame_index: u32,
}

impl<B: Backend> SwapchainTargets<B> {
    pub fn new(
        factory: &B::Factory,
        device: &B::Device,
        queue: &B::Queue,
        window: &B::Window,
        width: u32,
        height: u32,
    ) -> MyResult<Self> {
        let swap_chain = factory.create_swap_chain(
            queue,
            window,
            &SwapChainDesc {
                buffer_count: FRAME_COUNT,
                width,
                height,
                format: BACK_BUFFER_FORMAT,
            },
        )?;
        let frame_index = swap_chain.current_back_buffer_index();

        let rtv_heap = device.create_rtv_heap(FRAME_COUNT)?;
        let rtv_descriptor_size = device.rtv_descriptor_size();
        let rtv_start = rtv_heap.cpu_handle_start();

        let render_targets: [B::Resource; FRAME_COUNT as usize] =
            array_init::try_array_init(|i| -> MyResult<B::Resource> {
                let resource = swap_chain.get_buffer(i as u32)?;
                resource.set_name(&format!("BackBuffer{i}"));
                device.create_render_target_view(
                    &resource,
                    rtv_start.offset(i as u32, rtv_descriptor_size),
                );
                Ok(resource)
            })?;
        debug!(
            "created {FRAME_COUNT} render target views ({rtv_descriptor_size} bytes apart), back buffer {frame_index} current"
        );

        Ok(Self {
            swap_chain,
            render_targets,
            rtv_heap,
            rtv_descriptor_size,
            frame_index,
        })
    }

    /// Index last obtained from the swap chain.
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Asks the swap chain; flip-discard does not hand out buffers in a fixed order.
    pub fn current_back_buffer_index(&self) -> u32 {
        self.swap_chain.current_back_buffer_index()
    }

    pub fn refresh_frame_index(&mut self) -> u32 {
        self.frame_index = self.current_back_buffer_index();
        self.frame_index
    }

    pub fn rtv_handle(&self, index: u32) -> CpuDescriptorHandle {
        self.rtv_heap
            .cpu_handle_start()
            .offset(index, self.rtv_descriptor_size)
    }

    pub fn back_buffer(&self, index: u32) -> &B::Resource {
        &self.render_targets[index as usize]
    }

    pub fn present(&self, sync_interval: u32) -> MyResult<()> {
        self.swap_chain.present(sync_interval)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessBackend;
    use crate::headless::HeadlessInstance;
    use crate::headless::HeadlessOptions;
    use crate::headless::HeadlessWindow;

    fn targets(instance: &HeadlessInstance) -> SwapchainTargets<HeadlessBackend> {
        let device = instance.device();
        let queue = device.create_command_queue().unwrap();
        SwapchainTargets::new(
            &instance.factory(),
            &device,
            &queue,
            &HeadlessWindow::default(),
            800,
            600,
        )
        .unwrap()
    }

    #[test]
    fn one_rtv_per_back_buffer_at_fixed_offsets() {
        let instance = HeadlessInstance::default();
        let targets = targets(&instance);
        let size = instance.device().rtv_descriptor_size();
        assert_eq!(instance.render_target_views(), 2);
        assert_eq!(
            targets.rtv_handle(1).ptr - targets.rtv_handle(0).ptr,
            size as usize
        );
        assert_eq!(
            instance.rtv_target(targets.rtv_handle(1)),
            Some(targets.back_buffer(1).id())
        );
    }

    #[test]
    fn first_index_comes_from_the_swap_chain() {
        let instance = HeadlessInstance::new(HeadlessOptions {
            back_buffer_sequence: vec![1, 0],
            ..Default::default()
        });
        let targets = targets(&instance);
        assert_eq!(targets.frame_index(), 1);
    }

    #[test]
    fn refresh_reads_the_swap_chain_after_present() {
        let instance = HeadlessInstance::new(HeadlessOptions {
            back_buffer_sequence: vec![0, 0, 1],
            ..Default::default()
        });
        let mut targets = targets(&instance);
        assert_eq!(targets.frame_index(), 0);
        targets.present(1).unwrap();
        assert_eq!(targets.refresh_frame_index(), 0);
        targets.present(1).unwrap();
        assert_eq!(targets.refresh_frame_index(), 1);
    }
}
