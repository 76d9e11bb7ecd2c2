use std::mem::ManuallyDrop;
use std::ops::Range;
use std::ptr::NonNull;

use tracing::warn;
use windows::core::Interface;
use windows::core::HSTRING;
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::IDXGISwapChain3;
use windows::Win32::Graphics::Dxgi::DXGI_PRESENT;
use windows::Win32::System::Threading::CreateEventA;
use windows::Win32::System::Threading::WaitForSingleObjectEx;
use windows::Win32::System::Threading::INFINITE;

use super::D3D12Backend;
use crate::gpu::BackendError;
use crate::gpu::CommandAllocator;
use crate::gpu::CommandQueue;
use crate::gpu::CpuDescriptorHandle;
use crate::gpu::DescriptorHeap;
use crate::gpu::Fence;
use crate::gpu::FenceEvent;
use crate::gpu::GpuAddress;
use crate::gpu::GraphicsCommandList;
use crate::gpu::HResult;
use crate::gpu::PrimitiveTopology;
use crate::gpu::Resource;
use crate::gpu::ResourceState;
use crate::gpu::ScissorRect;
use crate::gpu::SwapChain;
use crate::gpu::VertexBufferView;
use crate::gpu::Viewport;

impl CommandQueue<D3D12Backend> for ID3D12CommandQueue {
    fn execute(&self, command_list: &ID3D12GraphicsCommandList) -> Result<(), BackendError> {
        let command_lists = [Some(command_list.cast::<ID3D12CommandList>()?)];
        unsafe { self.ExecuteCommandLists(&command_lists) };
        Ok(())
    }

    fn signal(&self, fence: &ID3D12Fence, value: u64) -> Result<(), BackendError> {
        Ok(unsafe { self.Signal(fence, value)? })
    }
}

impl SwapChain<D3D12Backend> for IDXGISwapChain3 {
    fn get_buffer(&self, index: u32) -> Result<ID3D12Resource, BackendError> {
        Ok(unsafe { self.GetBuffer(index)? })
    }

    fn current_back_buffer_index(&self) -> u32 {
        unsafe { self.GetCurrentBackBufferIndex() }
    }

    fn present(&self, sync_interval: u32) -> Result<(), BackendError> {
        Ok(unsafe { self.Present(sync_interval, DXGI_PRESENT(0)) }.ok()?)
    }
}

impl DescriptorHeap for ID3D12DescriptorHeap {
    fn cpu_handle_start(&self) -> CpuDescriptorHandle {
        let handle = unsafe { self.GetCPUDescriptorHandleForHeapStart() };
        CpuDescriptorHandle { ptr: handle.ptr }
    }
}

fn d3d12_range(range: Range<usize>) -> D3D12_RANGE {
    D3D12_RANGE {
        Begin: range.start,
        End: range.end,
    }
}

impl Resource for ID3D12Resource {
    fn gpu_virtual_address(&self) -> GpuAddress {
        GpuAddress(unsafe { self.GetGPUVirtualAddress() })
    }

    fn map(&self, read_range: Option<Range<usize>>) -> Result<NonNull<u8>, BackendError> {
        let read_range = read_range.map(d3d12_range);
        let mut data_ptr = std::ptr::null_mut();
        unsafe {
            self.Map(
                0,
                read_range.as_ref().map(|range| range as *const D3D12_RANGE),
                Some(&mut data_ptr),
            )?
        };
        NonNull::new(data_ptr as *mut u8)
            .ok_or_else(|| BackendError::new(HResult::E_FAIL, "Map returned a null pointer"))
    }

    fn unmap(&self, written_range: Option<Range<usize>>) {
        let written_range = written_range.map(d3d12_range);
        unsafe {
            self.Unmap(
                0,
                written_range
                    .as_ref()
                    .map(|range| range as *const D3D12_RANGE),
            )
        };
    }

    fn set_name(&self, name: &str) {
        // Naming is for the debug layer only.
        unsafe { self.SetName(&HSTRING::from(name)) }.ok();
    }
}

impl CommandAllocator for ID3D12CommandAllocator {
    fn reset(&self) -> Result<(), BackendError> {
        Ok(unsafe { self.Reset()? })
    }
}

/// A transition barrier that borrows `resource` without adding a reference.
pub fn transition_barrier(
    resource: &ID3D12Resource,
    state_before: D3D12_RESOURCE_STATES,
    state_after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                StateBefore: state_before,
                StateAfter: state_after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}

impl GraphicsCommandList<D3D12Backend> for ID3D12GraphicsCommandList {
    fn reset(
        &self,
        allocator: &ID3D12CommandAllocator,
        initial_state: &ID3D12PipelineState,
    ) -> Result<(), BackendError> {
        Ok(unsafe { self.Reset(allocator, initial_state)? })
    }

    fn close(&self) -> Result<(), BackendError> {
        Ok(unsafe { self.Close()? })
    }

    fn transition_barrier(
        &self,
        resource: &ID3D12Resource,
        before: ResourceState,
        after: ResourceState,
    ) {
        let barrier = transition_barrier(resource, before.into(), after.into());
        unsafe { self.ResourceBarrier(&[barrier]) };
    }

    fn set_render_target(&self, handle: CpuDescriptorHandle) {
        let rtv_handle: D3D12_CPU_DESCRIPTOR_HANDLE = handle.into();
        unsafe { self.OMSetRenderTargets(1, Some(&rtv_handle), false, None) };
    }

    fn clear_render_target_view(&self, handle: CpuDescriptorHandle, color: [f32; 4]) {
        unsafe { self.ClearRenderTargetView(handle.into(), &color, None) };
    }

    fn set_pipeline_state(&self, pipeline_state: &ID3D12PipelineState) {
        unsafe { self.SetPipelineState(pipeline_state) };
    }

    fn set_graphics_root_signature(&self, root_signature: &ID3D12RootSignature) {
        unsafe { self.SetGraphicsRootSignature(root_signature) };
    }

    fn set_vertex_buffer(&self, view: &VertexBufferView) {
        let view: D3D12_VERTEX_BUFFER_VIEW = (*view).into();
        unsafe { self.IASetVertexBuffers(0, Some(&[view])) };
    }

    fn set_graphics_root_constant_buffer_view(&self, parameter_index: u32, address: GpuAddress) {
        unsafe { self.SetGraphicsRootConstantBufferView(parameter_index, address.0) };
    }

    fn set_viewport(&self, viewport: &Viewport) {
        let viewport: D3D12_VIEWPORT = (*viewport).into();
        unsafe { self.RSSetViewports(&[viewport]) };
    }

    fn set_scissor_rect(&self, rect: &ScissorRect) {
        let rect: RECT = (*rect).into();
        unsafe { self.RSSetScissorRects(&[rect]) };
    }

    fn set_primitive_topology(&self, topology: PrimitiveTopology) {
        unsafe { self.IASetPrimitiveTopology(topology.into()) };
    }

    fn draw_instanced(
        &self,
        vertex_count_per_instance: u32,
        instance_count: u32,
        start_vertex_location: u32,
        start_instance_location: u32,
    ) {
        unsafe {
            self.DrawInstanced(
                vertex_count_per_instance,
                instance_count,
                start_vertex_location,
                start_instance_location,
            )
        };
    }
}

impl Fence<D3D12Backend> for ID3D12Fence {
    fn completed_value(&self) -> u64 {
        unsafe { self.GetCompletedValue() }
    }

    fn set_event_on_completion(&self, value: u64, event: &OwnedEvent) -> Result<(), BackendError> {
        Ok(unsafe { self.SetEventOnCompletion(value, event.0)? })
    }
}

/// An auto-reset Win32 event, closed on drop.
pub struct OwnedEvent(HANDLE);

impl OwnedEvent {
    pub fn new() -> Result<Self, BackendError> {
        Ok(Self(unsafe { CreateEventA(None, false, false, None)? }))
    }
}

impl FenceEvent for OwnedEvent {
    fn wait(&self) {
        unsafe { WaitForSingleObjectEx(self.0, INFINITE, false) };
    }
}

impl Drop for OwnedEvent {
    fn drop(&mut self) {
        if let Err(e) = unsafe { CloseHandle(self.0) } {
            warn!("Failed to close fence event: {e:?}");
        }
    }
}
