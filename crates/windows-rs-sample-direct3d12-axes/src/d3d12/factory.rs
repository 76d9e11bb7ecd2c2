use tracing::info;
use tracing::warn;
use windows::core::Interface;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use super::D3D12Backend;
use crate::gpu::Adapter;
use crate::gpu::AdapterDesc;
use crate::gpu::BackendError;
use crate::gpu::Factory;
use crate::gpu::FeatureLevel;
use crate::gpu::HResult;
use crate::gpu::SwapChainDesc;
use crate::sample_error::MyResult;

#[derive(Clone)]
pub struct D3D12Factory {
    pub dxgi_factory: IDXGIFactory4,
    /// Present when the debug layer could be enabled.
    pub info_queue: Option<IDXGIInfoQueue>,
}

/// Creates the DXGI factory. Debug builds enable the D3D12 debug layer first, with
/// GPU-based validation when the runtime offers it, and keep the DXGI info queue so
/// startup failures can be explained.
pub fn create_factory() -> MyResult<D3D12Factory> {
    let mut debug_flags = DXGI_CREATE_FACTORY_FLAGS(0);
    let mut info_queue = None;

    if cfg!(debug_assertions) {
        let debug_enabled = unsafe { enable_debug_layer() };
        if debug_enabled {
            debug_flags |= DXGI_CREATE_FACTORY_DEBUG;
            match unsafe { DXGIGetDebugInterface1::<IDXGIInfoQueue>(0) } {
                Ok(queue) => {
                    info!("DXGI Info Queue obtained.");
                    info_queue = Some(queue);
                }
                Err(e) => warn!("Failed to get DXGI Info Queue: {e:?}"),
            }
        }
    }

    let dxgi_factory: IDXGIFactory4 = unsafe { CreateDXGIFactory2(debug_flags) }?;
    Ok(D3D12Factory {
        dxgi_factory,
        info_queue,
    })
}

unsafe fn enable_debug_layer() -> bool {
    let mut debug1: Option<ID3D12Debug1> = None;
    if let Some(debug1) = D3D12GetDebugInterface(&mut debug1).ok().and(debug1) {
        debug1.EnableDebugLayer();
        debug1.SetEnableGPUBasedValidation(true);
        info!("D3D12 Debug Layer Enabled (ID3D12Debug1 + GBV)");
        return true;
    }

    let mut debug: Option<ID3D12Debug> = None;
    if let Some(debug) = D3D12GetDebugInterface(&mut debug).ok().and(debug) {
        debug.EnableDebugLayer();
        info!("D3D12 Debug Layer Enabled");
        return true;
    }

    warn!("D3D12 Debug Layer unavailable.");
    false
}

impl D3D12Factory {
    /// Logs and clears whatever the debug layer stored.
    pub fn print_debug_messages(&self) {
        let Some(queue) = &self.info_queue else {
            warn!("--- DXGI Info Queue not available ---");
            return;
        };

        warn!("--- DXGI Debug Messages START ---");
        let num_messages = unsafe { queue.GetNumStoredMessages(DXGI_DEBUG_ALL) };
        for i in 0..num_messages {
            let mut message_size: usize = 0;
            if unsafe { queue.GetMessage(DXGI_DEBUG_ALL, i, None, &mut message_size) }.is_err() {
                warn!("Error getting size for message {i}");
                continue;
            }

            let mut message_buffer: Vec<u8> = vec![0; message_size];
            let p_message = message_buffer.as_mut_ptr() as *mut DXGI_INFO_QUEUE_MESSAGE;
            if unsafe { queue.GetMessage(DXGI_DEBUG_ALL, i, Some(p_message), &mut message_size) }
                .is_err()
            {
                warn!("Error getting message data for message {i}");
                continue;
            }

            let message = unsafe { &*p_message };
            let description = unsafe {
                std::slice::from_raw_parts(
                    message.pDescription as *const u8,
                    message.DescriptionByteLength,
                )
            };
            let description = String::from_utf8_lossy(description);
            let severity = match message.Severity {
                DXGI_INFO_QUEUE_MESSAGE_SEVERITY_CORRUPTION => "CORRUPTION",
                DXGI_INFO_QUEUE_MESSAGE_SEVERITY_ERROR => "ERROR",
                DXGI_INFO_QUEUE_MESSAGE_SEVERITY_WARNING => "WARNING",
                DXGI_INFO_QUEUE_MESSAGE_SEVERITY_INFO => "INFO",
                DXGI_INFO_QUEUE_MESSAGE_SEVERITY_MESSAGE => "MESSAGE",
                _ => "UNKNOWN",
            };
            warn!(
                "DXGI Debug [{severity} ID:{}]: {}",
                message.ID,
                description.trim_matches(['\0', ' ', '\n'])
            );
        }
        unsafe { queue.ClearStoredMessages(DXGI_DEBUG_ALL) };
        warn!("--- DXGI Debug Messages END ---");
    }
}

impl Adapter for IDXGIAdapter1 {
    fn desc(&self) -> Result<AdapterDesc, BackendError> {
        let desc = unsafe { self.GetDesc1()? };
        let name = String::from_utf16_lossy(&desc.Description)
            .trim_end_matches('\0')
            .to_owned();
        let is_software = (DXGI_ADAPTER_FLAG(desc.Flags as i32) & DXGI_ADAPTER_FLAG_SOFTWARE)
            != DXGI_ADAPTER_FLAG_NONE;
        Ok(AdapterDesc {
            name,
            is_software,
            dedicated_video_memory: desc.DedicatedVideoMemory as u64,
        })
    }
}

impl Factory<D3D12Backend> for D3D12Factory {
    fn enum_adapters(&self) -> Result<Vec<IDXGIAdapter1>, BackendError> {
        let mut adapters = Vec::new();
        for i in 0.. {
            match unsafe { self.dxgi_factory.EnumAdapters1(i) } {
                Ok(adapter) => adapters.push(adapter),
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(adapters)
    }

    fn enum_warp_adapter(&self) -> Result<IDXGIAdapter1, BackendError> {
        Ok(unsafe { self.dxgi_factory.EnumWarpAdapter()? })
    }

    fn create_device(
        &self,
        adapter: &IDXGIAdapter1,
        minimum_feature_level: FeatureLevel,
    ) -> Result<ID3D12Device, BackendError> {
        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(adapter, minimum_feature_level.into(), &mut device) }?;
        device.ok_or_else(|| BackendError::new(HResult::E_FAIL, "D3D12CreateDevice returned no device"))
    }

    fn create_swap_chain(
        &self,
        queue: &ID3D12CommandQueue,
        window: &HWND,
        desc: &SwapChainDesc,
    ) -> Result<IDXGISwapChain3, BackendError> {
        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            BufferCount: desc.buffer_count,
            Width: desc.width,
            Height: desc.height,
            Format: desc.format.into(),
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                ..Default::default()
            },
            ..Default::default()
        };

        let swap_chain: IDXGISwapChain1 = unsafe {
            self.dxgi_factory
                .CreateSwapChainForHwnd(queue, *window, &swap_chain_desc, None, None)?
        };
        unsafe {
            self.dxgi_factory
                .MakeWindowAssociation(*window, DXGI_MWA_NO_ALT_ENTER)?;
        }
        Ok(swap_chain.cast()?)
    }
}
