use std::ffi::CString;

use windows::core::HSTRING;
use windows::core::PCSTR;
use windows::Win32::Foundation::FALSE;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::blob_bytes;
use super::blob_text;
use super::D3D12Backend;
use super::OwnedEvent;
use crate::gpu::BackendError;
use crate::gpu::CpuDescriptorHandle;
use crate::gpu::Device;
use crate::gpu::HResult;
use crate::gpu::PipelineDesc;
use crate::gpu::RootSignatureDesc;

impl Device<D3D12Backend> for ID3D12Device {
    fn create_command_queue(&self) -> Result<ID3D12CommandQueue, BackendError> {
        let desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            ..Default::default()
        };
        Ok(unsafe { self.CreateCommandQueue(&desc)? })
    }

    fn create_rtv_heap(&self, descriptor_count: u32) -> Result<ID3D12DescriptorHeap, BackendError> {
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            NumDescriptors: descriptor_count,
            Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
            ..Default::default()
        };
        Ok(unsafe { self.CreateDescriptorHeap(&desc)? })
    }

    fn rtv_descriptor_size(&self) -> u32 {
        unsafe { self.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) }
    }

    fn create_render_target_view(&self, resource: &ID3D12Resource, handle: CpuDescriptorHandle) {
        unsafe { self.CreateRenderTargetView(resource, None, handle.into()) }
    }

    fn create_command_allocator(&self) -> Result<ID3D12CommandAllocator, BackendError> {
        Ok(unsafe { self.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)? })
    }

    fn create_command_list(
        &self,
        allocator: &ID3D12CommandAllocator,
        initial_state: &ID3D12PipelineState,
    ) -> Result<ID3D12GraphicsCommandList, BackendError> {
        let command_list: ID3D12GraphicsCommandList = unsafe {
            self.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, allocator, initial_state)?
        };
        // Lists are created open; the frame loop resets before recording.
        unsafe { command_list.Close()? };
        Ok(command_list)
    }

    fn create_fence(&self, initial_value: u64) -> Result<ID3D12Fence, BackendError> {
        Ok(unsafe { self.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE)? })
    }

    fn create_event(&self) -> Result<OwnedEvent, BackendError> {
        OwnedEvent::new()
    }

    fn create_upload_buffer(&self, size_in_bytes: u64) -> Result<ID3D12Resource, BackendError> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_UPLOAD,
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: size_in_bytes,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: D3D12_RESOURCE_FLAG_NONE,
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                D3D12_RESOURCE_STATE_GENERIC_READ,
                None,
                &mut resource,
            )?
        };
        resource.ok_or_else(|| {
            BackendError::new(HResult::E_FAIL, "CreateCommittedResource returned no resource")
        })
    }

    fn serialize_root_signature(&self, desc: &RootSignatureDesc) -> Result<Vec<u8>, BackendError> {
        let parameters: Vec<D3D12_ROOT_PARAMETER> = desc
            .constant_buffer_registers
            .iter()
            .map(|&register| D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    Descriptor: D3D12_ROOT_DESCRIPTOR {
                        ShaderRegister: register,
                        RegisterSpace: 0,
                    },
                },
                ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
            })
            .collect();
        let flags = if desc.allow_input_layout {
            D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT
        } else {
            D3D12_ROOT_SIGNATURE_FLAG_NONE
        };
        let root_signature_desc = D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: parameters.as_ptr(),
            Flags: flags,
            ..Default::default()
        };

        let mut signature_blob = None;
        let mut error_blob = None;
        let result = unsafe {
            D3D12SerializeRootSignature(
                &root_signature_desc,
                D3D_ROOT_SIGNATURE_VERSION_1,
                &mut signature_blob,
                Some(&mut error_blob),
            )
        };
        if let Err(e) = result {
            let mut error = BackendError::from(e);
            if let Some(blob) = &error_blob {
                error = error.with_diagnostic(blob_text(blob));
            }
            return Err(error);
        }
        match signature_blob {
            Some(blob) => Ok(blob_bytes(&blob).to_vec()),
            None => Err(BackendError::new(
                HResult::E_FAIL,
                "D3D12SerializeRootSignature produced no blob",
            )),
        }
    }

    fn create_root_signature(&self, blob: &[u8]) -> Result<ID3D12RootSignature, BackendError> {
        Ok(unsafe { self.CreateRootSignature(0, blob)? })
    }

    fn create_pipeline_state(
        &self,
        desc: &PipelineDesc<'_, ID3D12RootSignature>,
    ) -> Result<ID3D12PipelineState, BackendError> {
        // The element descs point into these; they must outlive the create call.
        let semantic_names = desc
            .input_layout
            .iter()
            .map(|element| {
                CString::new(element.semantic_name).map_err(|_| {
                    BackendError::new(HResult::E_INVALIDARG, "semantic name contains a NUL")
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let input_element_descs: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
            .input_layout
            .iter()
            .zip(&semantic_names)
            .map(|(element, name)| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(name.as_ptr() as *const u8),
                Format: element.format.into(),
                AlignedByteOffset: element.aligned_byte_offset,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                ..Default::default()
            })
            .collect();

        let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
        rtv_formats[0] = desc.render_target_format.into();

        let pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: unsafe { std::mem::transmute_copy(desc.root_signature) },
            VS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: desc.vertex_shader.as_ptr() as *const _,
                BytecodeLength: desc.vertex_shader.len(),
            },
            PS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: desc.pixel_shader.as_ptr() as *const _,
                BytecodeLength: desc.pixel_shader.len(),
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: input_element_descs.as_ptr(),
                NumElements: input_element_descs.len() as u32,
            },
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: desc.rasterizer.fill_mode.into(),
                CullMode: desc.rasterizer.cull_mode.into(),
                DepthClipEnable: true.into(),
                ..Default::default()
            },
            BlendState: D3D12_BLEND_DESC {
                AlphaToCoverageEnable: FALSE,
                IndependentBlendEnable: FALSE,
                RenderTarget: [D3D12_RENDER_TARGET_BLEND_DESC {
                    BlendEnable: desc.blend_enabled.into(),
                    LogicOpEnable: FALSE,
                    SrcBlend: D3D12_BLEND_ONE,
                    DestBlend: D3D12_BLEND_ZERO,
                    BlendOp: D3D12_BLEND_OP_ADD,
                    SrcBlendAlpha: D3D12_BLEND_ONE,
                    DestBlendAlpha: D3D12_BLEND_ZERO,
                    BlendOpAlpha: D3D12_BLEND_OP_ADD,
                    LogicOp: D3D12_LOGIC_OP_NOOP,
                    RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
                }; 8],
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: desc.depth_enabled.into(),
                StencilEnable: FALSE,
                ..Default::default()
            },
            SampleMask: u32::MAX,
            PrimitiveTopologyType: desc.topology_type.into(),
            NumRenderTargets: 1,
            RTVFormats: rtv_formats,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            ..Default::default()
        };

        let pipeline_state: ID3D12PipelineState =
            unsafe { self.CreateGraphicsPipelineState(&pso_desc)? };
        unsafe { pipeline_state.SetName(&HSTRING::from(desc.label)) }.ok();
        Ok(pipeline_state)
    }
}

