use tracing::debug;
use tracing::error;

use crate::gpu::Backend;
use crate::gpu::CullMode;
use crate::gpu::Device;
use crate::gpu::FillMode;
use crate::gpu::InputElement;
use crate::gpu::PipelineDesc;
use crate::gpu::RasterizerDesc;
use crate::gpu::RootSignatureDesc;
use crate::gpu::TopologyType;
use crate::sample_error::MyResult;
use crate::sample_error::StartupError;
use crate::shader::ShaderPair;
use crate::swapchain::BACK_BUFFER_FORMAT;

/// Root parameter 0: the transform constant buffer, bound directly at `b0`.
pub const TRANSFORM_ROOT_PARAMETER: u32 = 0;

pub const ROOT_SIGNATURE: RootSignatureDesc = RootSignatureDesc {
    constant_buffer_registers: &[0],
    allow_input_layout: true,
};

pub const RASTERIZER: RasterizerDesc = RasterizerDesc {
    fill_mode: FillMode::Wireframe,
    cull_mode: CullMode::Back,
};

/// Root signature plus one pipeline state per topology type the frame draws with.
pub struct Pipeline<B: Backend> {
    pub root_signature: B::RootSignature,
    triangles: B::PipelineState,
    lines: B::PipelineState,
}

impl<B: Backend> Pipeline<B> {
    pub fn for_topology_type(&self, topology_type: TopologyType) -> &B::PipelineState {
        match topology_type {
            TopologyType::Triangle => &self.triangles,
            TopologyType::Line => &self.lines,
        }
    }
}

pub fn create_root_signature<B: Backend>(device: &B::Device) -> MyResult<B::RootSignature> {
    let blob = device.serialize_root_signature(&ROOT_SIGNATURE).map_err(|e| {
        if let Some(diagnostic) = &e.diagnostic {
            error!("Root Signature Serialization Error: {}", diagnostic.trim_end());
        }
        StartupError::RootSignatureSerialize(e)
    })?;
    let root_signature = device
        .create_root_signature(&blob)
        .map_err(StartupError::RootSignatureCreate)?;
    debug!("created root signature ({} byte blob)", blob.len());
    Ok(root_signature)
}

pub fn create_pipeline_state<B: Backend>(
    device: &B::Device,
    root_signature: &B::RootSignature,
    shaders: &ShaderPair,
    input_layout: &[InputElement],
    topology_type: TopologyType,
) -> MyResult<B::PipelineState> {
    let label = match topology_type {
        TopologyType::Triangle => "TrianglePipeline",
        TopologyType::Line => "LinePipeline",
    };
    let desc = PipelineDesc {
        root_signature,
        vertex_shader: &shaders.vertex,
        pixel_shader: &shaders.pixel,
        input_layout,
        rasterizer: RASTERIZER,
        blend_enabled: false,
        depth_enabled: false,
        topology_type,
        render_target_format: BACK_BUFFER_FORMAT,
        label,
    };
    let pipeline_state = device.create_pipeline_state(&desc).map_err(|source| {
        error!(
            "CreateGraphicsPipelineState failed with HRESULT: {}",
            source.code
        );
        StartupError::PipelineStateCreate {
            topology_type,
            source,
        }
    })?;
    debug!("created {label}");
    Ok(pipeline_state)
}

/// Root signature first, then the pipeline states; any failure aborts the whole build.
pub fn build_pipeline<B: Backend>(
    device: &B::Device,
    shaders: &ShaderPair,
    input_layout: &[InputElement],
) -> MyResult<Pipeline<B>> {
    let root_signature = create_root_signature::<B>(device)?;
    let triangles = create_pipeline_state::<B>(
        device,
        &root_signature,
        shaders,
        input_layout,
        TopologyType::Triangle,
    )?;
    let lines = create_pipeline_state::<B>(
        device,
        &root_signature,
        shaders,
        input_layout,
        TopologyType::Line,
    )?;
    Ok(Pipeline {
        root_signature,
        triangles,
        lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessBackend;
    use crate::headless::HeadlessInstance;
    use crate::headless::HeadlessOptions;
    use crate::scene::INPUT_LAYOUT;

    fn shaders() -> ShaderPair {
        ShaderPair {
            vertex: b"vs".to_vec(),
            pixel: b"ps".to_vec(),
        }
    }

    #[test]
    fn builds_one_pipeline_per_topology_type() {
        let instance = HeadlessInstance::default();
        let pipeline =
            build_pipeline::<HeadlessBackend>(&instance.device(), &shaders(), &INPUT_LAYOUT)
                .unwrap();
        let triangles = pipeline.for_topology_type(TopologyType::Triangle);
        let lines = pipeline.for_topology_type(TopologyType::Line);
        assert_eq!(triangles.topology_type(), TopologyType::Triangle);
        assert_eq!(lines.topology_type(), TopologyType::Line);
        for pso in [triangles, lines] {
            let desc = pso.desc();
            assert_eq!(desc.rasterizer.fill_mode, FillMode::Wireframe);
            assert!(!desc.blend_enabled);
            assert!(!desc.depth_enabled);
            assert_eq!(desc.input_layout.len(), 2);
        }
        assert_eq!(pipeline.root_signature.constant_buffer_registers(), &[0]);
    }

    #[test]
    fn serialization_failure_is_fatal() {
        let instance = HeadlessInstance::new(HeadlessOptions {
            fail_root_signature_serialization: true,
            ..Default::default()
        });
        let Err(report) =
            build_pipeline::<HeadlessBackend>(&instance.device(), &shaders(), &INPUT_LAYOUT)
        else {
            panic!("pipeline must not be built");
        };
        assert!(matches!(
            report.downcast_ref::<StartupError>(),
            Some(StartupError::RootSignatureSerialize(e)) if e.diagnostic.is_some()
        ));
    }

    #[test]
    fn root_signature_creation_failure_is_fatal() {
        let instance = HeadlessInstance::new(HeadlessOptions {
            fail_root_signature_creation: true,
            ..Default::default()
        });
        let Err(report) =
            build_pipeline::<HeadlessBackend>(&instance.device(), &shaders(), &INPUT_LAYOUT)
        else {
            panic!("pipeline must not be built");
        };
        assert!(matches!(
            report.downcast_ref::<StartupError>(),
            Some(StartupError::RootSignatureCreate(e)) if e.code == crate::gpu::HResult::E_INVALIDARG
        ));
        assert!(!instance
            .live_object_kinds()
            .contains(&crate::headless::ObjectKind::RootSignature));
    }

    #[test]
    fn pipeline_state_failure_carries_status_code() {
        let instance = HeadlessInstance::new(HeadlessOptions {
            fail_pipeline_state: Some(TopologyType::Line),
            ..Default::default()
        });
        let Err(report) =
            build_pipeline::<HeadlessBackend>(&instance.device(), &shaders(), &INPUT_LAYOUT)
        else {
            panic!("pipeline must not be built");
        };
        match report.downcast_ref::<StartupError>() {
            Some(StartupError::PipelineStateCreate {
                topology_type,
                source,
            }) => {
                assert_eq!(*topology_type, TopologyType::Line);
                assert_eq!(source.code, crate::gpu::HResult::E_INVALIDARG);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn empty_byte_code_is_rejected() {
        let instance = HeadlessInstance::default();
        let empty = ShaderPair {
            vertex: Vec::new(),
            pixel: b"ps".to_vec(),
        };
        assert!(
            build_pipeline::<HeadlessBackend>(&instance.device(), &empty, &INPUT_LAYOUT).is_err()
        );
    }
}
