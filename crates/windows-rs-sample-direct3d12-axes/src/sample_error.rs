use std::fmt;
use std::path::PathBuf;

use crate::gpu::BackendError;
use crate::gpu::FeatureLevel;
use crate::gpu::PrimitiveTopology;
use crate::gpu::ResourceState;
use crate::gpu::TopologyType;
use crate::recorder::FramePhase;
use crate::shader::ShaderStage;

pub type MyResult<T, E = MyReport> = core::result::Result<T, E>;

pub struct MyReport {
    inner: eyre::Report,
}

impl MyReport {
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.downcast_ref::<E>()
    }
}

impl From<eyre::Report> for MyReport {
    fn from(report: eyre::Report) -> Self {
        Self { inner: report }
    }
}

impl From<BackendError> for MyReport {
    fn from(error: BackendError) -> Self {
        Self {
            inner: eyre::Report::new(error),
        }
    }
}

impl From<StartupError> for MyReport {
    fn from(error: StartupError) -> Self {
        Self {
            inner: eyre::Report::new(error),
        }
    }
}

impl From<FrameError> for MyReport {
    fn from(error: FrameError) -> Self {
        Self {
            inner: eyre::Report::new(error),
        }
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for MyReport {
    fn from(error: windows::core::Error) -> Self {
        Self::from(BackendError::from(error))
    }
}

impl fmt::Display for MyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl fmt::Debug for MyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

/// Failures that abort renderer initialization.
#[derive(Debug)]
pub enum StartupError {
    NoSuitableAdapter {
        feature_level: FeatureLevel,
        adapters_seen: usize,
    },
    ShaderCompile {
        stage: ShaderStage,
        path: PathBuf,
        source: BackendError,
    },
    RootSignatureSerialize(BackendError),
    RootSignatureCreate(BackendError),
    PipelineStateCreate {
        topology_type: TopologyType,
        source: BackendError,
    },
    InvalidArgument {
        argument: String,
        value: String,
    },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::NoSuitableAdapter {
                feature_level,
                adapters_seen,
            } => write!(
                f,
                "no hardware adapter supports {feature_level} ({adapters_seen} adapters enumerated)"
            ),
            StartupError::ShaderCompile { stage, path, source } => write!(
                f,
                "failed to compile {stage} shader {}: {source}",
                path.display()
            ),
            StartupError::RootSignatureSerialize(source) => {
                write!(f, "failed to serialize root signature: {source}")
            }
            StartupError::RootSignatureCreate(source) => {
                write!(f, "failed to create root signature: {source}")
            }
            StartupError::PipelineStateCreate {
                topology_type,
                source,
            } => write!(
                f,
                "CreateGraphicsPipelineState failed for {topology_type:?} topology with HRESULT {}: {source}",
                source.code
            ),
            StartupError::InvalidArgument { argument, value } => {
                write!(f, "invalid value {value:?} for {argument}")
            }
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartupError::ShaderCompile { source, .. }
            | StartupError::PipelineStateCreate { source, .. }
            | StartupError::RootSignatureSerialize(source)
            | StartupError::RootSignatureCreate(source) => Some(source),
            _ => None,
        }
    }
}

/// A frame was recorded in a way the device would reject.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    OutOfOrder {
        from: FramePhase,
        to: FramePhase,
    },
    StateMismatch {
        back_buffer: u32,
        expected: ResourceState,
        actual: ResourceState,
    },
    NotRenderTarget {
        back_buffer: u32,
        state: ResourceState,
    },
    TopologyMismatch {
        topology: PrimitiveTopology,
        pipeline: Option<TopologyType>,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::OutOfOrder { from, to } => {
                write!(f, "frame phase {to:?} cannot follow {from:?}")
            }
            FrameError::StateMismatch {
                back_buffer,
                expected,
                actual,
            } => write!(
                f,
                "barrier on back buffer {back_buffer} declares {expected:?} but the buffer is in {actual:?}"
            ),
            FrameError::NotRenderTarget { back_buffer, state } => write!(
                f,
                "back buffer {back_buffer} is in {state:?}, not RenderTarget"
            ),
            FrameError::TopologyMismatch { topology, pipeline } => write!(
                f,
                "{topology:?} draw issued against pipeline of type {pipeline:?}"
            ),
        }
    }
}

impl std::error::Error for FrameError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HResult;

    #[test]
    fn report_downcasts_to_startup_error() {
        let report = MyReport::from(StartupError::RootSignatureCreate(BackendError::new(
            HResult::E_INVALIDARG,
            "CreateRootSignature failed",
        )));
        assert!(matches!(
            report.downcast_ref::<StartupError>(),
            Some(StartupError::RootSignatureCreate(_))
        ));
        assert!(report.downcast_ref::<FrameError>().is_none());
    }

    #[test]
    fn pipeline_error_mentions_status_code() {
        let error = StartupError::PipelineStateCreate {
            topology_type: TopologyType::Line,
            source: BackendError::new(HResult::E_INVALIDARG, "invalid input layout"),
        };
        assert!(error.to_string().contains("0x80070057"));
    }
}
