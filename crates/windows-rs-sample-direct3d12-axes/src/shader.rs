use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::gpu::ShaderCompiler;
use crate::sample_error::MyResult;
use crate::sample_error::StartupError;

pub const SHADER_DIR: &str = "assets/shaders";
pub const ENTRY_POINT: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

impl ShaderStage {
    pub const fn target(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs_5_0",
            ShaderStage::Pixel => "ps_5_0",
        }
    }

    pub const fn file_suffix(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Pixel => "pixel",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_suffix())
    }
}

/// `assets/shaders/<name>_<stage>.hlsl`, relative to `root`.
pub fn shader_path(root: &Path, name: &str, stage: ShaderStage) -> PathBuf {
    root.join(SHADER_DIR)
        .join(format!("{name}_{}.hlsl", stage.file_suffix()))
}

/// Looks next to the working directory first, then inside this crate.
pub fn resolve_shader_path(name: &str, stage: ShaderStage) -> PathBuf {
    let relative = shader_path(Path::new(""), name, stage);
    if relative.exists() {
        return relative;
    }
    let fallback = shader_path(Path::new(env!("CARGO_MANIFEST_DIR")), name, stage);
    if fallback.exists() {
        debug!(
            "{} not found in working directory, using {}",
            relative.display(),
            fallback.display()
        );
    } else {
        warn!("shader source {} not found", relative.display());
    }
    fallback
}

/// Compiled vertex and pixel byte code for one shader name.
pub struct ShaderPair {
    pub vertex: Vec<u8>,
    pub pixel: Vec<u8>,
}

pub fn compile_stage(
    compiler: &impl ShaderCompiler,
    path: &Path,
    stage: ShaderStage,
) -> MyResult<Vec<u8>> {
    let debug = cfg!(debug_assertions);
    compiler
        .compile_from_file(path, ENTRY_POINT, stage.target(), debug)
        .map_err(|source| {
            if let Some(diagnostic) = &source.diagnostic {
                error!(
                    "Shader Compile Error ({ENTRY_POINT} {}): {}",
                    stage.target(),
                    diagnostic.trim_end()
                );
                write_debug_output(diagnostic);
            }
            StartupError::ShaderCompile {
                stage,
                path: path.to_path_buf(),
                source,
            }
            .into()
        })
}

pub fn load_shader_pair(compiler: &impl ShaderCompiler, name: &str) -> MyResult<ShaderPair> {
    let vertex = compile_stage(
        compiler,
        &resolve_shader_path(name, ShaderStage::Vertex),
        ShaderStage::Vertex,
    )?;
    let pixel = compile_stage(
        compiler,
        &resolve_shader_path(name, ShaderStage::Pixel),
        ShaderStage::Pixel,
    )?;
    debug!(
        "compiled {name} shaders ({} + {} bytes)",
        vertex.len(),
        pixel.len()
    );
    Ok(ShaderPair { vertex, pixel })
}

#[cfg(windows)]
fn write_debug_output(text: &str) {
    use windows::core::PCSTR;
    use windows::Win32::System::Diagnostics::Debug::OutputDebugStringA;

    let mut bytes = text.as_bytes().to_vec();
    bytes.retain(|b| *b != 0);
    bytes.push(0);
    unsafe { OutputDebugStringA(PCSTR(bytes.as_ptr())) };
}

#[cfg(not(windows))]
fn write_debug_output(text: &str) {
    debug!(target: "debug_output", "{}", text.trim_end());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::BackendError;
    use crate::gpu::HResult;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingCompiler {
        calls: RefCell<Vec<(PathBuf, String, String)>>,
        fail_target: Option<&'static str>,
    }

    impl ShaderCompiler for RecordingCompiler {
        fn compile_from_file(
            &self,
            path: &Path,
            entry_point: &str,
            target: &str,
            _debug: bool,
        ) -> Result<Vec<u8>, BackendError> {
            self.calls
                .borrow_mut()
                .push((path.to_path_buf(), entry_point.into(), target.into()));
            if self.fail_target == Some(target) {
                return Err(BackendError::new(HResult::E_FAIL, "D3DCompileFromFile failed")
                    .with_diagnostic("error X3501: 'main': entrypoint not found"));
            }
            Ok(target.as_bytes().to_vec())
        }
    }

    #[test]
    fn paths_follow_asset_convention() {
        assert_eq!(
            shader_path(Path::new("root"), "vcolors", ShaderStage::Vertex),
            Path::new("root/assets/shaders/vcolors_vertex.hlsl")
        );
        assert_eq!(
            shader_path(Path::new(""), "vcolors", ShaderStage::Pixel),
            Path::new("assets/shaders/vcolors_pixel.hlsl")
        );
    }

    #[test]
    fn bundled_shaders_resolve() {
        assert!(resolve_shader_path("vcolors", ShaderStage::Vertex).exists());
        assert!(resolve_shader_path("vcolors", ShaderStage::Pixel).exists());
    }

    #[test]
    fn pair_compiles_both_stages_with_main_entry() {
        let compiler = RecordingCompiler::default();
        let pair = load_shader_pair(&compiler, "vcolors").unwrap();
        assert_eq!(pair.vertex, b"vs_5_0");
        assert_eq!(pair.pixel, b"ps_5_0");
        let calls = compiler.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(_, entry, _)| entry == "main"));
        assert!(calls[0].0.ends_with("vcolors_vertex.hlsl"));
    }

    #[test]
    fn compile_failure_is_a_startup_error_carrying_the_diagnostic() {
        let compiler = RecordingCompiler {
            fail_target: Some("ps_5_0"),
            ..Default::default()
        };
        let Err(report) = load_shader_pair(&compiler, "vcolors") else {
            panic!("pixel shader failure must abort");
        };
        match report.downcast_ref::<StartupError>() {
            Some(StartupError::ShaderCompile { stage, source, .. }) => {
                assert_eq!(*stage, ShaderStage::Pixel);
                assert!(source.diagnostic.as_deref().unwrap().contains("X3501"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
