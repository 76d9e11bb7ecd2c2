use std::path::Path;

use crate::gpu::BackendError;
use crate::gpu::HResult;
use crate::gpu::ShaderCompiler;

/// Checks what fxc would check before code generation: the file exists and
/// declares the entry point. The "byte code" is the source tagged with its target.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessCompiler;

impl ShaderCompiler for HeadlessCompiler {
    fn compile_from_file(
        &self,
        path: &Path,
        entry_point: &str,
        target: &str,
        _debug: bool,
    ) -> Result<Vec<u8>, BackendError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            BackendError::new(HResult::E_FILE_NOT_FOUND, "D3DCompileFromFile failed")
                .with_diagnostic(format!("{}: {e}", path.display()))
        })?;

        if !(target.starts_with("vs_") || target.starts_with("ps_")) {
            return Err(BackendError::new(HResult::E_FAIL, "D3DCompileFromFile failed")
                .with_diagnostic(format!("error X3523: invalid target '{target}'")));
        }

        let declares_entry = source
            .match_indices(entry_point)
            .any(|(at, _)| source[at + entry_point.len()..].trim_start().starts_with('('));
        if !declares_entry {
            return Err(BackendError::new(HResult::E_FAIL, "D3DCompileFromFile failed")
                .with_diagnostic(format!(
                    "{}: error X3501: '{entry_point}': entrypoint not found",
                    path.display()
                )));
        }

        let mut byte_code = format!("DXBC:{target}:").into_bytes();
        byte_code.extend_from_slice(source.as_bytes());
        Ok(byte_code)
    }
}
