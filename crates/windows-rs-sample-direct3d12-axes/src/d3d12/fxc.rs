use std::ffi::CString;
use std::path::Path;

use windows::core::HSTRING;
use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D::Fxc::*;

use super::blob_bytes;
use super::blob_text;
use crate::gpu::BackendError;
use crate::gpu::HResult;
use crate::gpu::ShaderCompiler;

/// `D3DCompileFromFile`, the legacy FXC compiler shipped with Windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct FxcCompiler;

fn c_string(value: &str) -> Result<CString, BackendError> {
    CString::new(value).map_err(|_| {
        BackendError::new(
            HResult::E_INVALIDARG,
            format!("{value:?} contains an interior NUL"),
        )
    })
}

impl ShaderCompiler for FxcCompiler {
    fn compile_from_file(
        &self,
        path: &Path,
        entry_point: &str,
        target: &str,
        debug: bool,
    ) -> Result<Vec<u8>, BackendError> {
        let flags = if debug {
            D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
        } else {
            0
        };
        let file_name = HSTRING::from(path.as_os_str());
        let entry_point = c_string(entry_point)?;
        let target = c_string(target)?;

        let mut shader_blob = None;
        let mut error_blob = None;
        let result = unsafe {
            D3DCompileFromFile(
                &file_name,
                None,
                None,
                PCSTR(entry_point.as_ptr() as *const u8),
                PCSTR(target.as_ptr() as *const u8),
                flags,
                0,
                &mut shader_blob,
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
        match shader_blob {
            Some(blob) => Ok(blob_bytes(&blob).to_vec()),
            None => Err(BackendError::new(
                HResult::E_FAIL,
                "D3DCompileFromFile produced no bytecode",
            )),
        }
    }
}
