//! WASI preview1 environment construction.

use tracing::debug;
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use wasm_bridge_common::{BridgeError, VmOptions, WasiError};

/// Build the WASI context a guest sees from the VM options.
///
/// The guest inherits the host's stdio, gets `args` and `env` verbatim, and
/// has each preopen mapped from its host directory to its guest path with
/// full permissions.
///
/// # Errors
///
/// Returns [`WasiError::PreopenFailed`] if a host directory cannot be opened.
pub fn build_wasi_context(options: &VmOptions) -> Result<WasiP1Ctx, BridgeError> {
    let mut builder = WasiCtxBuilder::new();
    builder
        .inherit_stdio()
        .args(&options.args)
        .envs(&options.env_pairs());

    for (guest_path, host_path) in &options.preopens {
        builder
            .preopened_dir(host_path, guest_path, DirPerms::all(), FilePerms::all())
            .map_err(|e| WasiError::PreopenFailed {
                guest_path: guest_path.clone(),
                host_path: host_path.clone(),
                reason: format!("{e:#}"),
            })?;
        debug!(guest_path = %guest_path, host_path = %host_path, "Directory preopened");
    }

    Ok(builder.build_p1())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        assert!(build_wasi_context(&VmOptions::default()).is_ok());
    }

    #[test]
    fn test_preopen_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = VmOptions::default();
        options
            .preopens
            .insert("/data".into(), dir.path().display().to_string());

        assert!(build_wasi_context(&options).is_ok());
    }

    #[test]
    fn test_preopen_missing_dir() {
        let mut options = VmOptions::default();
        options
            .preopens
            .insert("/data".into(), "/nonexistent/wasm-bridge".into());

        let err = build_wasi_context(&options).err().unwrap();
        assert!(matches!(
            err,
            BridgeError::Wasi(WasiError::PreopenFailed { ref guest_path, .. }) if guest_path == "/data"
        ));
    }
}
