//! Content-addressed AOT artifact cache.
//!
//! Artifacts live at `<dir>/<key>.cwasm`, where `key` is derived from a
//! SHA-256 digest of the guest bytecode. Identical bytecode always maps to
//! the same path, so independent processes converge on one artifact without
//! coordination. Entries are never invalidated; a readable file at the
//! derived path is a cache hit.
//!
//! [`CompilationCache::for_engine`] nests the directory under the engine's
//! fingerprint so an artifact is only ever loaded by a compatible engine.

use std::fmt;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use wasm_bridge_common::BridgeError;

use crate::WasmEngine;

/// File extension of compiled artifacts.
pub const ARTIFACT_EXTENSION: &str = "cwasm";

/// Produces a native artifact from guest bytecode.
pub trait ArtifactCompiler {
    /// Compile `bytecode`, returning the artifact bytes.
    fn compile(&self, bytecode: &[u8]) -> Result<Vec<u8>, BridgeError>;
}

/// 64-bit content hash of a bytecode buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

impl CacheKey {
    /// The raw hash value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Directory of compiled artifacts keyed by bytecode content.
#[derive(Debug, Clone)]
pub struct CompilationCache {
    dir: PathBuf,
}

impl CompilationCache {
    /// Create a cache rooted at `dir`.
    ///
    /// The directory is created lazily on the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create a cache for artifacts produced by `engine`.
    pub fn for_engine(base: impl AsRef<Path>, engine: &WasmEngine) -> Self {
        Self::new(
            base.as_ref()
                .join(format!("{:016x}", engine.fingerprint())),
        )
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Hash a bytecode buffer.
    pub fn key_of(bytecode: &[u8]) -> CacheKey {
        let digest = Sha256::digest(bytecode);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        CacheKey(u64::from_be_bytes(prefix))
    }

    /// Path of the artifact for `key`.
    pub fn path_for(&self, key: CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.{ARTIFACT_EXTENSION}"))
    }

    /// Returns `true` if a readable regular file exists at `path`.
    pub fn is_cached(path: &Path) -> bool {
        path.is_file() && File::open(path).is_ok()
    }

    /// Compile `bytecode` into the cache, unless an artifact already exists.
    ///
    /// Returns the artifact path.
    #[instrument(skip(self, bytecode, compiler), fields(bytes_len = bytecode.len()))]
    pub fn store<C>(&self, bytecode: &[u8], compiler: &C) -> Result<PathBuf, BridgeError>
    where
        C: ArtifactCompiler + ?Sized,
    {
        let key = Self::key_of(bytecode);
        let path = self.path_for(key);

        if Self::is_cached(&path) {
            debug!(%key, path = %path.display(), "Artifact cache hit");
            return Ok(path);
        }

        let artifact = compiler.compile(bytecode)?;
        self.write_artifact(&path, &artifact)?;

        info!(
            %key,
            path = %path.display(),
            artifact_len = artifact.len(),
            "Artifact compiled and cached"
        );
        Ok(path)
    }

    /// Write `bytes` into the cache as-is, keyed by their own content.
    ///
    /// Used for buffers that are already compiled objects.
    #[instrument(skip(self, bytes), fields(bytes_len = bytes.len()))]
    pub fn dump(&self, bytes: &[u8]) -> Result<PathBuf, BridgeError> {
        let key = Self::key_of(bytes);
        let path = self.path_for(key);

        if Self::is_cached(&path) {
            debug!(%key, path = %path.display(), "Dumped artifact already present");
            return Ok(path);
        }

        self.write_artifact(&path, bytes)?;
        debug!(%key, path = %path.display(), "Artifact dumped");
        Ok(path)
    }

    /// Atomically write `bytes` to `path`.
    ///
    /// The bytes go to a temporary sibling first and are renamed into place,
    /// so readers never observe a partial artifact.
    pub fn write_artifact(&self, path: &Path, bytes: &[u8]) -> Result<(), BridgeError> {
        static WRITE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BridgeError::cache_io(parent, e))?;
        }

        let sequence = WRITE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!(
            "{ARTIFACT_EXTENSION}.tmp-{}-{sequence}",
            std::process::id()
        ));

        fs::write(&tmp_path, bytes).map_err(|e| BridgeError::cache_io(&tmp_path, e))?;

        match fs::rename(&tmp_path, path) {
            Ok(()) => Ok(()),
            // Another writer won the race with identical content.
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&tmp_path);
                Ok(())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to move artifact into place");
                let _ = fs::remove_file(&tmp_path);
                Err(BridgeError::cache_io(path, e))
            }
        }
    }
}
