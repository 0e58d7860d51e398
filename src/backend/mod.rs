//! Fingerprint storage (spec §5): persists each tracked object's last-known
//! `compare()` result so a later run can decide whether it changed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use thiserror::Error;

use crate::tracked::CompareToken;

pub const ENV_VAR: &str = "ANADAMA_BACKEND_DIR";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode fingerprint: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait FingerprintBackend: Send + Sync {
    fn lookup(&self, key: &str) -> Result<Option<Vec<CompareToken>>, BackendError>;
    fn save(&self, key: &str, compare: &[CompareToken]) -> Result<(), BackendError>;
    fn remove(&self, key: &str) -> Result<(), BackendError>;
}

/// `sled`-backed default, matching dagrs's reach for an embedded store
/// wherever it needs durable key/value bookkeeping.
pub struct SledBackend {
    tree: sled::Db,
}

impl SledBackend {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, BackendError> {
        Ok(Self { tree: sled::open(dir.into())? })
    }
}

impl FingerprintBackend for SledBackend {
    fn lookup(&self, key: &str) -> Result<Option<Vec<CompareToken>>, BackendError> {
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, key: &str, compare: &[CompareToken]) -> Result<(), BackendError> {
        let bytes = serde_json::to_vec(compare)?;
        self.tree.insert(key, bytes)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.tree.remove(key)?;
        Ok(())
    }
}

/// In-process backend for tests and `--dry-run`-adjacent tooling that should
/// not touch disk.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Vec<CompareToken>>>,
}

impl FingerprintBackend for MemoryBackend {
    fn lookup(&self, key: &str) -> Result<Option<Vec<CompareToken>>, BackendError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn save(&self, key: &str, compare: &[CompareToken]) -> Result<(), BackendError> {
        self.entries.lock().unwrap().insert(key.to_string(), compare.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

pub fn memory_backend() -> Arc<dyn FingerprintBackend> {
    Arc::new(MemoryBackend::default())
}

static DEFAULT: OnceCell<Arc<dyn FingerprintBackend>> = OnceCell::new();

/// The store directory used when `ANADAMA_BACKEND_DIR` is unset: the user's
/// data directory if one can be resolved, else `.anadama/backend` relative to
/// the current directory.
fn default_backend_dir() -> PathBuf {
    dirs::data_dir().map(|d| d.join("anadama").join("backend")).unwrap_or_else(|| PathBuf::from(".anadama/backend"))
}

/// Lazily opens the `sled` store named by `ANADAMA_BACKEND_DIR` (falling back
/// to [`default_backend_dir`]), shared across callers within the process.
pub fn default_backend() -> Arc<dyn FingerprintBackend> {
    DEFAULT
        .get_or_init(|| {
            let dir = std::env::var_os(ENV_VAR).map(PathBuf::from).unwrap_or_else(default_backend_dir);
            match SledBackend::open(dir) {
                Ok(backend) => Arc::new(backend),
                Err(e) => {
                    log::warn!("falling back to an in-memory backend: {e}");
                    memory_backend()
                }
            }
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_roundtrips() {
        let backend = MemoryBackend::default();
        assert_eq!(backend.lookup("a").unwrap(), None);
        backend.save("a", &[CompareToken::Size(3)]).unwrap();
        assert_eq!(backend.lookup("a").unwrap(), Some(vec![CompareToken::Size(3)]));
        backend.remove("a").unwrap();
        assert_eq!(backend.lookup("a").unwrap(), None);
    }
}
