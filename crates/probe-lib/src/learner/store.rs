//! Durable storage for the model state
//!
//! The on-disk file is a JSON envelope holding the serialized model and its
//! SHA256 checksum. Writes go to a temp file that is synced and renamed over
//! the previous version, so a crash never leaves a half-written model.

use super::ModelState;
use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const ENVELOPE_VERSION: u32 = 1;

/// Load/save contract used by the learner at startup and after training
pub trait ModelStore: Send + Sync {
    /// Returns `Ok(None)` when no model has been saved yet
    fn load(&self) -> Result<Option<ModelState>, PersistenceError>;

    fn save(&self, state: &ModelState) -> Result<(), PersistenceError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelEnvelope {
    version: u32,
    saved_at: DateTime<Utc>,
    checksum: String,
    model: String,
}

/// Model store backed by a single JSON file
#[derive(Debug, Clone)]
pub struct FileModelStore {
    path: PathBuf,
}

impl FileModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn corrupt(&self, reason: impl Into<String>) -> PersistenceError {
        PersistenceError::Corrupt {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn write_atomically(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;

        fs::rename(&temp_path, &self.path)
    }
}

impl ModelStore for FileModelStore {
    fn load(&self) -> Result<Option<ModelState>, PersistenceError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let envelope: ModelEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| self.corrupt(format!("unreadable envelope: {}", e)))?;

        if envelope.version != ENVELOPE_VERSION {
            return Err(self.corrupt(format!("unsupported version {}", envelope.version)));
        }

        let computed = compute_checksum(envelope.model.as_bytes());
        if computed != envelope.checksum {
            return Err(self.corrupt(format!(
                "checksum mismatch: expected {}, got {}",
                envelope.checksum, computed
            )));
        }

        let state: ModelState = serde_json::from_str(&envelope.model)
            .map_err(|e| self.corrupt(format!("unreadable model: {}", e)))?;
        state.validate().map_err(|reason| self.corrupt(reason))?;

        debug!(
            path = %self.path.display(),
            sample_count = state.sample_count(),
            "Loaded model from disk"
        );

        Ok(Some(state))
    }

    fn save(&self, state: &ModelState) -> Result<(), PersistenceError> {
        let model = serde_json::to_string(state)?;
        let envelope = ModelEnvelope {
            version: ENVELOPE_VERSION,
            saved_at: Utc::now(),
            checksum: compute_checksum(model.as_bytes()),
            model,
        };
        let bytes = serde_json::to_vec(&envelope)?;

        self.write_atomically(&bytes)
            .map_err(|source| PersistenceError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

/// Compute SHA256 checksum of data
fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
