//! Online regression model and its single owner
//!
//! This module provides:
//! - The latency regression network and its optimizer state
//! - A learner task that serializes every predict/train call
//! - Checksummed on-disk persistence of the model

mod actor;
mod model;
mod store;

pub use actor::{Learner, LearnerConfig, TrainOutcome};
pub use model::{Hyperparameters, ModelState, DEFAULT_INPUT_SCALE, HIDDEN_UNITS};
pub use store::{FileModelStore, ModelStore};

use crate::error::PersistenceError;
use tracing::info;

/// Load the saved model, or initialize a fresh one when none exists.
///
/// A model file that exists but cannot be read or verified is an error; the
/// caller must not fall back to a fresh model in that case.
pub fn load_or_initialize(
    store: &dyn ModelStore,
    seed: u64,
) -> Result<(ModelState, bool), PersistenceError> {
    match store.load()? {
        Some(state) => {
            info!(sample_count = state.sample_count(), "Model loaded from disk");
            Ok((state, true))
        }
        None => {
            info!(seed = seed, "No saved model, initialized a new one");
            Ok((ModelState::initialize(seed), false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_or_initialize_fresh() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileModelStore::new(temp_dir.path().join("model.json"));

        let (state, loaded) = load_or_initialize(&store, 9).unwrap();
        assert!(!loaded);
        assert_eq!(state, ModelState::initialize(9));
    }

    #[test]
    fn test_load_or_initialize_existing() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileModelStore::new(temp_dir.path().join("model.json"));
        let mut saved = ModelState::initialize(1);
        saved.train(10.0, 0.1, &Hyperparameters::default());
        store.save(&saved).unwrap();

        let (state, loaded) = load_or_initialize(&store, 9).unwrap();
        assert!(loaded);
        assert_eq!(state.sample_count(), 1);
    }

    #[test]
    fn test_load_or_initialize_refuses_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.json");
        std::fs::write(&path, b"{\"version\":1}").unwrap();

        let store = FileModelStore::new(path);
        assert!(load_or_initialize(&store, 9).is_err());
    }
}
