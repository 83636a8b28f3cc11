//! Persistent storage for the system state

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::StorageError;
use crate::state::SystemState;

/// Non-volatile home of the system state.
///
/// The badge keeps it in NVS; the host build keeps a JSON file.
pub trait Storage: Send {
    /// Saved state, or `None` on first boot
    fn load_state(&self) -> Result<Option<SystemState>, StorageError>;

    fn save_state(&mut self, state: &SystemState) -> Result<(), StorageError>;
}

/// State file in the badge home directory
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Storage for JsonFileStorage {
    fn load_state(&self) -> Result<Option<SystemState>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn save_state(&mut self, state: &SystemState) -> Result<(), StorageError> {
        let data = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Volatile storage; clones share the saved state
#[derive(Clone, Default)]
pub struct MemoryStorage {
    saved: Arc<Mutex<Option<SystemState>>>,
}

impl MemoryStorage {
    pub fn saved(&self) -> Option<SystemState> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Storage for MemoryStorage {
    fn load_state(&self) -> Result<Option<SystemState>, StorageError> {
        Ok(self.saved())
    }

    fn save_state(&mut self, state: &SystemState) -> Result<(), StorageError> {
        *self.saved.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_file_survives_reload() {
        let home = tempfile::tempdir().unwrap();
        let path = home.path().join("state.json");
        let mut storage = JsonFileStorage::new(path.clone());
        assert!(storage.load_state().unwrap().is_none());

        let mut state = SystemState::default();
        state.owner = "Grace".to_string();
        state.led.brightness = 42;
        storage.save_state(&state).unwrap();

        let reloaded = JsonFileStorage::new(path).load_state().unwrap().unwrap();
        assert_eq!(reloaded, state);
    }

    #[test]
    fn corrupt_state_file_is_an_error() {
        let home = tempfile::tempdir().unwrap();
        let path = home.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonFileStorage::new(path).load_state(),
            Err(StorageError::Json(_))
        ));
    }
}
