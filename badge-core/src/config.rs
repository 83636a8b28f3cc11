//! Device configuration, kept as JSON in the badge home directory

use std::path::Path;
use std::time::Duration;

use ed25519_dalek::VerifyingKey;
use log::*;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hardware tag update images must match
    pub hardware_revision: String,
    pub listen_addr: String,
    /// Hex encoded Ed25519 key update signatures are checked against
    pub update_public_key: Option<String>,
    /// Reject remote commands whose token does not match
    pub require_token: bool,
    pub chunk_size: usize,
    pub request_timeout_ms: u64,
    pub chunk_timeout_ms: u64,
    pub idle_timeout_secs: u64,
    pub restart_delay_ms: u64,
    /// Size of one firmware slot
    pub slot_capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            hardware_revision: "ECB_V1".to_string(),
            listen_addr: "127.0.0.1:7600".to_string(),
            update_public_key: None,
            require_token: true,
            chunk_size: 4096,
            request_timeout_ms: 5000,
            chunk_timeout_ms: 5000,
            idle_timeout_secs: 120,
            restart_delay_ms: 2000,
            slot_capacity: 4 * 1024 * 1024,
        }
    }
}

impl DeviceConfig {
    /// Load `config.json` from `home`, writing the defaults if it is missing
    pub fn load_or_init(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join(CONFIG_FILE);
        if !path.exists() {
            let config = Self::default();
            std::fs::write(&path, serde_json::to_string_pretty(&config)?)?;
            info!("wrote default config to {}", path.display());
            return Ok(config);
        }

        let config: Self = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, home: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        std::fs::write(home.join(CONFIG_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".to_string()));
        }
        if self.hardware_revision.is_empty() || self.hardware_revision.len() > badge_proto::update::HW_TAG_SIZE {
            return Err(ConfigError::Invalid(
                "hardware_revision must be 1 to 16 bytes".to_string(),
            ));
        }
        self.update_key()?;
        Ok(())
    }

    pub fn update_key(&self) -> Result<Option<VerifyingKey>, ConfigError> {
        let Some(hex) = &self.update_public_key else {
            return Ok(None);
        };
        let bytes = data_encoding::HEXLOWER_PERMISSIVE
            .decode(hex.trim().as_bytes())
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ConfigError::InvalidKey("expected 32 bytes".to_string()))?;
        VerifyingKey::from_bytes(&bytes)
            .map(Some)
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}
