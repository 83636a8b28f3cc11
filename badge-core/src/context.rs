//! Device-wide context, built once at startup and borrowed everywhere

use std::time::Duration;

use ed25519_dalek::VerifyingKey;

use crate::config::DeviceConfig;
use crate::error::ConfigError;
use crate::update::UpdatePolicy;

#[derive(Debug, Clone)]
pub struct HardwareInfo {
    pub revision: String,
    pub firmware_version: String,
}

#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub hardware: HardwareInfo,
    pub config: DeviceConfig,
    pub update_key: Option<VerifyingKey>,
}

impl DeviceContext {
    pub fn new(config: DeviceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let update_key = config.update_key()?;
        Ok(Self {
            hardware: HardwareInfo {
                revision: config.hardware_revision.clone(),
                firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            config,
            update_key,
        })
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy {
            hardware: self.hardware.revision.clone(),
            key: self.update_key,
            chunk_size: self.config.chunk_size,
            chunk_timeout: self.config.chunk_timeout(),
        }
    }

    /// How long the main loop waits for bytes on each poll
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(20)
    }
}
