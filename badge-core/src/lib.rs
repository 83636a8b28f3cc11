//! EConBadge firmware core
//!
//! Turns bytes arriving over a connection-oriented transport into executed
//! commands, and replaces the running firmware through a staged, verified
//! update that never touches the bootable image.
//!
//! The pieces, bottom up:
//!
//! - [`transport`]: traits a link backend implements, plus an in-memory pair
//! - [`codec`]: fixed-size request frames assembled across polls
//! - [`dispatch`] and [`handlers`]: command table and built-in commands
//! - [`update`]: Download, Verify, Apply on a background worker
//! - [`service`]: the main loop gluing it together with state and storage

pub mod codec;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod service;
pub mod state;
pub mod storage;
pub mod transport;
pub mod update;

pub use badge_proto as proto;
pub use config::DeviceConfig;
pub use context::{DeviceContext, HardwareInfo};
pub use dispatch::{CommandContext, Dispatcher, Origin, Reply};
pub use error::{CommandError, ConfigError, FlashError, StorageError, TransportError, UpdateFailure, UpdateRejected};
pub use service::{Event, Service};
pub use state::SystemState;
pub use storage::{JsonFileStorage, MemoryStorage, Storage};
pub use transport::{ByteSource, Detached, Transport};
pub use update::{BootRecord, FlashStore, Slot, UpdateManager};
