//! Error types, each mapping onto a wire status code

use badge_proto::ErrorKind;

use crate::update::Slot;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("timed out waiting for data")]
    Timeout,
    #[error("peer disconnected")]
    Disconnected,
    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Timeout | TransportError::Disconnected => ErrorKind::NoConnection,
            TransportError::Io(_) => ErrorKind::TransRecvFailed,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FlashError {
    #[error("write of {len} bytes at {offset} exceeds slot capacity {capacity}")]
    OutOfBounds { offset: usize, len: usize, capacity: usize },
    #[error("slot {0:?} holds the running image")]
    RunningSlot(Slot),
    #[error("flash i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("boot selector: {0}")]
    Selector(#[from] serde_json::Error),
}

impl FlashError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlashError::OutOfBounds { .. } => ErrorKind::DataTooLong,
            FlashError::RunningSlot(_) => ErrorKind::InvalidParam,
            FlashError::Io(_) | FlashError::Selector(_) => ErrorKind::WriteFileFailed,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("storage i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("update public key: {0}")]
    InvalidKey(String),
    #[error("{0}")]
    Invalid(String),
}

/// Failure reported by a command handler
#[derive(thiserror::Error, Debug)]
#[error("{kind}: {message}")]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CommandError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParam, message)
    }
}

impl From<TransportError> for CommandError {
    fn from(e: TransportError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<UpdateRejected> for CommandError {
    fn from(e: UpdateRejected) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

/// Reasons an update request is refused before any flash is touched
#[derive(thiserror::Error, Debug)]
pub enum UpdateRejected {
    #[error("an update is already in progress")]
    Busy,
    #[error("bad update magic 0x{0:08x}")]
    BadMagic(u32),
    #[error("update image is empty")]
    EmptyImage,
    #[error("image of {size} bytes does not fit the {capacity} byte update slot")]
    TooLarge { size: usize, capacity: usize },
    #[error("image built for hardware {got:?}, this badge is {expected:?}")]
    HardwareMismatch { expected: String, got: String },
    #[error("no update public key configured")]
    NoKey,
    #[error("failed to start update worker: {0}")]
    Spawn(std::io::Error),
}

impl UpdateRejected {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdateRejected::Busy | UpdateRejected::Spawn(_) => ErrorKind::ActionFailed,
            UpdateRejected::BadMagic(_)
            | UpdateRejected::EmptyImage
            | UpdateRejected::HardwareMismatch { .. } => ErrorKind::InvalidParam,
            UpdateRejected::TooLarge { .. } => ErrorKind::DataTooLong,
            UpdateRejected::NoKey => ErrorKind::NotInitialized,
        }
    }
}

/// Terminal failure of an update attempt
#[derive(thiserror::Error, Debug)]
pub enum UpdateFailure {
    #[error("download: {0}")]
    Transport(#[from] TransportError),
    #[error("flash: {0}")]
    Flash(#[from] FlashError),
    #[error("image checksum does not match header")]
    ChecksumMismatch,
    #[error("image signature rejected")]
    BadSignature,
}

impl UpdateFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdateFailure::Transport(e) => e.kind(),
            UpdateFailure::Flash(e) => e.kind(),
            UpdateFailure::ChecksumMismatch => ErrorKind::CorruptedData,
            UpdateFailure::BadSignature => ErrorKind::ActionFailed,
        }
    }
}
