//! Status codes carried in the first word of every response frame

use std::fmt;

/// Result of a command, as seen on the wire.
///
/// The numeric values are fixed: peers in the field decode them by number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorKind {
    NoError = 0,
    InvalidParam = 1,
    ActionFailed = 2,
    NotInitialized = 3,
    NoAction = 4,
    InvalidToken = 5,
    InvalidCommandSize = 6,
    FileNotFound = 7,
    NoMoreMemory = 8,
    InvalidCommandReq = 9,
    MaxCommandReached = 10,
    ImgNameUpdateFail = 11,
    OpenFileFailed = 12,
    WriteFileFailed = 13,
    ReadFileFailed = 14,
    TransSendFailed = 15,
    TransRecvFailed = 16,
    DataTooLong = 17,
    CorruptedData = 18,
    InvalidIndex = 19,
    OverlappingPatterns = 20,
    NoConnection = 21,
}

impl ErrorKind {
    pub fn is_ok(self) -> bool {
        self == ErrorKind::NoError
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NoError => "no error",
            ErrorKind::InvalidParam => "invalid parameter",
            ErrorKind::ActionFailed => "action failed",
            ErrorKind::NotInitialized => "not initialized",
            ErrorKind::NoAction => "no action",
            ErrorKind::InvalidToken => "invalid token",
            ErrorKind::InvalidCommandSize => "invalid command size",
            ErrorKind::FileNotFound => "file not found",
            ErrorKind::NoMoreMemory => "no more memory",
            ErrorKind::InvalidCommandReq => "invalid command request",
            ErrorKind::MaxCommandReached => "command queue full",
            ErrorKind::ImgNameUpdateFail => "image name update failed",
            ErrorKind::OpenFileFailed => "open file failed",
            ErrorKind::WriteFileFailed => "write file failed",
            ErrorKind::ReadFileFailed => "read file failed",
            ErrorKind::TransSendFailed => "transport send failed",
            ErrorKind::TransRecvFailed => "transport receive failed",
            ErrorKind::DataTooLong => "data too long",
            ErrorKind::CorruptedData => "corrupted data",
            ErrorKind::InvalidIndex => "invalid index",
            ErrorKind::OverlappingPatterns => "overlapping patterns",
            ErrorKind::NoConnection => "no connection",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u32> for ErrorKind {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        Ok(match value {
            0 => ErrorKind::NoError,
            1 => ErrorKind::InvalidParam,
            2 => ErrorKind::ActionFailed,
            3 => ErrorKind::NotInitialized,
            4 => ErrorKind::NoAction,
            5 => ErrorKind::InvalidToken,
            6 => ErrorKind::InvalidCommandSize,
            7 => ErrorKind::FileNotFound,
            8 => ErrorKind::NoMoreMemory,
            9 => ErrorKind::InvalidCommandReq,
            10 => ErrorKind::MaxCommandReached,
            11 => ErrorKind::ImgNameUpdateFail,
            12 => ErrorKind::OpenFileFailed,
            13 => ErrorKind::WriteFileFailed,
            14 => ErrorKind::ReadFileFailed,
            15 => ErrorKind::TransSendFailed,
            16 => ErrorKind::TransRecvFailed,
            17 => ErrorKind::DataTooLong,
            18 => ErrorKind::CorruptedData,
            19 => ErrorKind::InvalidIndex,
            20 => ErrorKind::OverlappingPatterns,
            21 => ErrorKind::NoConnection,
            other => return Err(other),
        })
    }
}

/// Bounded command identifiers understood by the badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandId {
    Ping = 0,
    SetToken = 1,
    EinkClear = 2,
    EinkNewImage = 3,
    EinkRemoveImage = 4,
    EinkSelectImage = 5,
    EinkGetCurrentImgName = 6,
    EinkGetCurrentImg = 7,
    FactoryReset = 8,
    SetOwner = 9,
    SetContact = 10,
    GetOwner = 11,
    GetContact = 12,
    FirmwareUpdate = 13,
    LedBorderSetEnable = 14,
    LedBorderGetEnable = 15,
    LedBorderIncBrightness = 16,
    LedBorderDecBrightness = 17,
    LedBorderSetBrightness = 18,
    LedBorderGetBrightness = 19,
    LedBorderClear = 20,
    LedBorderAddPattern = 21,
    LedBorderRemovePattern = 22,
    LedBorderClearPatterns = 23,
    LedBorderGetPatterns = 24,
    LedBorderAddAnimation = 25,
    LedBorderRemoveAnimation = 26,
    LedBorderClearAnimations = 27,
    LedBorderGetAnimations = 28,
    UpdateStatus = 29,
}

/// First identifier that is not routable.
pub const MAX_COMMAND_ID: u32 = 30;

impl CommandId {
    pub fn id(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for CommandId {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        use CommandId::*;
        Ok(match value {
            0 => Ping,
            1 => SetToken,
            2 => EinkClear,
            3 => EinkNewImage,
            4 => EinkRemoveImage,
            5 => EinkSelectImage,
            6 => EinkGetCurrentImgName,
            7 => EinkGetCurrentImg,
            8 => FactoryReset,
            9 => SetOwner,
            10 => SetContact,
            11 => GetOwner,
            12 => GetContact,
            13 => FirmwareUpdate,
            14 => LedBorderSetEnable,
            15 => LedBorderGetEnable,
            16 => LedBorderIncBrightness,
            17 => LedBorderDecBrightness,
            18 => LedBorderSetBrightness,
            19 => LedBorderGetBrightness,
            20 => LedBorderClear,
            21 => LedBorderAddPattern,
            22 => LedBorderRemovePattern,
            23 => LedBorderClearPatterns,
            24 => LedBorderGetPatterns,
            25 => LedBorderAddAnimation,
            26 => LedBorderRemoveAnimation,
            27 => LedBorderClearAnimations,
            28 => LedBorderGetAnimations,
            29 => UpdateStatus,
            other => return Err(other),
        })
    }
}
