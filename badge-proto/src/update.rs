//! Firmware update header and status report

use std::io::{self, Read, Write};

pub const UPDATE_MAGIC: u32 = 0xECB0_C0DE;
pub const UPDATE_HEADER_SIZE: usize = 4 + 4 + 32 + 256 + 16;
pub const HW_TAG_SIZE: usize = 16;
pub const SIGNATURE_FIELD_SIZE: usize = 256;
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Header sent once ahead of the raw image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateHeader {
    pub magic: u32,
    pub size: u32,
    pub checksum: [u8; 32],
    pub signature: [u8; SIGNATURE_FIELD_SIZE],
    pub compat_hw: [u8; HW_TAG_SIZE],
}

impl UpdateHeader {
    /// Build a header for an image, signature left empty.
    pub fn new(size: u32, checksum: [u8; 32], hardware: &str) -> io::Result<Self> {
        Ok(Self {
            magic: UPDATE_MAGIC,
            size,
            checksum,
            signature: [0u8; SIGNATURE_FIELD_SIZE],
            compat_hw: hw_tag(hardware)?,
        })
    }

    /// Ed25519 signature stored in the first 64 bytes of the signature field.
    ///
    /// Returns `None` when any of the trailing bytes are set.
    pub fn ed25519_signature(&self) -> Option<[u8; ED25519_SIGNATURE_SIZE]> {
        let (sig, rest) = self.signature.split_at(ED25519_SIGNATURE_SIZE);
        if rest.iter().any(|b| *b != 0) {
            return None;
        }
        sig.try_into().ok()
    }

    pub fn set_ed25519_signature(&mut self, sig: &[u8; ED25519_SIGNATURE_SIZE]) {
        self.signature = [0u8; SIGNATURE_FIELD_SIZE];
        self.signature[..ED25519_SIGNATURE_SIZE].copy_from_slice(sig);
    }

    /// Hardware tag without its null padding.
    pub fn compat_hw_str(&self) -> &str {
        let end = self
            .compat_hw
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(HW_TAG_SIZE);
        std::str::from_utf8(&self.compat_hw[..end]).unwrap_or("")
    }

    pub fn to_bytes(&self) -> [u8; UPDATE_HEADER_SIZE] {
        let mut buf = [0u8; UPDATE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..40].copy_from_slice(&self.checksum);
        buf[40..296].copy_from_slice(&self.signature);
        buf[296..312].copy_from_slice(&self.compat_hw);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        if data.len() < UPDATE_HEADER_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "UPDATE_HEADER too short"));
        }

        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&data[8..40]);
        let mut signature = [0u8; SIGNATURE_FIELD_SIZE];
        signature.copy_from_slice(&data[40..296]);
        let mut compat_hw = [0u8; HW_TAG_SIZE];
        compat_hw.copy_from_slice(&data[296..312]);

        Ok(Self {
            magic: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            size: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            checksum,
            signature,
            compat_hw,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; UPDATE_HEADER_SIZE];
        reader.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }
}

/// Null padded hardware tag, rejecting names that do not fit.
pub fn hw_tag(hardware: &str) -> io::Result<[u8; HW_TAG_SIZE]> {
    let bytes = hardware.as_bytes();
    if bytes.len() > HW_TAG_SIZE {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "hardware tag longer than 16 bytes"));
    }
    let mut tag = [0u8; HW_TAG_SIZE];
    tag[..bytes.len()].copy_from_slice(bytes);
    Ok(tag)
}

/// Update state machine position, as reported to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateState {
    Idle = 0,
    Downloading = 1,
    Verifying = 2,
    Applying = 3,
    Committed = 4,
    Failed = 5,
}

impl UpdateState {
    /// Whether a new update may start from this state.
    pub fn accepts_request(self) -> bool {
        matches!(self, UpdateState::Idle | UpdateState::Failed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UpdateState::Committed | UpdateState::Failed)
    }
}

impl TryFrom<u8> for UpdateState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => UpdateState::Idle,
            1 => UpdateState::Downloading,
            2 => UpdateState::Verifying,
            3 => UpdateState::Applying,
            4 => UpdateState::Committed,
            5 => UpdateState::Failed,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum UpdateStage {
    Download = 0,
    Verify = 1,
    Apply = 2,
}

impl TryFrom<u8> for UpdateStage {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => UpdateStage::Download,
            1 => UpdateStage::Verify,
            2 => UpdateStage::Apply,
            other => return Err(other),
        })
    }
}

/// Payload of the UPDATE_STATUS response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStatusReport {
    pub state: UpdateState,
    pub stage: UpdateStage,
    pub percent: u8,
    /// Progress over all three stages, for a single progress bar
    pub overall: u8,
    /// Status code of the last finished attempt
    pub last_status: u32,
}

impl UpdateStatusReport {
    pub const SIZE: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.state as u8;
        buf[1] = self.stage as u8;
        buf[2] = self.percent;
        buf[3] = self.overall;
        buf[4..8].copy_from_slice(&self.last_status.to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        if data.len() < Self::SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "UPDATE_STATUS too short"));
        }
        let state = UpdateState::try_from(data[0])
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "unknown update state"))?;
        let stage = UpdateStage::try_from(data[1])
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "unknown update stage"))?;
        Ok(Self {
            state,
            stage,
            percent: data[2],
            overall: data[3],
            last_status: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        })
    }
}
