//! Signed update packages: the 312-byte header followed by the raw image

use std::path::Path;

use badge_proto::{UpdateHeader, UPDATE_HEADER_SIZE, UPDATE_MAGIC};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

#[derive(thiserror::Error, Debug)]
pub enum PackageError {
    #[error("package i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("package is {0} bytes, shorter than its header")]
    TooShort(usize),
    #[error("not an update package (magic 0x{0:08x})")]
    BadMagic(u32),
    #[error("header announces {announced} image bytes, package carries {actual}")]
    SizeMismatch { announced: usize, actual: usize },
    #[error("image checksum does not match header")]
    Checksum,
    #[error("signature does not verify with the given key")]
    Signature,
    #[error("key file: {0}")]
    Key(String),
}

pub struct Package {
    pub header: UpdateHeader,
    pub image: Vec<u8>,
}

impl Package {
    pub fn build(image: Vec<u8>, hardware: &str, key: &SigningKey) -> Result<Self, PackageError> {
        let size = u32::try_from(image.len())
            .map_err(|_| PackageError::SizeMismatch { announced: u32::MAX as usize, actual: image.len() })?;
        let checksum: [u8; 32] = Sha256::digest(&image).into();
        let mut header = UpdateHeader::new(size, checksum, hardware)?;
        header.set_ed25519_signature(&key.sign(&checksum).to_bytes());
        Ok(Self { header, image })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(UPDATE_HEADER_SIZE + self.image.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.image);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, PackageError> {
        if data.len() < UPDATE_HEADER_SIZE {
            return Err(PackageError::TooShort(data.len()));
        }
        let header = UpdateHeader::from_bytes(&data[..UPDATE_HEADER_SIZE])?;
        if header.magic != UPDATE_MAGIC {
            return Err(PackageError::BadMagic(header.magic));
        }
        let image = data[UPDATE_HEADER_SIZE..].to_vec();
        if image.len() != header.size as usize {
            return Err(PackageError::SizeMismatch {
                announced: header.size as usize,
                actual: image.len(),
            });
        }
        Ok(Self { header, image })
    }

    /// Same checks the badge runs during Verify
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), PackageError> {
        let checksum: [u8; 32] = Sha256::digest(&self.image).into();
        if checksum != self.header.checksum {
            return Err(PackageError::Checksum);
        }
        let signature = self.header.ed25519_signature().ok_or(PackageError::Signature)?;
        key.verify_strict(&checksum, &ed25519_dalek::Signature::from_bytes(&signature))
            .map_err(|_| PackageError::Signature)
    }
}

pub fn generate_key() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}

/// Secret key stored as 64 hex characters
pub fn read_signing_key(path: &Path) -> Result<SigningKey, PackageError> {
    let text = std::fs::read_to_string(path)?;
    let bytes = data_encoding::HEXLOWER_PERMISSIVE
        .decode(text.trim().as_bytes())
        .map_err(|e| PackageError::Key(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| PackageError::Key("expected 32 bytes".to_string()))?;
    Ok(SigningKey::from_bytes(&bytes))
}

pub fn write_signing_key(path: &Path, key: &SigningKey) -> Result<(), PackageError> {
    std::fs::write(path, data_encoding::HEXLOWER.encode(key.as_bytes()))?;
    Ok(())
}
