//! EConBadge wire protocol - command frames, status codes and update header
//!
//! Every frame has a fixed size so the badge never allocates on the receive
//! path. Integers are little-endian.

use std::io::{self, Read, Write};

mod status;
pub mod update;

pub use status::{CommandId, ErrorKind, MAX_COMMAND_ID};
pub use update::{
    UpdateHeader, UpdateStage, UpdateState, UpdateStatusReport, UPDATE_HEADER_SIZE, UPDATE_MAGIC,
};

pub const TOKEN_SIZE: usize = 16;
pub const COMMAND_ARGS_SIZE: usize = 64;
pub const RESPONSE_PAYLOAD_SIZE: usize = 64;

pub const REQUEST_FRAME_SIZE: usize = 4 + TOKEN_SIZE + 1 + COMMAND_ARGS_SIZE;
pub const RESPONSE_FRAME_SIZE: usize = 4 + 1 + RESPONSE_PAYLOAD_SIZE;

/// Offset of the `size` byte inside a request frame
pub const REQUEST_SIZE_OFFSET: usize = 4 + TOKEN_SIZE;

/// Token every badge starts with until a peer sets its own
pub const DEFAULT_TOKEN: [u8; TOKEN_SIZE] = *b"0000000000000000";

pub type Args = heapless::Vec<u8, COMMAND_ARGS_SIZE>;
pub type Payload = heapless::Vec<u8, RESPONSE_PAYLOAD_SIZE>;

/// Command request sent by a peer (or queued by the local UI)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub identifier: u32,
    pub token: [u8; TOKEN_SIZE],
    pub args: Args,
}

impl CommandRequest {
    pub fn new(identifier: u32, token: [u8; TOKEN_SIZE], args: &[u8]) -> io::Result<Self> {
        let args = Args::from_slice(args)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "command arguments longer than 64 bytes"))?;
        Ok(Self { identifier, token, args })
    }

    pub fn command(&self) -> Option<CommandId> {
        CommandId::try_from(self.identifier).ok()
    }

    pub fn to_bytes(&self) -> [u8; REQUEST_FRAME_SIZE] {
        let mut buf = [0u8; REQUEST_FRAME_SIZE];
        buf[0..4].copy_from_slice(&self.identifier.to_le_bytes());
        buf[4..REQUEST_SIZE_OFFSET].copy_from_slice(&self.token);
        buf[REQUEST_SIZE_OFFSET] = self.args.len() as u8;
        buf[REQUEST_SIZE_OFFSET + 1..REQUEST_SIZE_OFFSET + 1 + self.args.len()].copy_from_slice(&self.args);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        if data.len() < REQUEST_FRAME_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "REQUEST too short"));
        }

        let identifier = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let mut token = [0u8; TOKEN_SIZE];
        token.copy_from_slice(&data[4..REQUEST_SIZE_OFFSET]);

        let size = data[REQUEST_SIZE_OFFSET] as usize;
        if size > COMMAND_ARGS_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "REQUEST size exceeds argument block"));
        }
        let start = REQUEST_SIZE_OFFSET + 1;
        // size is bounded above, from_slice cannot fail
        let args = Args::from_slice(&data[start..start + size])
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "REQUEST args truncated"))?;

        Ok(Self { identifier, token, args })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; REQUEST_FRAME_SIZE];
        reader.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }
}

/// Build a token from its textual form, null padded to 16 bytes.
pub fn token_from_str(token: &str) -> io::Result<[u8; TOKEN_SIZE]> {
    let bytes = token.as_bytes();
    if bytes.is_empty() || bytes.len() > TOKEN_SIZE {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "token must be 1 to 16 bytes"));
    }
    let mut out = [0u8; TOKEN_SIZE];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// Response to exactly one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub status: ErrorKind,
    pub payload: Payload,
}

impl CommandResponse {
    pub fn ok(payload: Payload) -> Self {
        Self { status: ErrorKind::NoError, payload }
    }

    pub fn status(status: ErrorKind) -> Self {
        Self { status, payload: Payload::new() }
    }

    pub fn to_bytes(&self) -> [u8; RESPONSE_FRAME_SIZE] {
        let mut buf = [0u8; RESPONSE_FRAME_SIZE];
        buf[0..4].copy_from_slice(&(self.status as u32).to_le_bytes());
        buf[4] = self.payload.len() as u8;
        buf[5..5 + self.payload.len()].copy_from_slice(&self.payload);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        if data.len() < RESPONSE_FRAME_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "RESPONSE too short"));
        }

        let raw = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let status = ErrorKind::try_from(raw)
            .map_err(|code| io::Error::new(io::ErrorKind::InvalidData, format!("unknown status code {code}")))?;

        let size = data[4] as usize;
        if size > RESPONSE_PAYLOAD_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "RESPONSE size exceeds payload block"));
        }
        let payload = Payload::from_slice(&data[5..5 + size])
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "RESPONSE payload truncated"))?;

        Ok(Self { status, payload })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; RESPONSE_FRAME_SIZE];
        reader.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }
}

/// Async frame operations for tokio
#[cfg(feature = "async")]
pub mod async_io {
    use super::*;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    pub async fn write_request<W: AsyncWrite + Unpin>(writer: &mut W, request: &CommandRequest) -> io::Result<()> {
        writer.write_all(&request.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn read_response<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<CommandResponse> {
        let mut buf = [0u8; RESPONSE_FRAME_SIZE];
        reader.read_exact(&mut buf).await?;
        CommandResponse::from_bytes(&buf)
    }

    pub async fn write_update_header<W: AsyncWrite + Unpin>(writer: &mut W, header: &UpdateHeader) -> io::Result<()> {
        writer.write_all(&header.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read a length-prefixed record streamed after a response.
    pub async fn read_record<R: AsyncRead + Unpin>(reader: &mut R, wide_length: bool) -> io::Result<Vec<u8>> {
        let len = if wide_length {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len).await?;
            u16::from_le_bytes(len) as usize
        } else {
            reader.read_u8().await? as usize
        };
        let mut record = vec![0u8; len];
        reader.read_exact(&mut record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_layout() {
        let request = CommandRequest::new(13, DEFAULT_TOKEN, &[1, 2, 3]).unwrap();
        let bytes = request.to_bytes();

        assert_eq!(bytes.len(), 85);
        assert_eq!(&bytes[0..4], &[13, 0, 0, 0]);
        assert_eq!(&bytes[4..20], b"0000000000000000");
        assert_eq!(bytes[20], 3);
        assert_eq!(&bytes[21..24], &[1, 2, 3]);
        assert_eq!(CommandRequest::from_bytes(&bytes).unwrap(), request);
    }

    #[test]
    fn oversized_request_is_invalid() {
        let mut bytes = CommandRequest::new(0, DEFAULT_TOKEN, &[]).unwrap().to_bytes();
        bytes[REQUEST_SIZE_OFFSET] = 65;
        let err = CommandRequest::from_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        assert!(CommandRequest::new(0, DEFAULT_TOKEN, &[0u8; 65]).is_err());
    }

    #[test]
    fn response_keeps_status_and_payload() {
        let payload = Payload::from_slice(b"Ada").unwrap();
        let bytes = CommandResponse::ok(payload.clone()).to_bytes();
        assert_eq!(bytes.len(), 69);

        let parsed = CommandResponse::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.status, ErrorKind::NoError);
        assert_eq!(&parsed.payload[..], b"Ada");

        let mut bad = CommandResponse::status(ErrorKind::NoAction).to_bytes();
        assert_eq!(&bad[0..4], &[4, 0, 0, 0]);
        bad[0] = 200;
        assert!(CommandResponse::from_bytes(&bad).is_err());
    }

    #[test]
    fn sync_io_reads_back_what_it_wrote() {
        let request = CommandRequest::new(9, DEFAULT_TOKEN, b"owner").unwrap();
        let mut wire = Vec::new();
        request.write_to(&mut wire).unwrap();
        CommandResponse::status(ErrorKind::InvalidToken).write_to(&mut wire).unwrap();

        let mut cursor = io::Cursor::new(wire);
        assert_eq!(CommandRequest::read_from(&mut cursor).unwrap(), request);
        assert_eq!(
            CommandResponse::read_from(&mut cursor).unwrap().status,
            ErrorKind::InvalidToken
        );
    }

    #[test]
    fn tokens_are_null_padded() {
        let token = token_from_str("secret").unwrap();
        assert_eq!(&token[..6], b"secret");
        assert!(token[6..].iter().all(|b| *b == 0));
        assert!(token_from_str("").is_err());
        assert!(token_from_str("01234567890123456").is_err());
    }
}
