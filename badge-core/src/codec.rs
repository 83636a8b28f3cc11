//! Frame assembly on top of a polling transport

use std::time::Duration;

use badge_proto::{
    CommandRequest, CommandResponse, UpdateHeader, COMMAND_ARGS_SIZE, REQUEST_FRAME_SIZE,
    REQUEST_SIZE_OFFSET, UPDATE_HEADER_SIZE,
};
use log::*;

use crate::error::TransportError;
use crate::transport::{ByteSource, Transport};

/// A complete request frame taken off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Request(CommandRequest),
    /// Frame whose `size` byte exceeds the argument block
    Oversized { identifier: u32 },
}

/// Accumulates a request frame across polls.
///
/// Never reads past the end of the current frame, so bytes that follow a
/// request (an update header, a pattern) stay on the link for the handler.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: heapless::Vec<u8, REQUEST_FRAME_SIZE>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of the frame received so far
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Read whatever is available; `Ok(None)` until a whole frame is in.
    pub fn poll(
        &mut self,
        transport: &mut dyn Transport,
        timeout: Duration,
    ) -> Result<Option<Inbound>, TransportError> {
        let mut chunk = [0u8; REQUEST_FRAME_SIZE];
        let want = REQUEST_FRAME_SIZE - self.buf.len();

        match transport.read_bytes(&mut chunk[..want], timeout) {
            Ok(n) => {
                // n <= want, the frame buffer has room
                let _ = self.buf.extend_from_slice(&chunk[..n]);
            }
            Err(TransportError::Timeout) => return Ok(None),
            Err(e) => {
                self.buf.clear();
                return Err(e);
            }
        }

        if self.buf.len() < REQUEST_FRAME_SIZE {
            trace!("partial frame, {} of {} bytes", self.buf.len(), REQUEST_FRAME_SIZE);
            return Ok(None);
        }

        let inbound = decode(&self.buf);
        self.buf.clear();
        Ok(Some(inbound))
    }

    /// Block until a full frame arrives, each read bounded by `timeout`.
    pub fn read_request(
        &mut self,
        transport: &mut dyn Transport,
        timeout: Duration,
    ) -> Result<Inbound, TransportError> {
        loop {
            let before = self.buf.len();
            if let Some(inbound) = self.poll(transport, timeout)? {
                return Ok(inbound);
            }
            if self.buf.len() == before {
                return Err(TransportError::Timeout);
            }
        }
    }
}

fn decode(frame: &[u8]) -> Inbound {
    let identifier = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    if frame[REQUEST_SIZE_OFFSET] as usize > COMMAND_ARGS_SIZE {
        return Inbound::Oversized { identifier };
    }
    match CommandRequest::from_bytes(frame) {
        Ok(request) => Inbound::Request(request),
        Err(e) => {
            warn!("undecodable frame for command {}: {}", identifier, e);
            Inbound::Oversized { identifier }
        }
    }
}

pub fn write_response(
    transport: &mut dyn Transport,
    response: &CommandResponse,
) -> Result<(), TransportError> {
    transport.write_all(&response.to_bytes())
}

/// Read the header that follows a firmware update request.
pub fn read_update_header<S: ByteSource + ?Sized>(
    source: &mut S,
    timeout: Duration,
) -> Result<UpdateHeader, TransportError> {
    let mut buf = [0u8; UPDATE_HEADER_SIZE];
    source.read_exact(&mut buf, timeout)?;
    UpdateHeader::from_bytes(&buf).map_err(TransportError::Io)
}
