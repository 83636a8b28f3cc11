//! Transport abstraction traits
//!
//! Backends (TCP on the host, BLE characteristics on the badge) implement
//! these traits; the dispatcher and update pipeline only see the traits.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::TransportError;

/// Readable side of a link.
pub trait ByteSource: Send {
    /// Read at most `buf.len()` bytes, waiting up to `timeout` for the first one.
    ///
    /// Returns the number of bytes read, which is never zero on success.
    /// `TransportError::Timeout` means nothing arrived in time.
    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Fill `buf` completely, each read bounded by `timeout`.
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read_bytes(&mut buf[filled..], timeout)?;
        }
        Ok(())
    }
}

/// Connection-oriented link carrying command frames.
pub trait Transport: ByteSource {
    /// Write some bytes, returning how many were accepted
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Whether a peer is currently attached
    fn is_connected(&self) -> bool;

    /// Independent reader for bulk data (firmware images), usable from
    /// another thread while the link stays with the main loop
    fn data_channel(&mut self) -> Result<Box<dyn ByteSource>, TransportError>;

    /// True when bulk data and command frames share one byte stream, in which
    /// case the main loop must not read frames while a download is running
    fn shares_data_channel(&self) -> bool {
        true
    }

    fn write_all(&mut self, mut bytes: &[u8]) -> Result<(), TransportError> {
        while !bytes.is_empty() {
            match self.write_bytes(bytes)? {
                0 => return Err(TransportError::Disconnected),
                n => bytes = &bytes[n..],
            }
        }
        Ok(())
    }
}

/// Stand-in link used for commands that come from the local UI
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

impl ByteSource for Detached {
    fn read_bytes(&mut self, _buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
        Err(TransportError::Disconnected)
    }
}

impl Transport for Detached {
    fn write_bytes(&mut self, _bytes: &[u8]) -> Result<usize, TransportError> {
        Err(TransportError::Disconnected)
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn data_channel(&mut self) -> Result<Box<dyn ByteSource>, TransportError> {
        Err(TransportError::Disconnected)
    }
}

#[derive(Default)]
struct PipeState {
    data: VecDeque<u8>,
    closed: bool,
}

#[derive(Default)]
struct Pipe {
    state: Mutex<PipeState>,
    ready: Condvar,
}

impl Pipe {
    fn lock(&self) -> std::sync::MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.data.is_empty() {
            if state.closed {
                return Err(TransportError::Disconnected);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        let n = buf.len().min(state.data.len());
        for (slot, byte) in buf.iter_mut().zip(state.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Disconnected);
        }
        state.data.extend(bytes);
        drop(state);
        self.ready.notify_all();
        Ok(bytes.len())
    }
}

/// In-memory duplex link, one end per side.
///
/// Dropping an end closes both directions; the peer drains what is buffered
/// and then sees `Disconnected`.
pub struct MemoryLink {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
}

pub fn memory_pair() -> (MemoryLink, MemoryLink) {
    let a = Arc::new(Pipe::default());
    let b = Arc::new(Pipe::default());
    (
        MemoryLink { rx: a.clone(), tx: b.clone() },
        MemoryLink { rx: b, tx: a },
    )
}

impl MemoryLink {
    pub fn close(&self) {
        self.rx.close();
        self.tx.close();
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.close();
    }
}

impl ByteSource for MemoryLink {
    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.rx.read(buf, timeout)
    }
}

impl Transport for MemoryLink {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        self.tx.write(bytes)
    }

    fn is_connected(&self) -> bool {
        !self.tx.lock().closed
    }

    fn data_channel(&mut self) -> Result<Box<dyn ByteSource>, TransportError> {
        Ok(Box::new(MemoryReader { rx: self.rx.clone() }))
    }
}

struct MemoryReader {
    rx: Arc<Pipe>,
}

impl ByteSource for MemoryReader {
    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.rx.read(buf, timeout)
    }
}
