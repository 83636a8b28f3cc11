//! Blocking TCP link standing in for the badge's wireless characteristics
//!
//! Uses std::net with a per-read timeout, so the main loop can poll.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use badge_core::{ByteSource, Transport, TransportError};
use log::*;

pub struct TcpLink {
    stream: TcpStream,
    peer: SocketAddr,
    connected: bool,
}

impl TcpLink {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        info!("peer {} connected", peer);
        Ok(Self { stream, peer, connected: true })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        info!("peer {} gone", self.peer);
    }
}

fn map_err(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => TransportError::Disconnected,
        _ => TransportError::Io(e),
    }
}

fn read_with_timeout(stream: &mut TcpStream, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
    // a zero timeout would mean "block forever"
    stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
    match stream.read(buf) {
        Ok(0) if !buf.is_empty() => Err(TransportError::Disconnected),
        Ok(n) => Ok(n),
        Err(e) => Err(map_err(e)),
    }
}

impl ByteSource for TcpLink {
    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let result = read_with_timeout(&mut self.stream, buf, timeout);
        if matches!(result, Err(TransportError::Disconnected | TransportError::Io(_))) {
            self.connected = false;
        }
        result
    }
}

impl Transport for TcpLink {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        match self.stream.write(bytes) {
            Ok(n) => Ok(n),
            Err(e) => {
                let e = map_err(e);
                if !matches!(e, TransportError::Timeout) {
                    self.connected = false;
                }
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn data_channel(&mut self) -> Result<Box<dyn ByteSource>, TransportError> {
        Ok(Box::new(TcpReader { stream: self.stream.try_clone()? }))
    }
}

/// Second handle on the same socket, read by the update worker
struct TcpReader {
    stream: TcpStream,
}

impl ByteSource for TcpReader {
    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        read_with_timeout(&mut self.stream, buf, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (TcpStream, TcpLink) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, TcpLink::new(server).unwrap())
    }

    #[test]
    fn quiet_socket_times_out() {
        let (_client, mut link) = pair();
        let mut buf = [0u8; 8];
        assert!(matches!(
            link.read_bytes(&mut buf, Duration::from_millis(10)),
            Err(TransportError::Timeout)
        ));
        assert!(link.is_connected());
    }

    #[test]
    fn bytes_arrive_and_close_is_seen() {
        let (mut client, mut link) = pair();
        client.write_all(b"abc").unwrap();

        let mut buf = [0u8; 3];
        link.read_exact(&mut buf, Duration::from_secs(1)).unwrap();
        assert_eq!(&buf, b"abc");

        drop(client);
        assert!(matches!(
            link.read_bytes(&mut buf, Duration::from_secs(1)),
            Err(TransportError::Disconnected)
        ));
        assert!(!link.is_connected());
    }

    #[test]
    fn data_channel_shares_the_socket() {
        let (mut client, mut link) = pair();
        let mut channel = link.data_channel().unwrap();
        client.write_all(&[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 4];
        channel.read_exact(&mut buf, Duration::from_secs(1)).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        link.write_all(b"ok").unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"ok");
    }
}
