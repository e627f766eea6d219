//! TCP transport.
//!
//! Wraps a non-blocking `TcpStream` behind the [`Transport`] trait. Reads
//! return immediately; writes spin on `WouldBlock` until the socket has
//! accepted every byte, which matches the engine's all-or-nothing write
//! contract.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::TransportError;
use crate::traits::Transport;

const WRITE_RETRY_DELAY: Duration = Duration::from_millis(1);

pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    connected: bool,
}

impl TcpTransport {
    /// Connect to a listening host.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    /// Adopt an accepted stream (the device-side listener path).
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        let peer = stream.peer_addr()?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        tracing::info!(%peer, "tcp: link up");
        Ok(Self {
            stream,
            peer,
            connected: true,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for TcpTransport {
    fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.stream.read(buf) {
            Ok(0) => {
                self.connected = false;
                tracing::info!(peer = %self.peer, "tcp: link closed by peer");
                Err(TransportError::Closed)
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                self.connected = false;
                Err(TransportError::Io(e))
            }
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let mut written = 0;
        while written < buf.len() {
            match self.stream.write(&buf[written..]) {
                Ok(0) => {
                    self.connected = false;
                    return Err(TransportError::Closed);
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(WRITE_RETRY_DELAY);
                }
                Err(e) => {
                    self.connected = false;
                    return Err(TransportError::Io(e));
                }
            }
        }
        Ok(())
    }

    fn ready(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (TcpTransport, TcpTransport) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpTransport::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let server = TcpTransport::from_stream(accepted).unwrap();
        (client, server)
    }

    fn read_exact_polling(t: &mut TcpTransport, want: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        while out.len() < want {
            let n = t.read_nonblocking(&mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
            if n == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        out
    }

    #[test]
    fn roundtrip() {
        let (mut client, mut server) = pair();
        client.write_all(&[0xD5, 0xAA, 0x01]).unwrap();
        let got = read_exact_polling(&mut server, 3);
        assert_eq!(got, vec![0xD5, 0xAA, 0x01]);

        server.write_all(&[0x42]).unwrap();
        let got = read_exact_polling(&mut client, 1);
        assert_eq!(got, vec![0x42]);
    }

    #[test]
    fn read_is_nonblocking() {
        let (mut client, _server) = pair();
        let mut buf = [0u8; 16];
        assert_eq!(client.read_nonblocking(&mut buf).unwrap(), 0);
    }

    #[test]
    fn peer_close_detected() {
        let (mut client, server) = pair();
        drop(server);
        let mut buf = [0u8; 16];
        // The close lands as Closed, possibly after a benign empty read
        let mut saw_closed = false;
        for _ in 0..100 {
            match client.read_nonblocking(&mut buf) {
                Err(TransportError::Closed) => {
                    saw_closed = true;
                    break;
                }
                Ok(_) => std::thread::sleep(Duration::from_millis(1)),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(saw_closed);
        assert!(!client.ready());
    }
}
