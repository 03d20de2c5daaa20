// Byte-stream link to the controller.
//
// The link carries bytes reliably and in order but has no message
// boundaries; framing is the protocol layer's problem.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::info;

const RECEIVE_BUFFER_SIZE: usize = 1024;

// How long one receive call may wait for bytes before reporting an empty
// chunk. Kept short so the protocol layer controls the polling cadence.
const RECEIVE_WAIT: Duration = Duration::from_millis(1);

/// Bidirectional byte stream with no framing.
///
/// `receive` returns whatever is currently available, possibly nothing, and
/// is safe to call repeatedly while waiting for a response to accumulate.
pub trait Transport: Send {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn receive(&mut self) -> io::Result<Vec<u8>>;
}

/// TCP client link to a controller's command port.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(RECEIVE_WAIT))?;
        info!("Connected to {}:{}", host, port);
        Ok(Self { stream })
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }

    fn receive(&mut self) -> io::Result<Vec<u8>> {
        let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
        match self.stream.read(&mut buffer) {
            Ok(n) => Ok(buffer[..n].to_vec()),
            // No bytes inside the wait window is a normal empty chunk.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
