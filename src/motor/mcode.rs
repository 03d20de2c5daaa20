// MCode ASCII command protocol.
//
// Commands are short tokens terminated by CRLF. The controller echoes every
// command before its answer and ends each frame with a '?' or '>' character
// at no fixed position, with no length field, so responses are framed by
// scanning the accumulated bytes for a terminator under a deadline.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::transport::Transport;
use crate::config::DriverConfig;

// Appended to every outgoing command; the controller ignores commands
// without it.
const COMMAND_TERMINATOR: &str = "\r\n";

/// Error types for the command link. Response timeouts are not errors:
/// the controller offers no delivery guarantee, so a missed answer is
/// reported as an empty response and the exchange is marked unframed.
#[derive(Debug, thiserror::Error)]
pub enum McodeError {
    #[error("not connected to the controller")]
    NotConnected,

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, McodeError>;

/// Command/response bus for one controller connection.
///
/// Owns the transport and the last decoded response. Strictly
/// request-response: a new command must not be sent before the previous
/// response is framed, since echo stripping relies on a 1:1 correspondence.
pub struct McodeBus {
    transport: Option<Box<dyn Transport>>,
    response: String,
    framed: bool,
    response_timeout: Duration,
    poll_interval: Duration,
}

impl McodeBus {
    /// A bus with no link attached; every exchange fails with
    /// `NotConnected` until `attach` is called.
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            transport: None,
            response: String::new(),
            framed: false,
            response_timeout: config.response_timeout,
            poll_interval: config.response_poll_interval,
        }
    }

    pub fn attach(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Send `command` and frame its response.
    ///
    /// Returns the echo-stripped answer payload, which is also stored as
    /// the last response. If no terminator arrives inside the response
    /// window the accumulated bytes are discarded and the result is empty.
    pub fn send_command(&mut self, command: &str) -> Result<String> {
        let transport = self.transport.as_mut().ok_or(McodeError::NotConnected)?;

        debug!("-> {}", command);
        transport.send(format!("{command}{COMMAND_TERMINATOR}").as_bytes())?;

        thread::sleep(self.poll_interval);
        let mut raw = String::new();
        push_chunk(&mut raw, transport.receive()?);

        let receive_start = Instant::now();
        while !contains_terminator(&raw) && receive_start.elapsed() <= self.response_timeout {
            thread::sleep(self.poll_interval);
            push_chunk(&mut raw, transport.receive()?);
        }

        self.framed = contains_terminator(&raw);
        if !self.framed {
            warn!(
                "Timeout: no response terminator for {:?} within {:?}, discarding {:?}",
                command, self.response_timeout, raw
            );
            raw.clear();
        }

        self.response = strip_echo(command, &raw);
        debug!("<- {:?}", self.response);
        Ok(self.response.clone())
    }

    /// The most recently framed, echo-stripped response.
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Decode the last response as a boolean, see [`decode_bool`].
    pub fn response_bool(&self, default: bool) -> bool {
        decode_bool(&self.response, default)
    }

    /// Whether the most recent exchange observed a terminator before the
    /// deadline. Setters key their local commit on this.
    pub fn last_exchange_framed(&self) -> bool {
        self.framed
    }
}

fn contains_terminator(buffer: &str) -> bool {
    buffer.contains('?') || buffer.contains('>')
}

fn push_chunk(buffer: &mut String, chunk: Vec<u8>) {
    buffer.push_str(&String::from_utf8_lossy(&chunk));
}

/// Strip the command echo off a framed response.
///
/// The controller prefixes its answer with the issued command plus CRLF and
/// the useful payload stops two characters short of the frame end. Frames
/// not longer than the echo are passed through untouched, and a frame with
/// fewer than two characters after the echo keeps its full tail.
pub fn strip_echo(command: &str, raw: &str) -> String {
    let prefix = command.len() + 2;
    if prefix >= raw.len() {
        return raw.to_string();
    }
    let end = if raw.len() >= command.len() + 4 {
        raw.len() - 2
    } else {
        raw.len()
    };
    raw.get(prefix..end).unwrap_or("").to_string()
}

/// Decode a status reply the way the controller's answer shapes demand.
///
/// With a true default the reply reads true unless a '0' appears anywhere;
/// with a false default it reads true only if a '1' appears. The substring
/// match is deliberate: replies carry stray CR/LF and prompt characters
/// around the flag digit.
pub fn decode_bool(response: &str, default: bool) -> bool {
    if default {
        !response.contains('0')
    } else {
        response.contains('1')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    // Feeds back pre-scripted chunks, one per receive call.
    struct ChunkedTransport {
        chunks: VecDeque<Vec<u8>>,
    }

    impl ChunkedTransport {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            }
        }
    }

    impl Transport for ChunkedTransport {
        fn send(&mut self, _bytes: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn receive(&mut self) -> io::Result<Vec<u8>> {
            Ok(self.chunks.pop_front().unwrap_or_default())
        }
    }

    fn fast_config() -> DriverConfig {
        DriverConfig {
            response_poll_interval: Duration::from_millis(1),
            response_timeout: Duration::from_millis(30),
            ..DriverConfig::default()
        }
    }

    #[test]
    fn decode_bool_truth_table() {
        assert!(decode_bool("1", true));
        assert!(!decode_bool("0", true));
        assert!(decode_bool("", true));
        assert!(decode_bool("1", false));
        assert!(!decode_bool("0", false));
        assert!(!decode_bool("", false));
        // Stray framing characters around the digit do not change the answer.
        assert!(decode_bool("\r\n1\r", false));
        assert!(!decode_bool("\r\n0\r", true));
    }

    #[test]
    fn strip_echo_removes_echo_and_frame_tail() {
        assert_eq!(strip_echo("PR MV", "PR MV\r\n1\r\n?"), "1\r");
        // Exactly two characters after the echo: both belong to the tail.
        assert_eq!(strip_echo("MR 100", "MR 100\r\n5?"), "");
        // One character after the echo survives whole.
        assert_eq!(strip_echo("A 10", "A 10\r\n>"), ">");
    }

    #[test]
    fn strip_echo_leaves_short_frames_alone() {
        assert_eq!(strip_echo("MR 100", "MR 100\r"), "MR 100\r");
        assert_eq!(strip_echo("MR 100", ""), "");
    }

    #[test]
    fn frames_response_across_partial_chunks() {
        let transport = ChunkedTransport::new(&[b"PR MV\r", b"", b"\n1\r", b"\n?"]);
        let mut bus = McodeBus::new(&fast_config());
        bus.attach(Box::new(transport));

        let response = bus.send_command("PR MV").unwrap();
        assert_eq!(response, "1\r");
        assert!(bus.last_exchange_framed());
        assert!(bus.response_bool(false));
    }

    #[test]
    fn missing_terminator_times_out_with_empty_response() {
        let transport = ChunkedTransport::new(&[b"PR MV\r\n1\r\n"]);
        let mut bus = McodeBus::new(&fast_config());
        bus.attach(Box::new(transport));

        let started = Instant::now();
        let response = bus.send_command("PR MV").unwrap();
        let waited = started.elapsed();

        assert_eq!(response, "");
        assert!(!bus.last_exchange_framed());
        // Bounded by the response window plus a few poll intervals.
        assert!(waited >= Duration::from_millis(30));
        assert!(waited < Duration::from_millis(300));
        // Default-driven decoding after a timeout.
        assert!(bus.response_bool(true));
        assert!(!bus.response_bool(false));
    }

    #[test]
    fn detached_bus_reports_not_connected() {
        let mut bus = McodeBus::new(&fast_config());
        assert!(!bus.is_connected());
        assert!(matches!(
            bus.send_command("PR MV"),
            Err(McodeError::NotConnected)
        ));
    }
}
