//! Captured transport traffic and a transport replaying it.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Result, bail};
use touchpad3d::channel::{Transport, TransportError, TransportKind};
use tracing::trace;

/// Parses a capture file.
///
/// Every line holds the bytes of one transport read in hex, optionally
/// separated by whitespace and prefixed with `0x`. Everything after a `#` is
/// ignored, as are empty lines.
pub fn parse(text: &str) -> Result<Vec<Vec<u8>>> {
    let mut reads = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line = line.split_once('#').map_or(line, |(data, _)| data);

        let mut bytes = Vec::new();
        for token in line.split_whitespace() {
            let digits = token.strip_prefix("0x").unwrap_or(token);
            if !digits.is_ascii() || digits.len() % 2 != 0 {
                bail!("line {}: {token:?} is not a sequence of hex bytes", i + 1);
            }

            for pair in digits.as_bytes().chunks(2) {
                let Some(byte) = std::str::from_utf8(pair)
                    .ok()
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                else {
                    bail!("line {}: {token:?} is not a sequence of hex bytes", i + 1);
                };
                bytes.push(byte);
            }
        }

        if !bytes.is_empty() {
            reads.push(bytes);
        }
    }

    Ok(reads)
}

/// Serves captured reads in order and discards everything written.
#[derive(Debug)]
pub struct CaptureTransport {
    kind: TransportKind,
    reads: Mutex<VecDeque<Vec<u8>>>,

    /// Set when a read found the capture exhausted.
    starved: AtomicBool,
}

impl CaptureTransport {
    pub fn new(kind: TransportKind, reads: Vec<Vec<u8>>) -> Self {
        Self {
            kind,
            reads: Mutex::new(reads.into()),
            starved: AtomicBool::new(false),
        }
    }

    /// Whether a read found the capture exhausted since the last call.
    ///
    /// Once this is true, every captured byte has been handed out and nothing
    /// new will arrive.
    pub fn take_starved(&self) -> bool {
        self.starved.swap(false, Ordering::AcqRel)
    }
}

impl Transport for CaptureTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn open(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn close(&self) {}

    fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        trace!(len = data.len(), "discarding write");
        Ok(())
    }

    fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, TransportError> {
        {
            let mut reads = self.reads.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(mut read) = reads.pop_front() {
                if read.len() > buf.len() {
                    reads.push_front(read.split_off(buf.len()));
                }
                buf[..read.len()].copy_from_slice(&read);
                return Ok(read.len());
            }
        }

        self.starved.store(true, Ordering::Release);
        if let Some(timeout) = timeout {
            thread::sleep(timeout);
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_lines() {
        let text = "# header\n\nFE FF 0x12\n  00a1 # trailing\n";
        assert_eq!(parse(text).unwrap(), vec![vec![0xFE, 0xFF, 0x12], vec![0x00, 0xA1]]);
    }

    #[test]
    fn rejects_broken_bytes() {
        let err = parse("FE\nF\n").unwrap_err();
        assert!(err.to_string().starts_with("line 2"));
        assert!(parse("zz").is_err());
    }

    #[test]
    fn long_reads_are_split() {
        let transport = CaptureTransport::new(TransportKind::Stream, vec![vec![1, 2, 3]]);
        let mut buf = [0u8; 2];

        assert_eq!(transport.read(&mut buf, None).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(transport.read(&mut buf, None).unwrap(), 1);
        assert_eq!(buf[0], 3);

        assert!(!transport.take_starved());
        assert_eq!(transport.read(&mut buf, None).unwrap(), 0);
        assert!(transport.take_starved());
        assert!(!transport.take_starved());
    }
}
