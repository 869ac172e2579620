//! Delimited-stream framing used by serial transports.
//!
//! Every message is prefixed with the sync sequence `0xFE 0xFF`. The first
//! byte of the message itself is its total length, including the 4 byte
//! header.

use std::{collections::VecDeque, sync::Arc};

use crate::diagnostics::Diagnostics;

/// The two bytes every message on the stream starts with.
pub const SYNC: [u8; 2] = [0xFE, 0xFF];

/// The size of the message header following the sync sequence.
pub const HEADER_LENGTH: usize = 4;

/// Raw bytes that reset the 3D engine when written to the stream.
pub const RESET_SEQUENCE: [u8; 8] = [0xFE, 0xFF, 0x00, 0x11, 0x00, 0x00, 0x00, 0x00];

/// The position of the extractor inside a frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum StreamState {
    /// Waiting for the first sync byte.
    SeekFirstSync,

    /// The first sync byte was seen, waiting for the second one.
    SeekSecondSync,

    /// Reading the header. Holds the number of header bytes read so far.
    Header(usize),

    /// Reading the body of a message whose header was accepted.
    Body,
}

/// Reassembles messages from a delimited byte stream.
///
/// Input is pushed with [`Self::feed`] in slices of any size. Partial progress
/// is kept between calls, so a message split across many reads comes out
/// exactly as if it had been fed at once.
#[derive(Debug)]
pub struct StreamExtractor {
    /// The current state of the frame state machine.
    state: StreamState,

    /// Bytes fed but not yet consumed.
    input: VecDeque<u8>,

    /// The message being assembled.
    msg: Vec<u8>,

    /// Where malformed frames are reported.
    diagnostics: Arc<Diagnostics>,
}

impl Default for StreamExtractor {
    fn default() -> Self {
        Self::new(Arc::new(Diagnostics::new()))
    }
}

impl StreamExtractor {
    pub fn new(diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            state: StreamState::SeekFirstSync,
            input: VecDeque::new(),
            msg: Vec::with_capacity(u8::MAX as usize),
            diagnostics,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether fed bytes are still waiting to be consumed.
    pub fn has_input(&self) -> bool {
        !self.input.is_empty()
    }

    /// Appends raw bytes read from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    /// Drops all buffered input and partial progress.
    pub fn reset(&mut self) {
        self.state = StreamState::SeekFirstSync;
        self.input.clear();
        self.msg.clear();
    }

    /// Consumes buffered input until a complete message is found.
    ///
    /// Returns `None` once the input is exhausted without completing a
    /// message. The partial message is kept for the next call.
    pub fn extract(&mut self) -> Option<Vec<u8>> {
        while let Some(byte) = self.input.pop_front() {
            match self.state {
                StreamState::SeekFirstSync => {
                    if byte == SYNC[0] {
                        self.state = StreamState::SeekSecondSync;
                    }
                },
                StreamState::SeekSecondSync => {
                    self.state = if byte == SYNC[1] {
                        self.msg.clear();
                        StreamState::Header(0)
                    } else {
                        StreamState::SeekFirstSync
                    };
                },
                StreamState::Header(read) => {
                    self.msg.push(byte);
                    if read + 1 < HEADER_LENGTH {
                        self.state = StreamState::Header(read + 1);
                        continue;
                    }

                    let length = self.msg[0] as usize;
                    if length < HEADER_LENGTH {
                        self.diagnostics.bad_data(
                            "stream_extract",
                            "message length smaller than header",
                            length as i64,
                            HEADER_LENGTH as i64,
                        );
                        self.state = StreamState::SeekFirstSync;
                    } else if length == HEADER_LENGTH {
                        self.state = StreamState::SeekFirstSync;
                        return Some(std::mem::take(&mut self.msg));
                    } else {
                        self.state = StreamState::Body;
                    }
                },
                StreamState::Body => {
                    self.msg.push(byte);
                    if self.msg.len() >= self.msg[0] as usize {
                        self.state = StreamState::SeekFirstSync;
                        return Some(std::mem::take(&mut self.msg));
                    }
                },
            }
        }

        None
    }
}

/// Prefixes a message with the sync sequence.
pub fn encode(msg: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SYNC.len() + msg.len());
    out.extend_from_slice(&SYNC);
    out.extend_from_slice(msg);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: [u8; 16] = [16, 0, 0, 0x15, 0xA2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

    #[test]
    fn extracts_message_fed_in_one_piece() {
        let mut ex = StreamExtractor::default();
        ex.feed(&encode(&STATUS));
        assert_eq!(ex.extract().as_deref(), Some(&STATUS[..]));
        assert_eq!(ex.extract(), None);
        assert_eq!(ex.state(), StreamState::SeekFirstSync);
    }

    #[test]
    fn keeps_progress_across_partial_feeds() {
        let mut ex = StreamExtractor::default();
        let framed = encode(&STATUS);

        for byte in &framed[..framed.len() - 1] {
            ex.feed(&[*byte]);
            assert_eq!(ex.extract(), None);
        }
        assert_eq!(ex.state(), StreamState::Body);

        ex.feed(&framed[framed.len() - 1..]);
        assert_eq!(ex.extract().as_deref(), Some(&STATUS[..]));
    }

    #[test]
    fn skips_garbage_before_sync() {
        let mut ex = StreamExtractor::default();
        ex.feed(&[0x00, 0xFE, 0x12, 0xFF, 0xFE]);
        ex.feed(&encode(&STATUS)[1..]);
        assert_eq!(ex.extract().as_deref(), Some(&STATUS[..]));
    }

    #[test]
    fn short_length_resynchronizes() {
        let diag = Arc::new(Diagnostics::new());
        let mut ex = StreamExtractor::new(Arc::clone(&diag));
        ex.feed(&[0xFE, 0xFF, 0x03, 0x00, 0x00, 0x00]);
        ex.feed(&encode(&STATUS));

        assert_eq!(ex.extract().as_deref(), Some(&STATUS[..]));
        assert_eq!(diag.malformed_count(), 1);
    }

    #[test]
    fn header_only_message() {
        let mut ex = StreamExtractor::default();
        ex.feed(&RESET_SEQUENCE[..2]);
        ex.feed(&[4, 0, 0, 0x06]);
        assert_eq!(ex.extract(), Some(vec![4, 0, 0, 0x06]));
    }
}
