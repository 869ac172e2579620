//! Chunked-packet framing used by HID transports.
//!
//! Every transport packet is 64 bytes long:
//!
//! | offset | size | content                                  |
//! |--------|------|------------------------------------------|
//! | 0      | 1    | report id                                |
//! | 1      | 1    | length `n` of the chunk data (max. 62)   |
//! | 2      | n    | a sequence of chunks                     |
//! | 2 + n  | rest | padding                                  |
//!
//! A chunk is a two byte header followed by its data:
//!
//! | offset | size | content                                     |
//! |--------|------|---------------------------------------------|
//! | 0      | 1    | id of the message the chunk belongs to      |
//! | 1      | 1    | bits 0-5: data length `k`                   |
//! |        |      | bit 6: more chunks of this message follow   |
//! |        |      | bit 7: chunk continues a started message    |
//! | 2      | k    | data                                        |

use std::sync::Arc;

use crate::diagnostics::Diagnostics;

/// The fixed size of a transport packet.
pub const PACKET_LENGTH: usize = 64;

/// The maximum amount of chunk bytes per packet.
pub const MAX_PACKET_DATA: usize = PACKET_LENGTH - 2;

/// The maximum amount of message data the writer puts into one packet.
pub const MAX_CHUNK_DATA: usize = MAX_PACKET_DATA - 2;

/// The capacity of the reassembly buffer, including the two byte message
/// header.
pub const MESSAGE_CAPACITY: usize = 256;

/// The report id used by the touchpad firmware.
pub const DEFAULT_REPORT_ID: u8 = 4;

const LENGTH_MASK: u8 = 0x3F;
const FLAG_INCOMPLETE: u8 = 0x40;
const FLAG_CONTINUATION: u8 = 0x80;

/// A message reassembled from one or more chunks.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ChunkedMessage {
    /// The id shared by all chunks of the message.
    pub id: u8,

    /// The concatenated chunk data.
    pub payload: Vec<u8>,
}

/// Reassembles messages from chunked transport packets.
///
/// Packets are handed in with [`Self::load`] whenever [`Self::needs_packet`]
/// reports that the current one was fully processed. All framing errors are
/// non-fatal: they are reported and the extractor resynchronizes.
#[derive(Debug)]
pub struct PacketExtractor {
    /// The report id accepted on incoming packets.
    report_id: u8,

    /// The packet currently being processed.
    packet: [u8; PACKET_LENGTH],

    /// The offset of the next chunk inside [`Self::packet`]. Zero means no
    /// packet is loaded.
    cursor: usize,

    /// The message being reassembled. Index 0 holds its id.
    accum: [u8; MESSAGE_CAPACITY],

    /// The end of the reassembled data inside [`Self::accum`]. Zero means no
    /// message is in progress.
    offset: usize,

    /// Where malformed chunks are reported.
    diagnostics: Arc<Diagnostics>,
}

impl Default for PacketExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_ID, Arc::new(Diagnostics::new()))
    }
}

impl PacketExtractor {
    pub fn new(report_id: u8, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            report_id,
            packet: [0; PACKET_LENGTH],
            cursor: 0,
            accum: [0; MESSAGE_CAPACITY],
            offset: 0,
            diagnostics,
        }
    }

    pub fn report_id(&self) -> u8 {
        self.report_id
    }

    /// Whether the current packet was fully processed.
    pub fn needs_packet(&self) -> bool {
        self.cursor == 0
    }

    /// Whether a message is partially reassembled.
    pub fn in_progress(&self) -> bool {
        self.offset != 0
    }

    /// Drops the current packet and any partially reassembled message.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.offset = 0;
    }

    fn packet_data_len(&self) -> usize {
        self.packet[1] as usize
    }

    /// Loads a packet read from the transport.
    ///
    /// Returns `false` if the packet was rejected because of a foreign report
    /// id or an invalid length. A rejected packet does not affect a message in
    /// progress.
    pub fn load(&mut self, packet: &[u8]) -> bool {
        if packet.first() != Some(&self.report_id) {
            return false;
        }

        let data_len = packet.get(1).copied().unwrap_or(0) as usize;
        if data_len > MAX_PACKET_DATA {
            self.diagnostics.bad_data(
                "packet_extract",
                "reported data size exceeds packet capacity",
                data_len as i64,
                MAX_PACKET_DATA as i64,
            );
            return false;
        }

        self.packet = [0; PACKET_LENGTH];
        let len = packet.len().min(PACKET_LENGTH);
        self.packet[..len].copy_from_slice(&packet[..len]);
        self.cursor = 2;
        true
    }

    /// Skips the chunk at the cursor and drops the message in progress.
    fn drop_chunk(&mut self, chunk_len: usize) {
        self.cursor += 2 + chunk_len;
        self.offset = 0;
        if self.cursor >= 2 + self.packet_data_len() {
            self.cursor = 0;
        }
    }

    /// Processes chunks of the loaded packet until a message completes.
    ///
    /// Returns `None` once the packet is exhausted. A message spanning
    /// multiple packets keeps its progress until the next packet is loaded.
    pub fn extract(&mut self) -> Option<ChunkedMessage> {
        while self.cursor != 0 {
            let data_len = self.packet_data_len();

            // The chunk header is as large as the packet header, so a chunk
            // header fits if the cursor does not exceed the data length.
            if self.cursor > data_len {
                self.diagnostics.bad_data(
                    "packet_extract",
                    "chunk end does not match packet end",
                    self.cursor as i64,
                    2 + data_len as i64,
                );
                self.reset();
                break;
            }

            let id = self.packet[self.cursor];
            let flags = self.packet[self.cursor + 1];
            let chunk_len = (flags & LENGTH_MASK) as usize;
            let incomplete = flags & FLAG_INCOMPLETE != 0;
            let continuation = flags & FLAG_CONTINUATION != 0;

            if self.offset != 0 {
                if !continuation {
                    self.diagnostics.bad_data(
                        "packet_extract",
                        "chunk starts a new message while another one is incomplete",
                        0,
                        0,
                    );
                    self.drop_chunk(chunk_len);
                    continue;
                }
                if id != self.accum[0] {
                    self.diagnostics.bad_data(
                        "packet_extract",
                        "chunk id differs from the message it continues",
                        id as i64,
                        self.accum[0] as i64,
                    );
                    self.drop_chunk(chunk_len);
                    continue;
                }
            } else {
                if continuation {
                    self.diagnostics.bad_data(
                        "packet_extract",
                        "chunk continues an already completed message",
                        0,
                        0,
                    );
                    self.drop_chunk(chunk_len);
                    continue;
                }
                self.accum[0] = id;
                self.offset = 2;
            }

            if self.cursor + chunk_len > data_len {
                self.diagnostics.bad_data(
                    "packet_extract",
                    "chunk data exceeds packet length",
                    (self.cursor + chunk_len) as i64,
                    data_len as i64,
                );
                self.reset();
                break;
            }

            let start = self.cursor + 2;
            self.cursor += 2 + chunk_len;
            if self.cursor == 2 + data_len {
                self.cursor = 0;
            }

            if self.offset + chunk_len > MESSAGE_CAPACITY {
                self.diagnostics.bad_data(
                    "packet_extract",
                    "message size exceeds reassembly capacity",
                    (self.offset + chunk_len) as i64,
                    MESSAGE_CAPACITY as i64,
                );
                // Keep counting so the remaining chunks stay in sync.
                self.offset = if incomplete { self.offset + chunk_len } else { 0 };
                continue;
            }

            self.accum[self.offset..self.offset + chunk_len]
                .copy_from_slice(&self.packet[start..start + chunk_len]);
            self.offset += chunk_len;

            if !incomplete {
                let msg = ChunkedMessage {
                    id: self.accum[0],
                    payload: self.accum[2..self.offset].to_vec(),
                };
                self.offset = 0;
                return Some(msg);
            }
        }

        None
    }
}

/// Splits a message into transport packets.
///
/// Every packet carries a single chunk of at most [`MAX_CHUNK_DATA`] bytes. A
/// message without payload still produces one packet.
pub fn encode(report_id: u8, id: u8, payload: &[u8]) -> Vec<[u8; PACKET_LENGTH]> {
    let mut packets = Vec::with_capacity(payload.len().div_ceil(MAX_CHUNK_DATA).max(1));
    let mut offset = 0;

    loop {
        let remaining = payload.len() - offset;
        let data_len = remaining.min(MAX_CHUNK_DATA);

        let mut packet = [0u8; PACKET_LENGTH];
        packet[0] = report_id;
        packet[1] = (2 + data_len) as u8;
        packet[2] = id;
        packet[3] = data_len as u8;
        if remaining > data_len {
            packet[3] |= FLAG_INCOMPLETE;
        }
        if offset != 0 {
            packet[3] |= FLAG_CONTINUATION;
        }
        packet[4..4 + data_len].copy_from_slice(&payload[offset..offset + data_len]);
        packets.push(packet);

        offset += data_len;
        if offset >= payload.len() {
            break;
        }
    }

    packets
}
