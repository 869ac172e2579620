//! Couples a raw transport with the matching frame extractor.
//!
//! The channel turns transport input into classified messages of either
//! subsystem and frames outgoing messages for the transport in use.

use std::{
    error::Error,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::trace;

use crate::{
    diagnostics::Diagnostics,
    framing::{
        packet::{self, ChunkedMessage, PACKET_LENGTH, PacketExtractor},
        stream::{self, StreamExtractor},
    },
    message::OutboundId2d,
};

/// The error type returned by transport implementations.
pub type TransportError = Box<dyn Error + Send + Sync>;

/// The size of the buffer stream input is read into.
const STREAM_READ_CAPACITY: usize = 1024;

/// The 2D message id carrying 3D messages on packet transports.
const SUBSYSTEM_3D_ID: u8 = 0xFE;

/// Payload of the reset instruction sent through the 2D subsystem.
const RESET_PAYLOAD: [u8; 6] = [0x11, 0x00, 0x00, 0x00, 0x00, 0x00];

/// How messages are framed on a transport.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    /// A byte stream with sync-delimited messages, such as a serial port.
    /// Only carries 3D messages.
    Stream,

    /// Fixed-size packets carrying message chunks, such as a HID interface.
    Packet {
        /// The report id written to and required on every packet.
        report_id: u8,
    },
}

/// Represents a raw, bidirectional device connection.
///
/// Any type this trait is implemented for can be used to talk to a device.
/// Enumeration and configuration of the underlying device happen in the
/// implementation.
pub trait Transport: Send + Sync + 'static {
    /// How messages are framed on this transport.
    fn kind(&self) -> TransportKind;

    /// Opens the connection.
    fn open(&self) -> Result<(), TransportError>;

    /// Closes the connection. Closing a closed transport does nothing.
    fn close(&self);

    /// Writes raw bytes to the transport.
    ///
    /// Packet transports receive exactly one packet per call.
    fn write(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Reads raw bytes into `buf`.
    ///
    /// Without a timeout the call must not block. With a timeout it may block
    /// up to that duration. Returns the number of bytes read, zero if nothing
    /// arrived.
    ///
    /// Packet transports return exactly one packet per call.
    fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, TransportError>;

    /// Pulses a hardware reset line, if the transport has one.
    ///
    /// Returns `None` if unsupported, in which case a reset instruction is
    /// sent as a message instead.
    fn reset(&self) -> Option<Result<(), TransportError>> {
        None
    }
}

/// A message received on a channel, classified by subsystem.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Inbound {
    /// A complete 3D message, starting with its size byte.
    Sensor3d(Vec<u8>),

    /// A 2D message with its id and payload.
    Touch2d(ChunkedMessage),
}

/// The frame extractor matching the transport kind.
#[derive(Debug)]
enum Framing {
    Stream(StreamExtractor),
    Packet(PacketExtractor),
}

/// Represents a device channel.
pub struct Channel {
    /// The underlying transport.
    transport: Arc<dyn Transport>,

    /// The kind of the transport, fixed at construction.
    kind: TransportKind,

    /// The receive-side framing state.
    ///
    /// Only one thread receives at a time, so this is held across reads.
    framing: Mutex<Framing>,

    /// Where malformed messages are reported.
    diagnostics: Arc<Diagnostics>,
}

impl Channel {
    pub fn new(transport: Arc<dyn Transport>, diagnostics: Arc<Diagnostics>) -> Self {
        let kind = transport.kind();
        let framing = match kind {
            TransportKind::Stream => {
                Framing::Stream(StreamExtractor::new(Arc::clone(&diagnostics)))
            },
            TransportKind::Packet { report_id } => {
                Framing::Packet(PacketExtractor::new(report_id, Arc::clone(&diagnostics)))
            },
        };

        Self {
            transport,
            kind,
            framing: Mutex::new(framing),
            diagnostics,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Drops all partially received data.
    pub fn reset_framing(&self) {
        match &mut *self.framing.lock().unwrap_or_else(PoisonError::into_inner) {
            Framing::Stream(extractor) => extractor.reset(),
            Framing::Packet(extractor) => extractor.reset(),
        }
    }

    /// Receives the next complete message.
    ///
    /// Without a deadline, only data that is already available is consumed.
    /// With a deadline, the call blocks until a message completes or the
    /// deadline passes. Returns `Ok(None)` if no message completed.
    pub fn receive(&self, deadline: Option<Instant>) -> Result<Option<Inbound>, ChannelError> {
        let mut framing = self.framing.lock().unwrap_or_else(PoisonError::into_inner);

        match &mut *framing {
            Framing::Stream(extractor) => self.receive_stream(extractor, deadline),
            Framing::Packet(extractor) => self.receive_packet(extractor, deadline),
        }
    }

    /// The read timeout for the next attempt, `None` once the deadline passed.
    fn remaining(deadline: Instant) -> Option<Duration> {
        let now = Instant::now();
        (now < deadline).then(|| deadline - now)
    }

    fn receive_stream(
        &self,
        extractor: &mut StreamExtractor,
        deadline: Option<Instant>,
    ) -> Result<Option<Inbound>, ChannelError> {
        let mut buf = [0u8; STREAM_READ_CAPACITY];

        loop {
            if let Some(msg) = extractor.extract() {
                trace!(len = msg.len(), id = msg[3], "received stream message");
                return Ok(Some(Inbound::Sensor3d(msg)));
            }

            let timeout = match deadline {
                Some(deadline) => match Self::remaining(deadline) {
                    Some(timeout) => Some(timeout),
                    None => return Ok(None),
                },
                None => None,
            };

            let len = self.transport.read(&mut buf, timeout)?;
            if len == 0 {
                if deadline.is_none() {
                    return Ok(None);
                }
                continue;
            }
            extractor.feed(&buf[..len]);
        }
    }

    fn receive_packet(
        &self,
        extractor: &mut PacketExtractor,
        deadline: Option<Instant>,
    ) -> Result<Option<Inbound>, ChannelError> {
        let mut buf = [0u8; PACKET_LENGTH];

        loop {
            while let Some(msg) = extractor.extract() {
                if msg.id != SUBSYSTEM_3D_ID {
                    trace!(id = msg.id, len = msg.payload.len(), "received 2D message");
                    return Ok(Some(Inbound::Touch2d(msg)));
                }

                // 3D messages travel without their size byte.
                let mut rebuilt = Vec::with_capacity(msg.payload.len() + 1);
                rebuilt.push((msg.payload.len() + 1) as u8);
                rebuilt.extend_from_slice(&msg.payload);
                if rebuilt.len() < stream::HEADER_LENGTH {
                    self.diagnostics.bad_data(
                        "receive_packet",
                        "3D message shorter than its header",
                        rebuilt.len() as i64,
                        stream::HEADER_LENGTH as i64,
                    );
                    continue;
                }
                trace!(len = rebuilt.len(), id = rebuilt[3], "received 3D message");
                return Ok(Some(Inbound::Sensor3d(rebuilt)));
            }

            let timeout = match deadline {
                Some(deadline) => match Self::remaining(deadline) {
                    Some(timeout) => Some(timeout),
                    None => return Ok(None),
                },
                None => None,
            };

            let len = self.transport.read(&mut buf, timeout)?;
            if len == 0 {
                if deadline.is_none() {
                    return Ok(None);
                }
                continue;
            }
            extractor.load(&buf[..len]);
        }
    }

    /// Writes a 3D message, starting with its size byte.
    pub fn write_3d(&self, msg: &[u8]) -> Result<(), ChannelError> {
        match self.kind {
            TransportKind::Stream => {
                self.transport.write(&stream::encode(msg))?;
                Ok(())
            },
            TransportKind::Packet { .. } => {
                // The receiving side rebuilds the size byte.
                self.write_2d(OutboundId2d::Subsystem3d, msg.get(1..).unwrap_or_default())
            },
        }
    }

    /// Writes a 2D message. Only packet transports carry 2D messages.
    pub fn write_2d(&self, id: OutboundId2d, payload: &[u8]) -> Result<(), ChannelError> {
        let TransportKind::Packet { report_id } = self.kind else {
            return Err(ChannelError::Unsupported2d);
        };

        for packet in packet::encode(report_id, id.into(), payload) {
            self.transport.write(&packet)?;
        }
        Ok(())
    }

    /// Resets the 3D subsystem.
    ///
    /// Uses the hardware reset line if the transport has one, a reset
    /// instruction otherwise.
    pub fn reset(&self) -> Result<(), ChannelError> {
        if let Some(res) = self.transport.reset() {
            return res.map_err(ChannelError::Transport);
        }

        match self.kind {
            TransportKind::Stream => {
                self.transport.write(&stream::RESET_SEQUENCE)?;
                Ok(())
            },
            TransportKind::Packet { .. } => self.write_2d(OutboundId2d::Reset3d, &RESET_PAYLOAD),
        }
    }
}

/// Represents an error that occurred while interacting with a device channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Indicates that the transport implementation returned an error.
    #[error("the transport implementation returned an error")]
    Transport(#[from] TransportError),

    /// Indicates that a 2D message was sent over a transport only carrying 3D
    /// messages.
    #[error("the transport does not carry 2D messages")]
    Unsupported2d,
}
