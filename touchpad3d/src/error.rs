//! Errors surfaced by session operations.
//!
//! Every error maps to one of the integer outcome codes in [`codes`], which is
//! what applications bridging to other languages report.

use num_enum::{FromPrimitive, IntoPrimitive};
use thiserror::Error;

use crate::{
    channel::{ChannelError, TransportError},
    config::Capability,
};

/// Integer outcome codes.
pub mod codes {
    pub const NO_ERROR: i32 = 0;
    pub const NO_DATA: i32 = -1;
    pub const SYSTEM_3D: i32 = -8;
    pub const NO_RESPONSE: i32 = -9;
    pub const MESSAGE_MISSING: i32 = -10;
    pub const BOOTLOADER_2D: i32 = -11;
    pub const IO: i32 = -16;
    pub const IO_OPEN: i32 = -18;
    pub const BAD_PARAMETER: i32 = -32;
    pub const NOT_IMPLEMENTED: i32 = -48;
}

pub type Result<T, E = HmiError> = std::result::Result<T, E>;

/// An error code reported by the 3D subsystem in a System-Status message.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u16)]
pub enum SystemError {
    NoError = 0x00,
    UnknownCommand = 0x01,
    InvalidSessionId = 0x02,
    InvalidCrc = 0x03,
    InvalidLength = 0x04,
    InvalidAddress = 0x05,
    InvalidFunction = 0x06,
    ContentMismatch = 0x08,
    WrongParameterAddress = 0x0B,
    WrongParameterValue = 0x14,
    UnknownParameterId = 0x15,
    /// The device woke up from sleep. This is reported unsolicited.
    WakeupHappened = 0x1A,
    LoaderUpdateStarted = 0x80,
    LoaderUpdateFinished = 0x81,
    #[num_enum(catch_all)]
    Unknown(u16),
}

/// An error code reported by the 2D bootloader.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum BootloaderError {
    NoError = 0,
    FlashErase = 6,
    ChecksumMismatch = 7,
    BlockCount = 8,
    FlashWrite = 9,
    OutOfRangeAddress = 10,
    Locked = 11,
    UnrecognizedCommand = 12,
    NumberOfBytes = 13,
    HexFile = 14,
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Represents an error returned by a session operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HmiError {
    /// Indicates that the device did not respond within the timeout, on every
    /// attempt.
    #[error("the device did not respond")]
    NoResponse,

    /// Indicates that the 3D subsystem answered with an error code.
    #[error("the 3D subsystem reported {0:?}")]
    System(SystemError),

    /// Indicates that the 2D bootloader answered with an error code.
    #[error("the 2D bootloader reported {0:?}")]
    Bootloader(BootloaderError),

    /// Indicates that an instruction was acknowledged but the data message it
    /// requested never arrived.
    #[error("the requested message was acknowledged but never received")]
    MessageMissing,

    /// Indicates that reading from or writing to the transport failed.
    #[error("the transport channel failed")]
    Channel(#[from] ChannelError),

    /// Indicates that the transport could not be opened.
    #[error("the transport could not be opened")]
    Open(#[source] TransportError),

    /// Indicates that the operation requires an open connection.
    #[error("the session is not connected")]
    NotConnected,

    /// Indicates that an argument was rejected before anything was sent.
    #[error("bad parameter: {0}")]
    BadParameter(&'static str),

    /// Indicates that the feature required by the operation is disabled.
    #[error("{0} is not available in this session")]
    NotImplemented(Capability),
}

impl HmiError {
    /// The integer outcome code of the error.
    pub fn code(&self) -> i32 {
        match self {
            Self::NoResponse => codes::NO_RESPONSE,
            Self::System(_) => codes::SYSTEM_3D,
            Self::Bootloader(_) => codes::BOOTLOADER_2D,
            Self::MessageMissing => codes::MESSAGE_MISSING,
            Self::Channel(_) | Self::NotConnected => codes::IO,
            Self::Open(_) => codes::IO_OPEN,
            Self::BadParameter(_) => codes::BAD_PARAMETER,
            Self::NotImplemented(_) => codes::NOT_IMPLEMENTED,
        }
    }
}
