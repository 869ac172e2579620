//! Session configuration.
//!
//! Optional features of the protocol engine are switched at construction time
//! through [`Capabilities`]. A disabled feature answers its operations with
//! [`HmiError::NotImplemented`](crate::error::HmiError::NotImplemented) and
//! its inbound messages are dropped.

use std::{fmt, time::Duration};

/// How incoming messages are pulled from the transport.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ReceiveMode {
    /// The calling thread reads from the transport whenever it retrieves data
    /// or waits for a response.
    #[default]
    Polling,

    /// A reader thread owns the transport's receive path and dispatches
    /// messages as they arrive. Callers only wait for results.
    Background,
}

/// An optional feature of the engine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Capability {
    Data3d,
    Rtc3d,
    FwVersion3d,
    Update3d,
    Data2d,
    Rtc2d,
    Update2d,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Data3d => "3D data retrieval",
            Self::Rtc3d => "3D runtime control",
            Self::FwVersion3d => "3D firmware version query",
            Self::Update3d => "3D firmware update",
            Self::Data2d => "2D data retrieval",
            Self::Rtc2d => "2D runtime control",
            Self::Update2d => "2D bootloader",
        })
    }
}

/// The set of enabled features. Everything is enabled by default.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Capabilities {
    pub data_3d: bool,
    pub rtc_3d: bool,
    pub fw_version_3d: bool,
    pub update_3d: bool,
    pub data_2d: bool,
    pub rtc_2d: bool,
    pub update_2d: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            data_3d: true,
            rtc_3d: true,
            fw_version_3d: true,
            update_3d: true,
            data_2d: true,
            rtc_2d: true,
            update_2d: true,
        }
    }
}

impl Capabilities {
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Data3d => self.data_3d,
            Capability::Rtc3d => self.rtc_3d,
            Capability::FwVersion3d => self.fw_version_3d,
            Capability::Update3d => self.update_3d,
            Capability::Data2d => self.data_2d,
            Capability::Rtc2d => self.rtc_2d,
            Capability::Update2d => self.update_2d,
        }
    }
}

/// Retry ceiling of 3D instructions.
pub const RETRIES_3D: usize = 3;

/// Retry ceiling of acknowledged 2D instructions.
pub const RETRIES_2D: usize = 5;

/// Configuration of a [`Session`](crate::session::Session).
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// Who reads from the transport.
    pub receive_mode: ReceiveMode,

    /// How long a single attempt of an instruction waits for its response.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub command_timeout: Duration,

    /// How long a 2D bootloader command waits for its update response.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub update_timeout: Duration,

    /// How long a 3D firmware update waits for the version info following a
    /// reset. The device decides between bootloader and firmware based on
    /// this window, so it should not be changed without reason.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub version_wait: Duration,

    /// How long to wait for a loader update to finish.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub loader_timeout: Duration,

    /// How long a data retrieval waits for new data if none is buffered.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub retrieve_wait: Duration,

    /// The read slice of the background reader thread. Bounds how long
    /// closing a session takes.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub reader_poll: Duration,

    /// Written to signal channels beyond the active electrode count.
    pub undefined_signal: f32,

    /// The enabled features.
    pub capabilities: Capabilities,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            receive_mode: ReceiveMode::Polling,
            command_timeout: Duration::from_millis(100),
            update_timeout: Duration::from_millis(100),
            version_wait: Duration::from_millis(100),
            loader_timeout: Duration::from_secs(20),
            retrieve_wait: Duration::from_millis(20),
            reader_poll: Duration::from_millis(20),
            undefined_signal: 0.0,
            capabilities: Capabilities::default(),
        }
    }
}

/// Durations are written as whole milliseconds in configuration files.
#[cfg(feature = "serde")]
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
