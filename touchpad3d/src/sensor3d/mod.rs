//! The 3D gesture subsystem.
//!
//! Every 3D message starts with a four byte header:
//!
//! | offset | size | content                 |
//! |--------|------|-------------------------|
//! | 0      | 1    | total message size      |
//! | 1      | 2    | reserved                |
//! | 3      | 1    | message id              |
//!
//! Instructions are acknowledged with a System-Status message naming the
//! instruction's message id and an error code.

pub mod data;
pub mod rtc;
pub mod update;

use tracing::trace;

use crate::{
    codec::Wire,
    config::Capability,
    error::{HmiError, Result, SystemError},
    event::DataEvent,
    message::{MessageId3d, Parameter3d, Trigger},
    session::{Session, engine::Shared},
};

pub use data::{
    AirWheel, Calibration, Frequency, Gesture, NoisePower, Position, SensorData, Signal, Touch,
};

/// The size of the 3D message header.
pub const HEADER_LENGTH: usize = 4;

/// The size of the version string carried by version info messages.
pub const VERSION_LENGTH: usize = 120;

const STATUS_LENGTH: usize = 16;
const VERSION_INFO_LENGTH: usize = 132;
const VERSION_OFFSET: usize = 12;
const RUNTIME_PARAMETER_LENGTH: usize = 16;
const REQUEST_LENGTH: usize = 12;

/// Firmware version info reported by the 3D subsystem.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VersionInfo3d {
    /// Zero once a valid firmware runs. The loader reports other values.
    pub fw_valid: u8,

    /// The version string, padded with zero bytes.
    pub version: Vec<u8>,
}

impl VersionInfo3d {
    /// The version string up to its first zero byte.
    pub fn version_str(&self) -> String {
        let end = self
            .version
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.version.len());
        String::from_utf8_lossy(&self.version[..end]).into_owned()
    }
}

/// Builds a Request-Message instruction asking the device to send the
/// message `id`.
pub fn request_message(id: u8, param: u32) -> [u8; REQUEST_LENGTH] {
    let mut msg = [0u8; REQUEST_LENGTH];
    msg[0] = REQUEST_LENGTH as u8;
    msg[3] = MessageId3d::RequestMessage.into();
    msg[4] = id;
    Wire::put_u32(&mut msg, 8, param);
    msg
}

/// Builds a Set-Runtime-Parameter instruction.
pub fn set_param_message(
    param: Parameter3d,
    arg0: u32,
    arg1: u32,
) -> [u8; RUNTIME_PARAMETER_LENGTH] {
    let mut msg = [0u8; RUNTIME_PARAMETER_LENGTH];
    msg[0] = RUNTIME_PARAMETER_LENGTH as u8;
    msg[3] = MessageId3d::SetRuntimeParameter.into();
    Wire::put_u16(&mut msg, 4, param.0);
    Wire::put_u32(&mut msg, 8, arg0);
    Wire::put_u32(&mut msg, 12, arg1);
    msg
}

/// Routes a complete 3D message to its handler.
pub(crate) fn handle(shared: &Shared, msg: &[u8]) {
    let caps = shared.config.capabilities;

    match MessageId3d::try_from(Wire::u8(msg, 3)) {
        Ok(MessageId3d::SystemStatus) => handle_system_status(shared, msg),
        Ok(MessageId3d::FwVersionInfo)
            if caps.has(Capability::FwVersion3d) || caps.has(Capability::Update3d) =>
        {
            handle_version_info(shared, msg)
        },
        Ok(MessageId3d::SensorDataOutput) if caps.has(Capability::Data3d) => {
            handle_sensor_data(shared, msg)
        },
        Ok(MessageId3d::SetRuntimeParameter) => handle_runtime_parameter(shared, msg),
        _ => trace!(id = Wire::u8(msg, 3), len = msg.len(), "ignored 3D message"),
    }
}

fn handle_system_status(shared: &Shared, msg: &[u8]) {
    if msg.len() != STATUS_LENGTH {
        shared.diagnostics.bad_data(
            "handle_system_status",
            "expected message size of 16 bytes",
            msg.len() as i64,
            STATUS_LENGTH as i64,
        );
        return;
    }

    let id = Wire::u8(msg, 4);
    let code = SystemError::from(Wire::u16(msg, 6));

    // A wakeup is reported unsolicited and ends whatever wait is in progress.
    let wakeup = code == SystemError::WakeupHappened;
    let delivered = shared
        .pending
        .status_3d
        .fulfil(|pending| (*pending == id || wakeup).then_some(code));

    if delivered || wakeup {
        shared.record_system_error(code);
    }
}

fn handle_version_info(shared: &Shared, msg: &[u8]) {
    if msg.len() != VERSION_INFO_LENGTH {
        shared.diagnostics.bad_data(
            "handle_version_info",
            "expected message size of 132 bytes",
            msg.len() as i64,
            VERSION_INFO_LENGTH as i64,
        );
        return;
    }

    let info = VersionInfo3d {
        fw_valid: Wire::u8(msg, 4),
        version: msg[VERSION_OFFSET..].to_vec(),
    };
    trace!(fw_valid = info.fw_valid, "received 3D version info");
    shared.pending.version_3d.fulfil(|_| Some(info));
}

fn handle_sensor_data(shared: &Shared, msg: &[u8]) {
    let config = data::output_config(msg);
    let required = data::required_length(config);
    if msg.len() < required {
        shared.diagnostics.bad_data(
            "handle_sensor_data",
            "message shorter than its output configuration",
            msg.len() as i64,
            required as i64,
        );
        return;
    }

    let frame_counter = shared
        .lock_data_3d()
        .apply(msg, shared.config.undefined_signal);
    shared.events.emit(DataEvent::Frame3d { frame_counter });
}

fn handle_runtime_parameter(shared: &Shared, msg: &[u8]) {
    if msg.len() < RUNTIME_PARAMETER_LENGTH {
        shared.diagnostics.bad_data(
            "handle_runtime_parameter",
            "expected message size of 16 bytes",
            msg.len() as i64,
            RUNTIME_PARAMETER_LENGTH as i64,
        );
        return;
    }

    let param = Wire::u16(msg, 4);
    let args = (Wire::u32(msg, 8), Wire::u32(msg, 12));
    shared
        .pending
        .param_3d
        .fulfil(|pending| (*pending == param).then_some(args));
}

impl Session {
    /// Sends a raw 3D instruction and waits for its acknowledgement.
    ///
    /// The message must start with the 3D header. The instruction is resent
    /// up to three times if it is not acknowledged with success.
    pub fn send_message_3d(&self, msg: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if msg.len() < HEADER_LENGTH || msg[0] as usize != msg.len() {
            return Err(HmiError::BadParameter("message size does not match its header"));
        }

        let _command = self.shared.command();
        self.shared.send_3d(msg)
    }

    /// Asks the 3D subsystem to send the message `id`.
    pub fn request_message_3d(&self, id: u8, param: u32) -> Result<()> {
        self.ensure_open()?;
        let _command = self.shared.command();
        self.shared.send_3d(&request_message(id, param))
    }

    /// Sets a runtime parameter of the 3D subsystem.
    pub fn set_param_3d(&self, param: Parameter3d, arg0: u32, arg1: u32) -> Result<()> {
        self.ensure_open()?;
        let _command = self.shared.command();
        self.shared.send_3d(&set_param_message(param, arg0, arg1))
    }

    /// Reads a runtime parameter of the 3D subsystem.
    ///
    /// Returns both arguments of the parameter.
    pub fn get_param_3d(&self, param: Parameter3d) -> Result<(u32, u32)> {
        self.ensure_open()?;
        let _command = self.shared.command();

        let (_pending, rx) = self.shared.pending.param_3d.register(param.0);
        self.shared.send_3d(&request_message(
            MessageId3d::SetRuntimeParameter.into(),
            param.0 as u32,
        ))?;

        // The parameter is sent before the acknowledgement.
        rx.try_recv().map_err(|_| HmiError::MessageMissing)
    }

    /// Triggers an action of the 3D subsystem.
    pub fn trigger_action(&self, action: Trigger) -> Result<()> {
        self.set_param_3d(Parameter3d::TRIGGER, u16::from(action) as u32, 0)
    }

    /// Queries the version info of the running firmware.
    pub fn fw_version_3d(&self) -> Result<VersionInfo3d> {
        self.require(Capability::FwVersion3d)?;
        let _command = self.shared.command();

        let (_pending, rx) = self.shared.pending.version_3d.register(());
        self.shared.send_3d(&request_message(
            MessageId3d::FwVersionInfo.into(),
            0,
        ))?;

        rx.try_recv().map_err(|_| HmiError::MessageMissing)
    }

    /// Copies the firmware version string into `buf`.
    ///
    /// At most [`VERSION_LENGTH`] bytes are written. Returns the number of
    /// bytes written.
    pub fn query_fw_version_3d(&self, buf: &mut [u8]) -> Result<usize> {
        let info = self.fw_version_3d()?;
        let len = buf.len().min(info.version.len());
        buf[..len].copy_from_slice(&info.version[..len]);
        Ok(len)
    }

    /// Resets the 3D subsystem.
    pub fn reset_3d(&self) -> Result<()> {
        self.ensure_open()?;
        let _command = self.shared.command();
        self.shared.reset_3d()
    }
}
