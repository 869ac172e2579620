//! The 2D touch subsystem.
//!
//! 2D messages only travel over packet transports. Instructions are
//! acknowledged with an Ack message carrying the instruction's id.

pub mod data;
pub mod rtc;
pub mod update;
pub mod version;

use tracing::trace;

use crate::{
    codec::Wire,
    config::Capability,
    error::{HmiError, Result},
    event::DataEvent,
    framing::ChunkedMessage,
    message::{Gesture2d, InboundId2d, MouseButtons, OutboundId2d, Parameter2d},
    session::{Session, engine::Shared},
};

pub use data::{Data2d, FingerPosition, Fingers, Mouse, Row, RowKind, Rows};
pub use version::VersionInfo2d;

const SET_PARAM_LENGTH: usize = 10;
const PARAM_MIN_LENGTH: usize = 3;
const PARAM_MAX_LENGTH: usize = 6;

/// Builds the payload of a parameter write.
pub fn set_param_payload(param: Parameter2d, arg0: u32, arg1: u32) -> [u8; SET_PARAM_LENGTH] {
    let mut payload = [0u8; SET_PARAM_LENGTH];
    Wire::put_u16(&mut payload, 0, param.0);
    Wire::put_u32(&mut payload, 2, arg0);
    Wire::put_u32(&mut payload, 6, arg1);
    payload
}

/// Routes a complete 2D message to its handler.
pub(crate) fn handle(shared: &Shared, msg: &ChunkedMessage) {
    let caps = shared.config.capabilities;
    let data = caps.has(Capability::Data2d);
    let payload = msg.payload.as_slice();

    let Some(id) = InboundId2d::from_id(msg.id) else {
        trace!(id = msg.id, len = payload.len(), "ignored 2D message");
        return;
    };

    match id {
        InboundId2d::Ack => handle_ack(shared, payload),
        InboundId2d::Parameter => handle_parameter(shared, payload),
        InboundId2d::FwVersion => version::handle(shared, payload),
        InboundId2d::UpdateResponse if caps.has(Capability::Update2d) => {
            update::handle(shared, payload)
        },
        InboundId2d::MutualRaw(row) if data => handle_row(shared, RowKind::MutualRaw(row), payload),
        InboundId2d::MutualCalibrated(row) if data => {
            handle_row(shared, RowKind::MutualCalibrated(row), payload)
        },
        InboundId2d::SelfRaw if data => handle_row(shared, RowKind::SelfRaw, payload),
        InboundId2d::SelfMeasure if data => handle_row(shared, RowKind::SelfCalibrated, payload),
        InboundId2d::FingerPositions if data => {
            let counter = shared.lock_data_2d().apply_fingers(payload, &shared.diagnostics);
            shared.events.emit(DataEvent::Message2d { msg_counter: counter });
        },
        InboundId2d::MouseButtons if data => {
            if let Some(state) = single_byte(shared, "handle_mouse_buttons", payload) {
                let counter = shared
                    .lock_data_2d()
                    .apply_mouse(MouseButtons::from_bits_retain(state));
                shared.events.emit(DataEvent::Message2d { msg_counter: counter });
            }
        },
        InboundId2d::Gesture if data => {
            if let Some(gesture) = single_byte(shared, "handle_gesture", payload) {
                let counter = shared.lock_data_2d().apply_gesture(Gesture2d::from(gesture));
                shared.events.emit(DataEvent::Message2d { msg_counter: counter });
            }
        },
        _ => trace!(?id, len = payload.len(), "ignored 2D message"),
    }
}

/// The only byte of a single byte payload, reporting other sizes.
pub(crate) fn single_byte(shared: &Shared, handler: &'static str, payload: &[u8]) -> Option<u8> {
    match payload {
        [value] => Some(*value),
        _ => {
            shared.diagnostics.bad_data(
                handler,
                "expected message size of 1 byte",
                payload.len() as i64,
                1,
            );
            None
        },
    }
}

fn handle_ack(shared: &Shared, payload: &[u8]) {
    let Some(id) = single_byte(shared, "handle_ack", payload) else {
        return;
    };
    shared
        .pending
        .ack_2d
        .fulfil(|pending| (*pending == id).then_some(()));
}

fn handle_parameter(shared: &Shared, payload: &[u8]) {
    if !(PARAM_MIN_LENGTH..=PARAM_MAX_LENGTH).contains(&payload.len()) {
        shared.diagnostics.bad_data(
            "handle_parameter",
            "expected message size of 3 to 6 bytes",
            payload.len() as i64,
            PARAM_MIN_LENGTH as i64,
        );
        return;
    }

    let param = Wire::u16(payload, 0);
    let value = payload[2..]
        .iter()
        .enumerate()
        .fold(0u32, |value, (i, &b)| value | (b as u32) << (8 * i));

    shared
        .pending
        .param_2d
        .fulfil(|pending| (*pending == param).then_some(value));
}

fn handle_row(shared: &Shared, kind: RowKind, payload: &[u8]) {
    let counter = shared
        .lock_data_2d()
        .apply_row(kind, payload, &shared.diagnostics);
    shared.events.emit(DataEvent::Message2d { msg_counter: counter });
}

impl Session {
    /// Sets a parameter of the 2D subsystem.
    pub fn set_param_2d(&self, param: Parameter2d, arg0: u32, arg1: u32) -> Result<()> {
        self.ensure_open()?;
        let _command = self.shared.command();
        self.shared
            .send_2d(OutboundId2d::SetParam, &set_param_payload(param, arg0, arg1))
    }

    /// Reads a parameter of the 2D subsystem.
    pub fn get_param_2d(&self, param: Parameter2d) -> Result<u32> {
        self.ensure_open()?;
        let _command = self.shared.command();

        let (_pending, rx) = self.shared.pending.param_2d.register(param.0);
        self.shared
            .send_2d(OutboundId2d::GetParam, &param.0.to_le_bytes())?;

        rx.try_recv().map_err(|_| HmiError::MessageMissing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_param_layout() {
        assert_eq!(
            set_param_payload(Parameter2d::OPERATION_MODE, 2, 0xFFFF_FFFF),
            [0x82, 0x00, 2, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }
}
