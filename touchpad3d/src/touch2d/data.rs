//! Decoding of 2D data messages and publishing of 2D snapshots.

use crate::{
    codec::{Cursor, Wire},
    diagnostics::Diagnostics,
    message::{Gesture2d, MouseButtons},
};

/// The number of values in a measurement row.
pub const ROW_LENGTH: usize = 16;

/// The number of rows of a mutual measurement.
pub const MUTUAL_ROWS: usize = 16;

/// The maximum number of fingers tracked at once.
pub const MAX_FINGERS: usize = 10;

const FINGER_ENTRY_LENGTH: usize = 4;

/// One row of measurement values.
pub type Row = [u16; ROW_LENGTH];

/// Identifies the row a data message updates.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RowKind {
    SelfRaw,
    SelfCalibrated,
    MutualRaw(u8),
    MutualCalibrated(u8),
}

/// Measurement values of the electrode matrix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Rows {
    pub self_raw: Row,
    pub self_calibrated: Row,
    pub mutual_raw: [Row; MUTUAL_ROWS],
    pub mutual_calibrated: [Row; MUTUAL_ROWS],
}

impl Rows {
    fn row_mut(&mut self, kind: RowKind) -> Option<&mut Row> {
        match kind {
            RowKind::SelfRaw => Some(&mut self.self_raw),
            RowKind::SelfCalibrated => Some(&mut self.self_calibrated),
            RowKind::MutualRaw(i) => self.mutual_raw.get_mut(i as usize),
            RowKind::MutualCalibrated(i) => self.mutual_calibrated.get_mut(i as usize),
        }
    }
}

/// The position of one finger.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FingerPosition {
    pub finger_id: u8,
    pub x: u16,
    pub y: u16,
}

/// The fingers currently on the touch surface.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct Fingers {
    count: usize,
    entries: [FingerPosition; MAX_FINGERS],
}

impl Fingers {
    pub fn as_slice(&self) -> &[FingerPosition] {
        &self.entries[..self.count]
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Fingers {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.as_slice())
    }
}

/// State of the emulated mouse.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Mouse {
    /// Buttons currently held.
    pub buttons: MouseButtons,

    /// Buttons pressed since the last publish.
    pub pressed: MouseButtons,

    /// Buttons released since the last publish.
    pub released: MouseButtons,
}

/// A snapshot of everything the 2D subsystem reported.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Data2d {
    pub rows: Rows,
    pub fingers: Fingers,
    pub mouse: Mouse,

    /// The last gesture, reset once it was published.
    pub gesture: Gesture2d,

    /// The message counter value at the last gesture.
    pub last_gesture: u32,

    /// Counts data messages. Wraps around.
    pub msg_counter: u32,
}

/// The accumulation buffer of the 2D subsystem.
///
/// Every `apply_*` method advances the message counter and returns its new
/// value.
#[derive(Clone, Debug, Default)]
pub struct Accumulator2d {
    pub data: Data2d,
}

impl Accumulator2d {
    pub fn new() -> Self {
        Self::default()
    }

    fn advance(&mut self) -> u32 {
        self.data.msg_counter = self.data.msg_counter.wrapping_add(1);
        self.data.msg_counter
    }

    /// Applies a data row message.
    ///
    /// The payload starts with a mask selecting the row slots that follow.
    /// Unselected slots read as zero. If the payload ends before the mask is
    /// satisfied, the remaining slots keep their values.
    pub fn apply_row(&mut self, kind: RowKind, payload: &[u8], diagnostics: &Diagnostics) -> u32 {
        let counter = self.advance();
        let Some(row) = self.data.rows.row_mut(kind) else {
            return counter;
        };

        let mask = if payload.len() >= 2 { Wire::u16(payload, 0) } else { 0 };
        let mut cursor = Cursor::new(payload, 2);
        for (i, slot) in row.iter_mut().enumerate() {
            if mask & (1 << i) == 0 {
                *slot = 0;
                continue;
            }
            if !cursor.has(2) {
                diagnostics.bad_data(
                    "handle_data_row",
                    "mask does not fit the available entries",
                    mask as i64,
                    (payload.len().saturating_sub(2) / 2) as i64,
                );
                break;
            }
            *slot = cursor.u16();
        }

        counter
    }

    /// Applies a finger position message.
    pub fn apply_fingers(&mut self, payload: &[u8], diagnostics: &Diagnostics) -> u32 {
        let counter = self.advance();

        let mut count = payload.len() / FINGER_ENTRY_LENGTH;
        if count > MAX_FINGERS {
            diagnostics.bad_data(
                "handle_finger_positions",
                "message contains more than 10 finger positions",
                count as i64,
                MAX_FINGERS as i64,
            );
            count = MAX_FINGERS;
        }

        let fingers = &mut self.data.fingers;
        for (i, entry) in fingers.entries.iter_mut().take(count).enumerate() {
            let v = Wire::u32(payload, FINGER_ENTRY_LENGTH * i);
            *entry = FingerPosition {
                finger_id: (v & 0xFF) as u8,
                x: ((v >> 20) & 0xFFF) as u16,
                y: ((v >> 8) & 0xFFF) as u16,
            };
        }
        fingers.count = count;

        counter
    }

    /// Applies a mouse button state. Edges accumulate until published.
    pub fn apply_mouse(&mut self, state: MouseButtons) -> u32 {
        let counter = self.advance();
        let mouse = &mut self.data.mouse;
        let old = mouse.buttons;
        mouse.buttons = state;
        mouse.pressed |= state & !old;
        mouse.released |= old & !state;
        counter
    }

    pub fn apply_gesture(&mut self, gesture: Gesture2d) -> u32 {
        let counter = self.advance();
        self.data.gesture = gesture;
        self.data.last_gesture = counter;
        counter
    }

    /// Copies the accumulated state into a publishable snapshot.
    ///
    /// Returns `None` if no message arrived since `last_counter`. Mouse edges
    /// are consumed by the snapshot.
    pub fn publish(&mut self, last_counter: u32) -> Option<Data2d> {
        let current = self.data.msg_counter;
        let count = current.wrapping_sub(last_counter);
        if count == 0 {
            return None;
        }

        let mut result = self.data;
        self.data.mouse.pressed = MouseButtons::empty();
        self.data.mouse.released = MouseButtons::empty();

        if current.wrapping_sub(result.last_gesture) >= count {
            result.gesture = Gesture2d::NoGesture;
        }

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_payload(mask: u16, values: &[u16]) -> Vec<u8> {
        let mut payload = mask.to_le_bytes().to_vec();
        for v in values {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        payload
    }

    #[test]
    fn row_mask_selects_slots() {
        let diag = Diagnostics::new();
        let mut acc = Accumulator2d::new();
        acc.data.rows.self_raw = [9; ROW_LENGTH];

        acc.apply_row(RowKind::SelfRaw, &row_payload(0b1010_0000_0000_0001, &[1, 2, 3]), &diag);

        let mut expected = [0; ROW_LENGTH];
        expected[0] = 1;
        expected[13] = 2;
        expected[15] = 3;
        assert_eq!(acc.data.rows.self_raw, expected);
        assert_eq!(acc.data.msg_counter, 1);
        assert_eq!(diag.malformed_count(), 0);
    }

    #[test]
    fn short_row_stops_early() {
        let diag = Diagnostics::new();
        let mut acc = Accumulator2d::new();
        acc.data.rows.mutual_raw[3] = [7; ROW_LENGTH];

        acc.apply_row(RowKind::MutualRaw(3), &row_payload(0b1110, &[5, 6]), &diag);

        let row = acc.data.rows.mutual_raw[3];
        assert_eq!(row[..4], [0, 5, 6, 7]);
        assert_eq!(row[4..], [7; ROW_LENGTH - 4]);
        assert_eq!(diag.malformed_count(), 1);
        assert_eq!(acc.data.msg_counter, 1);
    }

    #[test]
    fn finger_positions_are_capped() {
        let diag = Diagnostics::new();
        let mut acc = Accumulator2d::new();

        let entry = (0x123u32 << 20) | (0x456 << 8) | 2;
        let payload: Vec<u8> = (0..12).flat_map(|_| entry.to_le_bytes()).collect();
        acc.apply_fingers(&payload, &diag);

        assert_eq!(acc.data.fingers.len(), MAX_FINGERS);
        assert_eq!(
            acc.data.fingers.as_slice()[9],
            FingerPosition {
                finger_id: 2,
                x: 0x123,
                y: 0x456
            }
        );
        assert_eq!(diag.malformed_count(), 1);

        acc.apply_fingers(&[], &diag);
        assert!(acc.data.fingers.is_empty());
    }

    #[test]
    fn mouse_edges_accumulate_until_published() {
        let mut acc = Accumulator2d::new();
        acc.apply_mouse(MouseButtons::LEFT);
        acc.apply_mouse(MouseButtons::RIGHT);

        let result = acc.publish(0).unwrap();
        assert_eq!(result.mouse.buttons, MouseButtons::RIGHT);
        assert_eq!(result.mouse.pressed, MouseButtons::LEFT | MouseButtons::RIGHT);
        assert_eq!(result.mouse.released, MouseButtons::LEFT);

        acc.apply_mouse(MouseButtons::RIGHT);
        let result = acc.publish(result.msg_counter).unwrap();
        assert!(result.mouse.pressed.is_empty());
        assert!(result.mouse.released.is_empty());
    }

    #[test]
    fn published_gesture_is_one_shot() {
        let diag = Diagnostics::new();
        let mut acc = Accumulator2d::new();
        acc.apply_gesture(Gesture2d::FlickLeft);

        let first = acc.publish(0).unwrap();
        assert_eq!(first.gesture, Gesture2d::FlickLeft);
        assert!(acc.publish(first.msg_counter).is_none());

        acc.apply_row(RowKind::SelfCalibrated, &row_payload(0, &[]), &diag);
        let second = acc.publish(first.msg_counter).unwrap();
        assert_eq!(second.gesture, Gesture2d::NoGesture);
        assert_eq!(second.last_gesture, 1);
    }
}
