//! Message identifiers, parameter identifiers and flag sets of both
//! subsystems.
//!
//! The 2D subsystem uses separate identifier tables for messages sent to and
//! received from the device. They share numeric values with different
//! meanings (`0xFF` is both "query version" and "version info", `0xFD` is
//! "3D passthrough" outbound but "self measurement" inbound), so they are kept
//! in two distinct types.

use bitflags::bitflags;
use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};

/// Identifies a message of the 3D subsystem.
///
/// The id is stored at offset 3 of every 3D message.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum MessageId3d {
    RequestMessage = 0x06,
    SystemStatus = 0x15,
    FwUpdateStart = 0x80,
    FwUpdateBlock = 0x81,
    FwUpdateCompleted = 0x82,
    FwVersionInfo = 0x83,
    SensorDataOutput = 0x91,
    SetRuntimeParameter = 0xA2,
}

/// Identifies a message received from the 2D subsystem.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum InboundId2d {
    UpdateResponse,
    Parameter,
    /// A row of raw mutual measurements. Holds the row index.
    MutualRaw(u8),
    /// A row of calibrated mutual measurements. Holds the row index.
    MutualCalibrated(u8),
    Ack,
    MouseButtons,
    Gesture,
    FingerPositions,
    SelfRaw,
    SelfMeasure,
    Subsystem3d,
    FwVersion,
}

impl InboundId2d {
    pub const MUTUAL_RAW_FIRST: u8 = 0xD0;
    pub const MUTUAL_CAL_FIRST: u8 = 0xE0;

    /// Maps a wire id to its meaning. Unknown ids map to `None`.
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0x55 => Self::UpdateResponse,
            0xCF => Self::Parameter,
            0xD0..=0xDF => Self::MutualRaw(id - Self::MUTUAL_RAW_FIRST),
            0xE0..=0xEF => Self::MutualCalibrated(id - Self::MUTUAL_CAL_FIRST),
            0xF0 => Self::Ack,
            0xF6 => Self::MouseButtons,
            0xF7 => Self::Gesture,
            0xF8 => Self::FingerPositions,
            0xFA => Self::SelfRaw,
            0xFD => Self::SelfMeasure,
            0xFE => Self::Subsystem3d,
            0xFF => Self::FwVersion,
            _ => return None,
        })
    }
}

/// Identifies a message sent to the 2D subsystem.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum OutboundId2d {
    Update = 0x55,
    SetParam = 0xE0,
    GetParam = 0xE1,
    Reset3d = 0xFC,
    Subsystem3d = 0xFD,
    FwVersion = 0xFF,
}

/// A runtime parameter of the 3D subsystem.
///
/// This is a newtype instead of an enum as the device documentation assigns
/// the same value to more than one name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Parameter3d(pub u16);

impl Parameter3d {
    pub const TRIGGER: Self = Self(0x1000);
    pub const MAKE_PERSISTENT: Self = Self(0xFF00);
    pub const AFE_RX_ATT_SOUTH: Self = Self(0x50);
    pub const AFE_RX_ATT_WEST: Self = Self(0x51);
    pub const AFE_RX_ATT_NORTH: Self = Self(0x52);
    pub const AFE_RX_ATT_EAST: Self = Self(0x53);
    pub const AFE_RX_ATT_CENTER: Self = Self(0x54);
    pub const CHANNEL_MAPPING_SOUTH: Self = Self(0x65);
    pub const CHANNEL_MAPPING_WEST: Self = Self(0x66);
    pub const CHANNEL_MAPPING_NORTH: Self = Self(0x67);
    pub const CHANNEL_MAPPING_EAST: Self = Self(0x68);
    pub const CHANNEL_MAPPING_CENTER: Self = Self(0x69);
    pub const DSP_CAL_OP_MODE: Self = Self(0x80);
    pub const TRANS_FREQ_SELECT: Self = Self(0x82);
    pub const DSP_GESTURE_MASK: Self = Self(0x85);
    pub const DSP_AIR_WHEEL_CONFIG: Self = Self(0x90);
    // Both names carry 0x97 in the device documentation. Verify against the
    // datasheet before relying on either one.
    pub const DSP_TOUCH_CONFIG: Self = Self(0x97);
    pub const DSP_APPROACH_DETECTION_MODE: Self = Self(0x97);
    pub const DATA_OUTPUT_ENABLE_MASK: Self = Self(0xA0);
    pub const DATA_OUTPUT_LOCK_MASK: Self = Self(0xA1);
    pub const DATA_OUTPUT_REQUEST_MASK: Self = Self(0xA2);
    pub const DATA_OUTPUT_GESTURE_IN_PROGRESS: Self = Self(0xA3);
}

impl From<Parameter3d> for u16 {
    fn from(value: Parameter3d) -> Self {
        value.0
    }
}

/// A runtime parameter of the 2D subsystem.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Parameter2d(pub u16);

impl Parameter2d {
    pub const COM_MASK: Self = Self(0x0080);
    pub const ACTIVE_MASK: Self = Self(0x0081);
    pub const OPERATION_MODE: Self = Self(0x0082);

    pub const SWIPE_BORDER_LEFT: Self = Self(0x0502);
    pub const SWIPE_BORDER_RIGHT: Self = Self(0x0503);
    pub const SWIPE_BORDER_TOP: Self = Self(0x0504);
    pub const SWIPE_BORDER_BOTTOM: Self = Self(0x0505);
    pub const CLICK_BORDER_LEFT: Self = Self(0x0540);
    pub const CLICK_BORDER_RIGHT: Self = Self(0x0541);
    pub const CLICK_BORDER_TOP: Self = Self(0x0542);
    pub const CLICK_BORDER_BOTTOM: Self = Self(0x0543);
    pub const AUTO_MOVE_BORDER_HORIZONTAL: Self = Self(0x0600);
    pub const AUTO_MOVE_BORDER_VERTICAL: Self = Self(0x0601);
    pub const AUTO_MOVE_SPEED_X: Self = Self(0x0602);
    pub const AUTO_MOVE_SPEED_Y: Self = Self(0x0603);
    pub const AUTO_MOVE_DRAG_SPEED_X: Self = Self(0x0604);
    pub const AUTO_MOVE_DRAG_SPEED_Y: Self = Self(0x0605);
    pub const AUTO_MOVE_SCROLL_SPEED_X: Self = Self(0x0606);
    pub const AUTO_MOVE_SCROLL_SPEED_Y: Self = Self(0x0607);
    pub const SCROLL_SPEED_X: Self = Self(0x06A0);
    pub const SCROLL_SPEED_Y: Self = Self(0x06A1);
    pub const SCROLL_START_THRESHOLD: Self = Self(0x06A2);
    pub const SCROLL_INERTIA_X: Self = Self(0x06A4);
    pub const INERTIA_START_THRESHOLD_X: Self = Self(0x06A5);
    pub const INERTIA_STOP_THRESHOLD_X: Self = Self(0x06A6);
    pub const SCROLL_INERTIA_Y: Self = Self(0x06A8);
    pub const INERTIA_START_THRESHOLD_Y: Self = Self(0x06A9);
    pub const INERTIA_STOP_THRESHOLD_Y: Self = Self(0x06AA);

    /// Key combos occupy four consecutive parameters starting at a 16-aligned
    /// base: the event condition followed by three key codes.
    pub const KEY_FLICK_LEFT: Self = Self(0x1000);
    pub const KEY_FLICK_RIGHT: Self = Self(0x1010);
    pub const KEY_FLICK_UP: Self = Self(0x1020);
    pub const KEY_FLICK_DOWN: Self = Self(0x1030);
    pub const KEY_SWIPE_LEFT: Self = Self(0x1100);
    pub const KEY_SWIPE_RIGHT: Self = Self(0x1110);
    pub const KEY_SWIPE_UP: Self = Self(0x1120);
    pub const KEY_SWIPE_DOWN: Self = Self(0x1130);
    pub const KEY_APPROACH: Self = Self(0x1140);

    /// The parameter `offset` places after this one.
    pub fn offset(self, offset: u16) -> Self {
        Self(self.0.wrapping_add(offset))
    }
}

impl From<Parameter2d> for u16 {
    fn from(value: Parameter2d) -> Self {
        value.0
    }
}

/// An action triggered through [`Parameter3d::TRIGGER`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum Trigger {
    Calibration = 0x00,
    EnterDeepSleep1 = 0x01,
    EnterDeepSleep2 = 0x02,
}

/// A parameter category that can be stored in the device flash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum ParamCategory {
    Afe = 0,
    Dsp = 1,
    System = 2,
}

/// A gesture recognized by the 3D subsystem.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum Gesture3d {
    NoGesture = 0x00,
    FlickWestToEast = 0x01,
    FlickEastToWest = 0x02,
    FlickSouthToNorth = 0x03,
    FlickNorthToSouth = 0x04,
    CircleClockwise = 0x05,
    CircleCounterClockwise = 0x06,
    #[num_enum(catch_all)]
    Other(u8),
}

/// A gesture recognized by the 2D subsystem.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum Gesture2d {
    NoGesture = 0x00,
    EdgeSwipeLeft = 0x10,
    EdgeSwipeRight = 0x11,
    EdgeSwipeUp = 0x12,
    EdgeSwipeDown = 0x13,
    FlickLeft = 0x20,
    FlickRight = 0x21,
    FlickUp = 0x22,
    FlickDown = 0x23,
    ApproachDetected = 0x30,
    PinchNarrowing = 0x40,
    PinchWidening = 0x41,
    #[num_enum(catch_all)]
    Other(u8),
}

impl Default for Gesture3d {
    fn default() -> Self {
        Self::NoGesture
    }
}

impl Default for Gesture2d {
    fn default() -> Self {
        Self::NoGesture
    }
}

/// The operation mode of the 2D subsystem.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum OperationMode {
    Mixed = 0,
    Touch2d = 1,
    Gesture3d = 2,
    Bridge = 3,
    #[num_enum(catch_all)]
    Unknown(u32),
}

/// When a key combo is sent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum EventCondition {
    Disabled = 0,
    OnSingle = 1,
    OnDouble = 2,
    #[num_enum(catch_all)]
    Unknown(u32),
}

impl Default for EventCondition {
    fn default() -> Self {
        Self::Disabled
    }
}

/// Keys sent by the 2D subsystem on a gesture event.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyCombo {
    /// The event condition triggering the combo.
    pub condition: EventCondition,

    /// The key codes of the combo.
    pub keys: [u32; 3],
}

bitflags! {
    /// Selects the optional fields of a Sensor-Data-Output message.
    ///
    /// The same mask is used to configure the output of the device.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct OutputMask: u16 {
        const DSP_STATUS = 0x0001;
        const GESTURE_INFO = 0x0002;
        const TOUCH_INFO = 0x0004;
        const AIR_WHEEL_INFO = 0x0008;
        const POSITION = 0x0010;
        const NOISE_POWER = 0x0020;
        const ELECTRODE_CONFIGURATION = 0x0700;
        const CIC_DATA = 0x0800;
        const SD_DATA = 0x1000;

        /// Every field that can be enabled.
        const OUTPUT_ALL = 0x183F;
    }
}

bitflags! {
    /// Validity and state flags reported with each Sensor-Data-Output message.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct SystemInfo: u8 {
        const POSITION_VALID = 0x01;
        const AIR_WHEEL_VALID = 0x02;
        const RAW_DATA_VALID = 0x04;
        const NOISE_POWER_VALID = 0x08;
        const ENVIRONMENTAL_NOISE = 0x10;
        const CLIPPING = 0x20;
        const DSP_RUNNING = 0x80;
    }
}

bitflags! {
    /// Additional information about a 3D gesture.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct GestureFlags: u32 {
        const EDGE_FLICK = 0x0001_0000;
        const IN_PROGRESS = 0x8000_0000;
    }
}

bitflags! {
    /// Electrodes currently touched.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct TouchFlags: u32 {
        const SOUTH = 0x01;
        const WEST = 0x02;
        const NORTH = 0x04;
        const EAST = 0x08;
        const CENTER = 0x10;
    }
}

bitflags! {
    /// Single and double taps detected on the electrodes.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct TapFlags: u32 {
        const TAP_SOUTH = 0x0020;
        const TAP_WEST = 0x0040;
        const TAP_NORTH = 0x0080;
        const TAP_EAST = 0x0100;
        const TAP_CENTER = 0x0200;
        const DOUBLE_TAP_SOUTH = 0x0400;
        const DOUBLE_TAP_WEST = 0x0800;
        const DOUBLE_TAP_NORTH = 0x1000;
        const DOUBLE_TAP_EAST = 0x2000;
        const DOUBLE_TAP_CENTER = 0x4000;

        const SINGLE_TAP = 0x03E0;
        const DOUBLE_TAP = 0x7C00;
    }
}

bitflags! {
    /// Why the 3D subsystem recalibrated.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct CalibrationReason: u8 {
        const FORCED = 0x02;
        const STARTUP = 0x04;
        const GESTURE = 0x08;
        const NEGATIVE = 0x10;
        const IDLE = 0x20;
        const INVALIDITY = 0x40;
        const DSP_FORCED = 0x80;

        const _ = !0;
    }
}

bitflags! {
    /// Transmit frequencies the 3D subsystem may use.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Frequencies: u8 {
        const FREQ1 = 0x01;
        const FREQ2 = 0x02;
        const FREQ3 = 0x04;
        const FREQ4 = 0x08;
        const FREQ5 = 0x10;
    }
}

bitflags! {
    /// Gestures the 3D subsystem recognizes.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct GestureMask: u32 {
        const GARBAGE = 0x01;
        const FLICK_WEST_EAST = 0x02;
        const FLICK_EAST_WEST = 0x04;
        const FLICK_SOUTH_NORTH = 0x08;
        const FLICK_NORTH_SOUTH = 0x10;
        const CIRCLE_CLOCKWISE = 0x20;
        const CIRCLE_COUNTER_CLOCKWISE = 0x40;
    }
}

bitflags! {
    /// Features of the 2D subsystem that are switched on.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ActiveMask: u32 {
        const GESTURE_RECOGNITION = 0x0001;
        const LOCK_SCROLL_DIRECTION = 0x0002;
        const FULL_MUTUAL = 0x0004;
        const MOUSE_BUTTONS = 0x0008;
        const MOUSE_MOVEMENT = 0x0010;
        const FLICK_EVENTS = 0x0020;
        const SWIPE_EVENTS = 0x0040;
        const AIR_WHEEL_SCROLL_EVENTS = 0x0080;
        const SCROLL_EVENTS = 0x0100;
        const PINCH_EVENTS = 0x0200;

        /// Everything but scroll direction locking and full mutual
        /// measurement.
        const DEFAULT = 0x03F9;

        const _ = !0;
    }
}

bitflags! {
    /// Messages the 2D subsystem sends to the host.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ComMask: u32 {
        const CALIBRATED_SELF = 0x0001;
        const CALIBRATED_MUTUAL = 0x0002;
        const RAW_SELF = 0x0004;
        const RAW_MUTUAL = 0x0008;
        const FINGER_POSITIONS = 0x0800;
        const GESTURES = 0x1000;
        const MOUSE_BUTTONS = 0x2000;
        const MESSAGES_3D = 0x8000;

        const _ = !0;
    }
}

bitflags! {
    /// Mouse buttons of the 2D subsystem.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct MouseButtons: u8 {
        const LEFT = 0x01;
        const RIGHT = 0x02;
        const MIDDLE = 0x04;

        const _ = !0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_2d_ids() {
        assert_eq!(InboundId2d::from_id(0xD3), Some(InboundId2d::MutualRaw(3)));
        assert_eq!(
            InboundId2d::from_id(0xEF),
            Some(InboundId2d::MutualCalibrated(15))
        );
        assert_eq!(InboundId2d::from_id(0xFD), Some(InboundId2d::SelfMeasure));
        assert_eq!(InboundId2d::from_id(0x12), None);
        assert_eq!(u8::from(OutboundId2d::Subsystem3d), 0xFD);
    }

    #[test]
    fn aliased_parameters_stay_distinct_names() {
        assert_eq!(
            Parameter3d::DSP_TOUCH_CONFIG,
            Parameter3d::DSP_APPROACH_DETECTION_MODE
        );
        assert_eq!(Parameter2d::KEY_APPROACH.offset(3), Parameter2d(0x1143));
    }

    #[test]
    fn unknown_codes_round_trip() {
        assert_eq!(Gesture3d::from(9), Gesture3d::Other(9));
        assert_eq!(u8::from(Gesture3d::Other(9)), 9);
        assert_eq!(OperationMode::from(1), OperationMode::Touch2d);
    }
}
