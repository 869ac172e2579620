//! Decoding of Sensor-Data-Output messages and publishing of 3D snapshots.
//!
//! Event fields carry frame counter stamps while they sit in the accumulation
//! buffer. Publishing turns those stamps into the number of frames elapsed
//! since the event.

use crate::{
    codec::Cursor,
    codec::Wire,
    message::{
        CalibrationReason, Gesture3d, GestureFlags, OutputMask, SystemInfo, TapFlags, TouchFlags,
    },
};

/// The number of electrode channels in a signal.
pub const CHANNELS: usize = 5;

/// The offset of the first optional field.
const FIELDS_OFFSET: usize = 8;

/// Electrode count by the low bit of the electrode configuration.
const ELECTRODE_COUNTS: [usize; 2] = [4, 5];

const TOUCH_MASK: u32 = 0x1F;
const TAP_MASK: u32 = 0x7FE0;
const GESTURE_FLAGS_MASK: u32 = 0x8001_0000;

/// Signal values of all electrode channels.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Signal {
    pub channel: [f32; CHANNELS],
}

/// A hand position in device units.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Position {
    pub x: u16,
    pub y: u16,
    pub z: u16,
}

/// The last recognized gesture.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Gesture {
    /// The gesture, reset once it was published.
    pub gesture: Gesture3d,

    /// Additional information. [`GestureFlags::IN_PROGRESS`] outlives the
    /// gesture reset.
    pub flags: GestureFlags,

    /// Frames since the gesture was recognized.
    pub last_event: u32,
}

/// Touch and tap state of the electrodes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Touch {
    /// Electrodes currently touched.
    pub touch_flags: TouchFlags,

    /// Frames since the touch state last changed.
    pub last_touch_event: u32,

    /// Frames since the current touch started.
    pub last_touch_event_start: u32,

    /// Taps detected since the last publish.
    pub tap_flags: TapFlags,

    /// Frames since the last tap.
    pub last_tap_event: u32,
}

/// AirWheel state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AirWheel {
    /// The rotation counter. Only updated while the AirWheel is active.
    pub counter: u8,

    pub active: bool,

    /// Frames since the AirWheel was activated or deactivated.
    pub last_event: u32,
}

/// The last calibration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Calibration {
    /// Why the calibration happened. Cleared if it happened before the last
    /// publish.
    pub reason: CalibrationReason,

    /// Frames since the calibration.
    pub last_event: u32,
}

/// The transmit frequency in use.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Frequency {
    pub frequency: u8,

    /// Whether the frequency changed since the last publish.
    pub changed: bool,

    /// Frames since the frequency changed.
    pub last_event: u32,
}

/// The measured noise power.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NoisePower {
    pub value: f32,

    /// Whether the last frame carried a valid noise power.
    pub valid: bool,
}

/// A snapshot of everything the 3D subsystem reported.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SensorData {
    /// Uncalibrated signal.
    pub cic: Signal,

    /// Signal deviation.
    pub sd: Signal,

    pub position: Position,
    pub gesture: Gesture,
    pub calibration: Calibration,
    pub touch: Touch,
    pub air_wheel: AirWheel,
    pub frequency: Frequency,
    pub noise_power: NoisePower,

    /// Counts frames by device timestamp. Wraps around.
    pub frame_counter: u32,
}

/// The number of active electrodes announced by an output configuration.
pub fn electrode_count(config: OutputMask) -> usize {
    let mode = (config & OutputMask::ELECTRODE_CONFIGURATION).bits() >> 8;
    ELECTRODE_COUNTS[(mode & 1) as usize]
}

/// The minimum message length the fields selected by `config` require.
pub fn required_length(config: OutputMask) -> usize {
    let electrodes = electrode_count(config);
    let sizes = [
        (OutputMask::DSP_STATUS, 2),
        (OutputMask::GESTURE_INFO, 4),
        (OutputMask::TOUCH_INFO, 4),
        (OutputMask::AIR_WHEEL_INFO, 2),
        (OutputMask::POSITION, 6),
        (OutputMask::NOISE_POWER, 4),
        (OutputMask::CIC_DATA, 4 * electrodes),
        (OutputMask::SD_DATA, 4 * electrodes),
    ];

    FIELDS_OFFSET
        + sizes
            .iter()
            .filter(|(flag, _)| config.contains(*flag))
            .map(|(_, size)| size)
            .sum::<usize>()
}

/// The output configuration of a Sensor-Data-Output message.
pub fn output_config(msg: &[u8]) -> OutputMask {
    OutputMask::from_bits_retain(Wire::u16(msg, 4))
}

/// The accumulation buffer of the 3D subsystem.
#[derive(Clone, Debug, Default)]
pub struct Accumulator3d {
    /// The accumulated state, with event stamps instead of elapsed counts.
    pub data: SensorData,

    /// The device timestamp of the last frame.
    last_timestamp: u8,
}

impl Accumulator3d {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a Sensor-Data-Output message.
    ///
    /// Only fields selected by the message's output configuration change,
    /// besides the frame counter and the noise power validity. The caller is
    /// responsible for checking the length against [`required_length`].
    ///
    /// Returns the new frame counter.
    pub fn apply(&mut self, msg: &[u8], undefined: f32) -> u32 {
        let config = output_config(msg);
        let timestamp = Wire::u8(msg, 6);
        let info = SystemInfo::from_bits_retain(Wire::u8(msg, 7));
        let electrodes = electrode_count(config);
        let air_wheel_active = info.contains(SystemInfo::AIR_WHEEL_VALID);
        let mut cursor = Cursor::new(msg, FIELDS_OFFSET);

        let dest = &mut self.data;

        // Timestamps wrap every 256 samples. Counting the difference keeps the
        // counter usable as long as frames arrive more often than that.
        let increment = timestamp.wrapping_sub(self.last_timestamp);
        dest.frame_counter = dest
            .frame_counter
            .wrapping_add(if increment == 0 { 1 } else { increment as u32 });
        self.last_timestamp = timestamp;
        let now = dest.frame_counter;

        if config.contains(OutputMask::DSP_STATUS) {
            let calibration = cursor.u8();
            let frequency = cursor.u8();
            if calibration != 0 {
                dest.calibration.reason = CalibrationReason::from_bits_retain(calibration);
                dest.calibration.last_event = now;
            }
            if frequency != dest.frequency.frequency {
                dest.frequency.frequency = frequency;
                dest.frequency.changed = true;
                dest.frequency.last_event = now;
            }
        }

        if config.contains(OutputMask::GESTURE_INFO) {
            let gesture_info = cursor.u32();
            let raw = (gesture_info & 0xFF) as u8;
            // Code 1 means "no new gesture", everything above is shifted by it.
            let gesture = if raw > 1 { raw - 1 } else { 0 };
            if gesture != 0 {
                dest.gesture.gesture = Gesture3d::from(gesture);
                dest.gesture.flags =
                    GestureFlags::from_bits_truncate(gesture_info & GESTURE_FLAGS_MASK);
                dest.gesture.last_event = now;
            }
        }

        if config.contains(OutputMask::TOUCH_INFO) {
            let touch_info = cursor.u32();
            let touch = TouchFlags::from_bits_truncate(touch_info & TOUCH_MASK);
            let tap = TapFlags::from_bits_truncate(touch_info & TAP_MASK);
            if touch != dest.touch.touch_flags {
                dest.touch.touch_flags = touch;
                dest.touch.last_touch_event = now;
                dest.touch.last_touch_event_start = now.wrapping_sub((touch_info >> 16) & 0xFF);
            }
            if !tap.is_empty() {
                dest.touch.tap_flags = tap;
                dest.touch.last_tap_event = now;
            }
        }

        if config.contains(OutputMask::AIR_WHEEL_INFO) {
            if air_wheel_active {
                dest.air_wheel.counter = Wire::u8(msg, cursor.position());
            }
            cursor.skip(2);
        }
        if air_wheel_active != dest.air_wheel.active {
            dest.air_wheel.active = air_wheel_active;
            dest.air_wheel.last_event = now;
        }

        if config.contains(OutputMask::POSITION) {
            if info.contains(SystemInfo::POSITION_VALID) {
                let pos = cursor.position();
                dest.position = Position {
                    x: Wire::u16(msg, pos),
                    y: Wire::u16(msg, pos + 2),
                    z: Wire::u16(msg, pos + 4),
                };
            }
            cursor.skip(6);
        }

        dest.noise_power.valid = false;
        if config.contains(OutputMask::NOISE_POWER) {
            if info.contains(SystemInfo::NOISE_POWER_VALID) {
                dest.noise_power.value = Wire::f32(msg, cursor.position());
                dest.noise_power.valid = true;
            }
            cursor.skip(4);
        }

        for (flag, signal) in [
            (OutputMask::CIC_DATA, &mut dest.cic),
            (OutputMask::SD_DATA, &mut dest.sd),
        ] {
            if !config.contains(flag) {
                continue;
            }
            if info.contains(SystemInfo::RAW_DATA_VALID) {
                let pos = cursor.position();
                for (i, channel) in signal.channel.iter_mut().enumerate() {
                    *channel = if i < electrodes {
                        Wire::f32(msg, pos + 4 * i)
                    } else {
                        undefined
                    };
                }
            }
            cursor.skip(4 * electrodes);
        }

        now
    }
}

/// Copies the accumulated state into a publishable snapshot.
///
/// `last_counter` is the frame counter of the previously published snapshot.
/// Returns `None` if no frame arrived since, otherwise the snapshot together
/// with the number of frames skipped in between.
pub fn publish(internal: &SensorData, last_counter: u32) -> Option<(SensorData, u32)> {
    let current = internal.frame_counter;
    let count = current.wrapping_sub(last_counter);
    if count == 0 {
        return None;
    }

    let mut result = *internal;
    // An event is new if its stamp lies in (last_counter, current].
    let is_new = |stamp: u32| current.wrapping_sub(stamp) < count;
    let elapsed = |stamp: u32| current.wrapping_sub(stamp);

    if !is_new(result.gesture.last_event) {
        result.gesture.gesture = Gesture3d::NoGesture;
        result.gesture.flags &= GestureFlags::IN_PROGRESS;
    }
    result.gesture.last_event = elapsed(result.gesture.last_event);

    result.touch.last_touch_event = elapsed(result.touch.last_touch_event);
    if !is_new(result.touch.last_tap_event) {
        result.touch.tap_flags = TapFlags::empty();
    }
    result.touch.last_tap_event = elapsed(result.touch.last_tap_event);
    result.touch.last_touch_event_start = elapsed(result.touch.last_touch_event_start);

    result.air_wheel.last_event = elapsed(result.air_wheel.last_event);

    if !is_new(result.calibration.last_event) {
        result.calibration.reason = CalibrationReason::empty();
    }
    result.calibration.last_event = elapsed(result.calibration.last_event);

    if !is_new(result.frequency.last_event) {
        result.frequency.changed = false;
    }
    result.frequency.last_event = elapsed(result.frequency.last_event);

    Some((result, count - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SensorFrame;

    #[test]
    fn frame_counter_follows_timestamps() {
        let mut acc = Accumulator3d::new();
        assert_eq!(acc.apply(&SensorFrame::new(3).build(), 0.0), 3);
        assert_eq!(acc.apply(&SensorFrame::new(3).build(), 0.0), 4);
        assert_eq!(acc.apply(&SensorFrame::new(1).build(), 0.0), 4 + 254);
    }

    #[test]
    fn gesture_code_is_shifted() {
        let mut acc = Accumulator3d::new();
        acc.apply(&SensorFrame::new(1).gesture(0x8001_0003).build(), 0.0);
        assert_eq!(acc.data.gesture.gesture, Gesture3d::FlickEastToWest);
        assert_eq!(
            acc.data.gesture.flags,
            GestureFlags::EDGE_FLICK | GestureFlags::IN_PROGRESS
        );
        assert_eq!(acc.data.gesture.last_event, 1);

        // Code 1 is the "no new gesture" sentinel.
        acc.apply(&SensorFrame::new(2).gesture(0x1).build(), 0.0);
        assert_eq!(acc.data.gesture.gesture, Gesture3d::FlickEastToWest);
        assert_eq!(acc.data.gesture.last_event, 1);
    }

    #[test]
    fn touch_start_is_back_dated() {
        let mut acc = Accumulator3d::new();
        acc.apply(&SensorFrame::new(10).touch(0x0003_0004).build(), 0.0);
        assert_eq!(acc.data.touch.touch_flags, TouchFlags::NORTH);
        assert_eq!(acc.data.touch.last_touch_event, 10);
        assert_eq!(acc.data.touch.last_touch_event_start, 7);
        assert!(acc.data.touch.tap_flags.is_empty());
    }

    #[test]
    fn invalid_fields_keep_previous_values() {
        let mut acc = Accumulator3d::new();
        acc.apply(
            &SensorFrame::new(1)
                .info(SystemInfo::POSITION_VALID | SystemInfo::NOISE_POWER_VALID)
                .position(1, 2, 3)
                .noise_power(0.5)
                .build(),
            0.0,
        );
        acc.apply(&SensorFrame::new(2).position(7, 8, 9).noise_power(0.7).build(), 0.0);

        assert_eq!(acc.data.position, Position { x: 1, y: 2, z: 3 });
        assert_eq!(acc.data.noise_power.value, 0.5);
        assert!(!acc.data.noise_power.valid);
    }

    #[test]
    fn inactive_electrodes_read_as_undefined() {
        let mut acc = Accumulator3d::new();
        let msg = SensorFrame::new(1)
            .info(SystemInfo::RAW_DATA_VALID)
            .electrodes(4)
            .cic([1.0, 2.0, 3.0, 4.0, 5.0])
            .sd([6.0, 7.0, 8.0, 9.0, 10.0])
            .build();
        acc.apply(&msg, -1.0);

        assert_eq!(acc.data.cic.channel, [1.0, 2.0, 3.0, 4.0, -1.0]);
        assert_eq!(acc.data.sd.channel, [6.0, 7.0, 8.0, 9.0, -1.0]);
    }

    #[test]
    fn air_wheel_counter_needs_valid_flag() {
        let mut acc = Accumulator3d::new();
        acc.apply(&SensorFrame::new(1).air_wheel(9).build(), 0.0);
        assert_eq!(acc.data.air_wheel.counter, 0);
        assert!(!acc.data.air_wheel.active);

        acc.apply(
            &SensorFrame::new(2)
                .info(SystemInfo::AIR_WHEEL_VALID)
                .air_wheel(9)
                .build(),
            0.0,
        );
        assert_eq!(acc.data.air_wheel.counter, 9);
        assert!(acc.data.air_wheel.active);
        assert_eq!(acc.data.air_wheel.last_event, 2);
    }

    #[test]
    fn required_length_follows_mask() {
        assert_eq!(required_length(OutputMask::empty()), 8);
        assert_eq!(required_length(OutputMask::DSP_STATUS | OutputMask::POSITION), 16);
        assert_eq!(required_length(OutputMask::CIC_DATA), 8 + 16);
        assert_eq!(
            required_length(OutputMask::CIC_DATA | OutputMask::from_bits_retain(0x100)),
            8 + 20
        );
    }

    #[test]
    fn publish_resets_one_shot_events() {
        let mut acc = Accumulator3d::new();
        acc.apply(
            &SensorFrame::new(1)
                .dsp_status(0x04, 3)
                .gesture(0x8000_0003)
                .touch(0x20)
                .build(),
            0.0,
        );

        let (first, skipped) = publish(&acc.data, 0).unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(first.gesture.gesture, Gesture3d::FlickEastToWest);
        assert_eq!(first.gesture.last_event, 0);
        assert_eq!(first.touch.tap_flags, TapFlags::TAP_SOUTH);
        assert_eq!(first.calibration.reason, CalibrationReason::STARTUP);
        assert!(first.frequency.changed);

        assert!(publish(&acc.data, first.frame_counter).is_none());

        acc.apply(&SensorFrame::new(4).build(), 0.0);
        let (second, skipped) = publish(&acc.data, first.frame_counter).unwrap();
        assert_eq!(skipped, 2);
        assert_eq!(second.gesture.gesture, Gesture3d::NoGesture);
        assert_eq!(second.gesture.flags, GestureFlags::IN_PROGRESS);
        assert_eq!(second.gesture.last_event, 3);
        assert!(second.touch.tap_flags.is_empty());
        assert!(second.calibration.reason.is_empty());
        assert!(!second.frequency.changed);
        assert_eq!(second.frequency.frequency, 3);
    }

    #[test]
    fn publish_handles_counter_wrap() {
        let mut data = SensorData {
            frame_counter: 2,
            ..Default::default()
        };
        data.gesture.gesture = Gesture3d::CircleClockwise;
        data.gesture.last_event = u32::MAX;

        let (result, skipped) = publish(&data, u32::MAX - 1).unwrap();
        assert_eq!(skipped, 3);
        assert_eq!(result.gesture.gesture, Gesture3d::CircleClockwise);
        assert_eq!(result.gesture.last_event, 3);
    }
}
