//! Runtime control of the 3D subsystem.
//!
//! Most settings are single bits of a runtime parameter. The first argument
//! of a parameter carries the value, the second one the mask of bits to
//! change.

use crate::{
    config::Capability,
    error::{HmiError, Result},
    message::{Frequencies, GestureMask, OutputMask, ParamCategory, Parameter3d, Trigger},
    session::Session,
};

const AUTO_CALIBRATION_MASK: u32 = 0x3F;
const APPROACH_DETECTION_MASK: u32 = 0x01;
const TOUCH_DETECTION_MASK: u32 = 0x08;
const TOUCH_DETECTION_READ_MASK: u32 = 0x80;
const AIR_WHEEL_MASK: u32 = 0x20;
const GESTURE_MASK: u32 = 0x7F;

/// The frequency list starts out as five invalid entries.
const FREQUENCY_LIST_INIT: u32 = 0xFFFFF;

/// Encodes a frequency selection as list of up to five 4 bit indices.
///
/// Returns the number of selected frequencies together with the list.
pub fn frequency_list(frequencies: Frequencies) -> (u32, u32) {
    let mut count = 0;
    let mut list = FREQUENCY_LIST_INIT;
    for i in 0..5 {
        if frequencies.bits() & (1 << i) != 0 {
            list = (list << 4) | i as u32;
            count += 1;
        }
    }
    (count, list & FREQUENCY_LIST_INIT)
}

impl Session {
    /// Enables or disables automatic calibration.
    pub fn set_auto_calibration(&self, enabled: bool) -> Result<()> {
        self.require(Capability::Rtc3d)?;
        let value = if enabled { 0 } else { AUTO_CALIBRATION_MASK };
        self.set_param_3d(Parameter3d::DSP_CAL_OP_MODE, value, AUTO_CALIBRATION_MASK)
    }

    /// Whether automatic calibration is enabled.
    ///
    /// Reports enabled while any of the calibration mode bits is set, although
    /// [`Self::set_auto_calibration`] clears them to enable it. Check against
    /// the device documentation before relying on the polarity.
    pub fn auto_calibration(&self) -> Result<bool> {
        self.require(Capability::Rtc3d)?;
        let (value, _) = self.get_param_3d(Parameter3d::DSP_CAL_OP_MODE)?;
        Ok(value & AUTO_CALIBRATION_MASK != 0)
    }

    /// Forces a calibration now.
    pub fn force_calibration(&self) -> Result<()> {
        self.require(Capability::Rtc3d)?;
        self.trigger_action(Trigger::Calibration)
    }

    /// Restricts the transmit frequencies the device may choose from.
    ///
    /// At least one frequency has to be selected.
    pub fn select_frequencies(&self, frequencies: Frequencies) -> Result<()> {
        self.require(Capability::Rtc3d)?;
        let (count, list) = frequency_list(frequencies);
        if count == 0 {
            return Err(HmiError::BadParameter("no frequency selected"));
        }
        self.set_param_3d(Parameter3d::TRANS_FREQ_SELECT, count, list)
    }

    pub fn set_approach_detection(&self, enabled: bool) -> Result<()> {
        self.require(Capability::Rtc3d)?;
        let value = if enabled { APPROACH_DETECTION_MASK } else { 0 };
        self.set_param_3d(
            Parameter3d::DSP_APPROACH_DETECTION_MODE,
            value,
            APPROACH_DETECTION_MASK,
        )
    }

    pub fn approach_detection(&self) -> Result<bool> {
        self.require(Capability::Rtc3d)?;
        let (value, _) = self.get_param_3d(Parameter3d::DSP_APPROACH_DETECTION_MODE)?;
        Ok(value & APPROACH_DETECTION_MASK != 0)
    }

    /// Selects the gestures the device reports.
    pub fn set_enabled_gestures(&self, gestures: GestureMask) -> Result<()> {
        self.require(Capability::Rtc3d)?;
        self.set_param_3d(
            Parameter3d::DSP_GESTURE_MASK,
            gestures.bits() & GESTURE_MASK,
            GESTURE_MASK,
        )
    }

    pub fn enabled_gestures(&self) -> Result<GestureMask> {
        self.require(Capability::Rtc3d)?;
        let (value, _) = self.get_param_3d(Parameter3d::DSP_GESTURE_MASK)?;
        Ok(GestureMask::from_bits_truncate(value & GESTURE_MASK))
    }

    pub fn set_touch_detection(&self, enabled: bool) -> Result<()> {
        self.require(Capability::Rtc3d)?;
        let value = if enabled { TOUCH_DETECTION_MASK } else { 0 };
        self.set_param_3d(Parameter3d::DSP_TOUCH_CONFIG, value, TOUCH_DETECTION_MASK)
    }

    /// Whether touch detection is enabled.
    ///
    /// The state is read back from a different bit than the one written.
    pub fn touch_detection(&self) -> Result<bool> {
        self.require(Capability::Rtc3d)?;
        let (value, _) = self.get_param_3d(Parameter3d::DSP_TOUCH_CONFIG)?;
        Ok(value & TOUCH_DETECTION_READ_MASK != 0)
    }

    pub fn set_air_wheel(&self, enabled: bool) -> Result<()> {
        self.require(Capability::Rtc3d)?;
        let value = if enabled { AIR_WHEEL_MASK } else { 0 };
        self.set_param_3d(Parameter3d::DSP_AIR_WHEEL_CONFIG, value, AIR_WHEEL_MASK)
    }

    pub fn air_wheel_enabled(&self) -> Result<bool> {
        self.require(Capability::Rtc3d)?;
        let (value, _) = self.get_param_3d(Parameter3d::DSP_AIR_WHEEL_CONFIG)?;
        Ok(value & AIR_WHEEL_MASK != 0)
    }

    /// Stores the current values of a parameter category in flash.
    pub fn make_persistent(&self, category: ParamCategory) -> Result<()> {
        self.require(Capability::Rtc3d)?;
        self.set_param_3d(Parameter3d::MAKE_PERSISTENT, category.into(), 0)
    }

    /// Selects the fields of Sensor-Data-Output messages.
    ///
    /// Only bits in `mask` are changed. Fields in `lock` are sent with every
    /// message, the others only when their value changed.
    pub fn set_output_enable_mask(
        &self,
        flags: OutputMask,
        lock: OutputMask,
        mask: OutputMask,
    ) -> Result<()> {
        self.require(Capability::Data3d)?;
        self.set_param_3d(
            Parameter3d::DATA_OUTPUT_LOCK_MASK,
            lock.bits() as u32,
            mask.bits() as u32,
        )?;
        self.set_param_3d(
            Parameter3d::DATA_OUTPUT_ENABLE_MASK,
            flags.bits() as u32,
            mask.bits() as u32,
        )
    }

    /// Reads the enabled and the locked output fields.
    pub fn output_enable_mask(&self) -> Result<(OutputMask, OutputMask)> {
        self.require(Capability::Data3d)?;
        let read = |param| -> Result<OutputMask> {
            let (value, _) = self.get_param_3d(param)?;
            Ok(OutputMask::from_bits_truncate(value as u16) & OutputMask::OUTPUT_ALL)
        };

        let flags = read(Parameter3d::DATA_OUTPUT_ENABLE_MASK)?;
        let locked = read(Parameter3d::DATA_OUTPUT_LOCK_MASK)?;
        Ok((flags, locked))
    }
}
