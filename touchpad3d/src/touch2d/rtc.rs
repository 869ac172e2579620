//! Runtime control of the 2D subsystem.

use crate::{
    config::Capability,
    error::{HmiError, Result},
    message::{ActiveMask, ComMask, EventCondition, KeyCombo, OperationMode, Parameter2d},
    session::Session,
};

/// Writes every bit of a parameter.
const ALL_BITS: u32 = 0xFFFF_FFFF;

const KEY_COMBO_FIRST: u16 = 0x1000;
const KEY_COMBO_LAST: u16 = 0x1140;

/// Checks that `param` is the base of a key combo parameter block.
fn key_combo_base(param: Parameter2d) -> Result<Parameter2d> {
    if param.0 & 0xF != 0 || !(KEY_COMBO_FIRST..=KEY_COMBO_LAST).contains(&param.0) {
        return Err(HmiError::BadParameter("not a key combo parameter"));
    }
    Ok(param)
}

impl Session {
    /// Switches features of the 2D subsystem. Only bits in `mask` change.
    pub fn set_active_mask(&self, active: ActiveMask, mask: ActiveMask) -> Result<()> {
        self.require(Capability::Rtc2d)?;
        self.set_param_2d(Parameter2d::ACTIVE_MASK, active.bits(), mask.bits())
    }

    pub fn active_mask(&self) -> Result<ActiveMask> {
        self.require(Capability::Rtc2d)?;
        self.get_param_2d(Parameter2d::ACTIVE_MASK)
            .map(ActiveMask::from_bits_retain)
    }

    /// Enables measurement of the full mutual matrix.
    pub fn set_full_mutual(&self, enabled: bool) -> Result<()> {
        let active = if enabled {
            ActiveMask::FULL_MUTUAL
        } else {
            ActiveMask::empty()
        };
        self.set_active_mask(active, ActiveMask::FULL_MUTUAL)
    }

    pub fn full_mutual(&self) -> Result<bool> {
        Ok(self.active_mask()?.contains(ActiveMask::FULL_MUTUAL))
    }

    /// Selects the messages the 2D subsystem sends. Only bits in `mask`
    /// change.
    pub fn set_com_mask(&self, com: ComMask, mask: ComMask) -> Result<()> {
        self.require(Capability::Rtc2d)?;
        self.set_param_2d(Parameter2d::COM_MASK, com.bits(), mask.bits())
    }

    pub fn com_mask(&self) -> Result<ComMask> {
        self.require(Capability::Rtc2d)?;
        self.get_param_2d(Parameter2d::COM_MASK)
            .map(ComMask::from_bits_retain)
    }

    pub fn set_operation_mode(&self, mode: OperationMode) -> Result<()> {
        self.require(Capability::Rtc2d)?;
        self.set_param_2d(Parameter2d::OPERATION_MODE, mode.into(), ALL_BITS)
    }

    pub fn operation_mode(&self) -> Result<OperationMode> {
        self.require(Capability::Rtc2d)?;
        self.get_param_2d(Parameter2d::OPERATION_MODE)
            .map(OperationMode::from)
    }

    /// Configures the keys sent on the gesture event of the key combo block
    /// starting at `param`.
    pub fn set_key_combo(&self, param: Parameter2d, combo: &KeyCombo) -> Result<()> {
        self.require(Capability::Rtc2d)?;
        let base = key_combo_base(param)?;

        self.set_param_2d(base, combo.condition.into(), ALL_BITS)?;
        for (i, key) in (1..).zip(combo.keys) {
            self.set_param_2d(base.offset(i), key, ALL_BITS)?;
        }
        Ok(())
    }

    pub fn key_combo(&self, param: Parameter2d) -> Result<KeyCombo> {
        self.require(Capability::Rtc2d)?;
        let base = key_combo_base(param)?;

        let condition = EventCondition::from(self.get_param_2d(base)?);
        let mut keys = [0; 3];
        for (i, key) in (1..).zip(keys.iter_mut()) {
            *key = self.get_param_2d(base.offset(i))?;
        }
        Ok(KeyCombo { condition, keys })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_combo_bases() {
        assert!(key_combo_base(Parameter2d::KEY_FLICK_LEFT).is_ok());
        assert!(key_combo_base(Parameter2d::KEY_APPROACH).is_ok());
        assert!(key_combo_base(Parameter2d(0x1001)).is_err());
        assert!(key_combo_base(Parameter2d(0x1150)).is_err());
        assert!(key_combo_base(Parameter2d::ACTIVE_MASK).is_err());
    }
}
