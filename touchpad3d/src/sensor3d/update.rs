//! Firmware update of the 3D subsystem.
//!
//! An update session starts with a reset. The loader answers with a version
//! info message within a short window, after which it starts the installed
//! firmware unless it received the update start message. Every update message
//! carries a CRC32 of its payload at offset 4, computed over everything from
//! offset 8 onwards.

use std::{sync::PoisonError, time::Instant};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::{debug, info};

use crate::{
    codec::Wire,
    config::Capability,
    error::{HmiError, Result},
    message::MessageId3d,
    session::Session,
};

use super::VERSION_LENGTH;

/// The size of the initialization vector of an update session.
pub const IV_LENGTH: usize = 14;

/// The size of the data block of an update record.
pub const RECORD_DATA_LENGTH: usize = 128;

const BEGIN_LENGTH: usize = 28;
const BLOCK_LENGTH: usize = 140;
const END_LENGTH: usize = 136;
const CRC_START: usize = 8;

/// What an update session does with the records it receives.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum UpdateMode {
    #[default]
    ProgramFlash = 0,
    VerifyOnly = 1,
    Restart = 3,
}

/// One block of firmware data.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct UpdateRecord {
    pub address: u16,

    /// The number of valid bytes in `data`.
    pub length: u8,

    pub data: [u8; RECORD_DATA_LENGTH],
}

/// A complete firmware image.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct UpdateImage {
    pub iv: [u8; IV_LENGTH],

    /// The version string committed at the end of the update.
    pub fw_version: [u8; VERSION_LENGTH],

    pub records: Vec<UpdateRecord>,
}

/// State of the running update session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub(crate) struct UpdateSession {
    pub session_id: u32,
    pub mode: UpdateMode,
}

/// Stores the CRC32 of everything after the checksum field.
fn seal(msg: &mut [u8]) {
    let crc = crc32fast::hash(&msg[CRC_START..]);
    Wire::put_u32(msg, 4, crc);
}

/// Builds the message starting an update session.
pub fn begin_message(
    session_id: u32,
    iv: &[u8; IV_LENGTH],
    mode: UpdateMode,
) -> [u8; BEGIN_LENGTH] {
    let mut msg = [0u8; BEGIN_LENGTH];
    msg[0] = BEGIN_LENGTH as u8;
    msg[3] = MessageId3d::FwUpdateStart.into();
    Wire::put_u32(&mut msg, 8, session_id);
    msg[12..12 + IV_LENGTH].copy_from_slice(iv);
    msg[26] = mode.into();
    seal(&mut msg);
    msg
}

/// Builds the message carrying one update record.
pub fn block_message(
    address: u16,
    length: u8,
    data: &[u8; RECORD_DATA_LENGTH],
    mode: UpdateMode,
) -> [u8; BLOCK_LENGTH] {
    let mut msg = [0u8; BLOCK_LENGTH];
    msg[0] = BLOCK_LENGTH as u8;
    msg[3] = MessageId3d::FwUpdateBlock.into();
    Wire::put_u16(&mut msg, 8, address);
    msg[10] = length;
    msg[11] = mode.into();
    msg[12..].copy_from_slice(data);
    seal(&mut msg);
    msg
}

/// Builds the message completing an update session.
pub fn end_message(
    session_id: u32,
    mode: UpdateMode,
    version: &[u8; VERSION_LENGTH],
) -> [u8; END_LENGTH] {
    let mut msg = [0u8; END_LENGTH];
    msg[0] = END_LENGTH as u8;
    msg[3] = MessageId3d::FwUpdateCompleted.into();
    Wire::put_u32(&mut msg, 8, session_id);
    msg[12] = mode.into();
    msg[13..13 + VERSION_LENGTH].copy_from_slice(version);
    seal(&mut msg);
    msg
}

impl Session {
    fn update_session(&self) -> UpdateSession {
        *self
            .shared
            .update_3d
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_update_session(&self, session: UpdateSession) {
        *self
            .shared
            .update_3d
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = session;
    }

    /// Starts a firmware update session.
    ///
    /// Resets the device and waits for the loader to announce itself before
    /// sending the start message. The previous session ends in any case, the
    /// new one only starts once the start message was accepted.
    pub fn update_begin(
        &self,
        session_id: u32,
        iv: &[u8; IV_LENGTH],
        mode: UpdateMode,
    ) -> Result<()> {
        self.require(Capability::Update3d)?;
        let _command = self.shared.command();
        self.set_update_session(UpdateSession::default());

        let (pending, rx) = self.shared.pending.version_3d.register(());
        self.shared.reset_3d()?;
        let deadline = Instant::now() + self.shared.config.version_wait;
        let info = self
            .shared
            .wait_for(&rx, deadline)?
            .ok_or(HmiError::NoResponse)?;
        drop(pending);
        debug!(session_id, fw_valid = info.fw_valid, "loader announced itself");

        self.shared.send_3d(&begin_message(session_id, iv, mode))?;
        self.set_update_session(UpdateSession { session_id, mode });
        Ok(())
    }

    /// Writes one record of the image.
    ///
    /// A verification session only accepts records in verification mode.
    pub fn update_write(
        &self,
        address: u16,
        length: u8,
        data: &[u8; RECORD_DATA_LENGTH],
        mode: UpdateMode,
    ) -> Result<()> {
        self.require(Capability::Update3d)?;
        if self.update_session().mode == UpdateMode::VerifyOnly && mode != UpdateMode::VerifyOnly {
            return Err(HmiError::BadParameter(
                "verification session only accepts verification",
            ));
        }

        let _command = self.shared.command();
        self.shared
            .send_3d(&block_message(address, length, data, mode))
    }

    /// Completes the update session by committing the version string, then
    /// restarts the device.
    pub fn update_end(&self, version: &[u8; VERSION_LENGTH]) -> Result<()> {
        self.require(Capability::Update3d)?;
        let session = self.update_session();
        let _command = self.shared.command();

        self.shared
            .send_3d(&end_message(session.session_id, session.mode, version))?;
        self.shared.send_3d(&end_message(
            session.session_id,
            UpdateMode::Restart,
            &[0; VERSION_LENGTH],
        ))?;

        info!(session_id = session.session_id, "firmware update completed");
        Ok(())
    }

    /// Runs a complete update session with all records of `image`.
    pub fn update_image(
        &self,
        session_id: u32,
        image: &UpdateImage,
        mode: UpdateMode,
    ) -> Result<()> {
        self.update_begin(session_id, &image.iv, mode)?;
        for record in &image.records {
            self.update_write(record.address, record.length, &record.data, mode)?;
        }
        self.update_end(&image.fw_version)
    }

    /// Waits until an updated loader finished and reports a valid firmware.
    pub fn wait_loader_done(&self) -> Result<()> {
        self.require(Capability::Update3d)?;
        let _command = self.shared.command();

        let (_pending, rx) = self.shared.pending.version_3d.watch(());
        let deadline = Instant::now() + self.shared.config.loader_timeout;
        loop {
            let info = self
                .shared
                .wait_for(&rx, deadline)?
                .ok_or(HmiError::NoResponse)?;
            if info.fw_valid == 0 {
                return Ok(());
            }
            debug!(fw_valid = info.fw_valid, "loader still busy");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_iv() -> [u8; IV_LENGTH] {
        std::array::from_fn(|i| i as u8 + 1)
    }

    #[test]
    fn begin_checksum_matches_reference() {
        let msg = begin_message(0x1234_5678, &sample_iv(), UpdateMode::ProgramFlash);
        assert_eq!(msg[..4], [28, 0, 0, 0x80]);
        assert_eq!(Wire::u32(&msg, 4), 0x5AA2_37AD);
    }

    #[test]
    fn checksum_detects_single_byte_corruption() {
        let msg = begin_message(0x1234_5678, &sample_iv(), UpdateMode::ProgramFlash);
        let reference = crc32fast::hash(&msg[CRC_START..]);
        for i in CRC_START..msg.len() {
            let mut corrupted = msg;
            corrupted[i] ^= 0x01;
            assert_ne!(crc32fast::hash(&corrupted[CRC_START..]), reference, "byte {i}");
        }
    }

    #[test]
    fn crc_is_the_reflected_standard() {
        assert_eq!(crc32fast::hash(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn block_and_end_layouts() {
        let data = [0xA5; RECORD_DATA_LENGTH];
        let block = block_message(0x2080, 0x80, &data, UpdateMode::VerifyOnly);
        assert_eq!(block[..4], [140, 0, 0, 0x81]);
        assert_eq!(block[8..12], [0x80, 0x20, 0x80, 0x01]);
        assert_eq!(Wire::u32(&block, 4), crc32fast::hash(&block[8..]));

        let end = end_message(7, UpdateMode::Restart, &[0; VERSION_LENGTH]);
        assert_eq!(end[..4], [136, 0, 0, 0x82]);
        assert_eq!(end[8..13], [7, 0, 0, 0, 3]);
        assert_eq!(Wire::u32(&end, 4), crc32fast::hash(&end[8..]));
    }
}
