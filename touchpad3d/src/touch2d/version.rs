//! Firmware version query of the 2D subsystem.

use crate::{
    codec::Wire,
    error::{HmiError, Result},
    message::OutboundId2d,
    session::{Session, engine::Shared},
};

const VERSION_INFO_LENGTH: usize = 128;

/// Build information of the 2D firmware.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VersionInfo2d {
    pub svn_revision: u16,

    /// Whether the working copy mixed revisions.
    pub wc_mixed: u8,

    /// Whether the working copy had local modifications.
    pub wc_modified: u8,

    pub build_year: u16,
    pub build_month: u8,
    pub build_day: u8,
    pub build_hour: u8,
    pub build_minute: u8,
    pub build_second: u8,
    pub build_by: String,
    pub info: String,
    pub checksum: u32,
    pub app_id: u32,
    pub version: [u8; 4],
}

/// Reads a zero padded string field.
fn padded_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl VersionInfo2d {
    /// Decodes a version info payload. Returns `None` on a size mismatch.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != VERSION_INFO_LENGTH {
            return None;
        }

        Some(Self {
            svn_revision: Wire::u16(payload, 0),
            wc_mixed: payload[2],
            wc_modified: payload[3],
            build_year: Wire::u16(payload, 4),
            build_month: payload[6],
            build_day: payload[7],
            build_hour: payload[8],
            build_minute: payload[9],
            build_second: payload[10],
            build_by: padded_str(&payload[11..20]),
            info: padded_str(&payload[20..96]),
            checksum: Wire::u32(payload, 108),
            app_id: Wire::u32(payload, 120),
            version: [payload[124], payload[125], payload[126], payload[127]],
        })
    }
}

pub(crate) fn handle(shared: &Shared, payload: &[u8]) {
    let Some(info) = VersionInfo2d::parse(payload) else {
        shared.diagnostics.bad_data(
            "handle_fw_version",
            "expected message size of 128 bytes",
            payload.len() as i64,
            VERSION_INFO_LENGTH as i64,
        );
        return;
    };
    shared.pending.version_2d.fulfil(|_| Some(info));
}

impl Session {
    /// Queries the build information of the 2D firmware.
    pub fn fw_version_2d(&self) -> Result<VersionInfo2d> {
        self.ensure_open()?;
        let _command = self.shared.command();

        let (_pending, rx) = self.shared.pending.version_2d.register(());
        self.shared.send_2d(OutboundId2d::FwVersion, &[])?;

        rx.try_recv().map_err(|_| HmiError::MessageMissing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_build_information() {
        let mut payload = [0u8; VERSION_INFO_LENGTH];
        payload[0..2].copy_from_slice(&1234u16.to_le_bytes());
        payload[3] = 1;
        payload[4..6].copy_from_slice(&2014u16.to_le_bytes());
        payload[6..11].copy_from_slice(&[7, 15, 13, 37, 59]);
        payload[11..16].copy_from_slice(b"build");
        payload[20..28].copy_from_slice(b"3DTP 2.1");
        payload[108..112].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        payload[120..124].copy_from_slice(&0x5432u32.to_le_bytes());
        payload[124..].copy_from_slice(&[2, 1, 0, 9]);

        let info = VersionInfo2d::parse(&payload).unwrap();
        assert_eq!(info.svn_revision, 1234);
        assert_eq!(info.wc_modified, 1);
        assert_eq!(
            (info.build_year, info.build_month, info.build_day),
            (2014, 7, 15)
        );
        assert_eq!(info.build_second, 59);
        assert_eq!(info.build_by, "build");
        assert_eq!(info.info, "3DTP 2.1");
        assert_eq!(info.checksum, 0xDEAD_BEEF);
        assert_eq!(info.app_id, 0x5432);
        assert_eq!(info.version, [2, 1, 0, 9]);

        assert!(VersionInfo2d::parse(&payload[..127]).is_none());
    }
}
