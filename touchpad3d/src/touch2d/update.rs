//! Bootloader of the 2D subsystem.
//!
//! Bootloader commands are sent once without retry. Each one is answered by an
//! update response carrying a bootloader error code.

use std::time::Instant;

use tracing::debug;

use crate::{
    codec::Wire,
    config::Capability,
    error::{BootloaderError, HmiError, Result},
    message::OutboundId2d,
    session::{Session, engine::Shared},
};

use super::single_byte;

/// The first address of program memory.
pub const PROG_MEM_START: u32 = 0x1D00_3000;

/// The end of program memory.
pub const PROG_MEM_END: u32 = 0x1D01_0000;

/// The size of an erase page.
pub const PROG_PAGE_SIZE: u32 = 0x1000;

/// The size of a flash block.
pub const PROG_BLOCK_SIZE: usize = 512;

/// The number of blocks of a complete image.
pub const PROG_BLOCK_COUNT: usize = 104;

/// The size of the data of one flash write command.
const WRITE_CHUNK: usize = 32;

const CMD_ENTER: u8 = 0xF0;
const CMD_ERASE: u8 = 0xF2;
const CMD_ADDRESS: u8 = 0xF4;
const CMD_WRITE: u8 = 0xF5;
const CMD_EXIT: u8 = 0xF6;
const CMD_UNLOCK: u8 = 0xF7;

/// Word count of a flash write command.
const WRITE_WORDS: u8 = 0x08;

/// One block of program memory.
pub type FlashBlock = [u8; PROG_BLOCK_SIZE];

/// A complete program memory image.
pub type FlashImage = [FlashBlock; PROG_BLOCK_COUNT];

pub(crate) fn handle(shared: &Shared, payload: &[u8]) {
    if let Some(code) = single_byte(shared, "handle_update_response", payload) {
        shared.pending.update_2d.fulfil(|_| Some(BootloaderError::from(code)));
    }
}

fn address_command(cmd: u8, addr: u32) -> [u8; 5] {
    let mut msg = [cmd, 0, 0, 0, 0];
    Wire::put_u32(&mut msg, 1, addr);
    msg
}

impl Session {
    /// Sends a bootloader command and waits for its update response.
    fn bootloader_command(&self, cmd: &[u8]) -> Result<()> {
        let shared = &self.shared;
        let (_pending, rx) = shared.pending.update_2d.register(());
        shared.channel.write_2d(OutboundId2d::Update, cmd)?;

        let deadline = Instant::now() + shared.config.update_timeout;
        let code = shared.wait_for(&rx, deadline)?.ok_or(HmiError::NoResponse)?;
        shared.record_bootloader_error(code);
        match code {
            BootloaderError::NoError => Ok(()),
            code => Err(HmiError::Bootloader(code)),
        }
    }

    fn bootloader(&self, cmd: &[u8]) -> Result<()> {
        self.require(Capability::Update2d)?;
        let _command = self.shared.command();
        self.bootloader_command(cmd)
    }

    /// Switches the 2D subsystem into its bootloader.
    pub fn enter_bootloader(&self) -> Result<()> {
        self.bootloader(&[CMD_ENTER])
    }

    /// Unlocks the program memory for erasing and writing.
    pub fn unlock_bootloader(&self) -> Result<()> {
        self.bootloader(&[CMD_UNLOCK])
    }

    /// Leaves the bootloader and starts the firmware.
    pub fn exit_bootloader(&self) -> Result<()> {
        self.bootloader(&[CMD_EXIT])
    }

    /// Erases the complete program memory page by page.
    pub fn erase_memory(&self) -> Result<()> {
        self.require(Capability::Update2d)?;
        let _command = self.shared.command();

        for addr in (PROG_MEM_START..PROG_MEM_END).step_by(PROG_PAGE_SIZE as usize) {
            self.bootloader_command(&address_command(CMD_ERASE, addr))?;
        }
        debug!("program memory erased");
        Ok(())
    }

    /// Writes one block of program memory at `addr`.
    pub fn flash_block(&self, addr: u32, block: &FlashBlock) -> Result<()> {
        self.require(Capability::Update2d)?;
        let in_range = addr >= PROG_MEM_START
            && addr
                .checked_add(PROG_BLOCK_SIZE as u32)
                .is_some_and(|end| end <= PROG_MEM_END);
        if !in_range {
            return Err(HmiError::BadParameter("block outside of program memory"));
        }

        let _command = self.shared.command();
        self.write_block(addr, block)
    }

    fn write_block(&self, addr: u32, block: &FlashBlock) -> Result<()> {
        self.bootloader_command(&address_command(CMD_ADDRESS, addr))?;

        let mut cmd = [0u8; 3 + WRITE_CHUNK];
        cmd[0] = CMD_WRITE;
        cmd[1] = WRITE_WORDS;
        for (i, chunk) in block.chunks_exact(WRITE_CHUNK).enumerate() {
            cmd[2] = i as u8;
            cmd[3..].copy_from_slice(chunk);
            self.bootloader_command(&cmd)?;
        }
        Ok(())
    }

    /// Writes a complete image to program memory.
    pub fn flash_memory(&self, image: &FlashImage) -> Result<()> {
        self.require(Capability::Update2d)?;
        let _command = self.shared.command();

        let mut addr = PROG_MEM_START;
        for block in image {
            self.write_block(addr, block)?;
            addr += PROG_BLOCK_SIZE as u32;
        }
        debug!(blocks = image.len(), "program memory written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_fills_program_memory() {
        let end = PROG_MEM_START + (PROG_BLOCK_COUNT * PROG_BLOCK_SIZE) as u32;
        assert_eq!(end, PROG_MEM_END);
        assert_eq!(
            address_command(CMD_ERASE, PROG_MEM_START),
            [0xF2, 0x00, 0x30, 0x00, 0x1D]
        );
    }
}
