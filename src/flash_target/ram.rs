use log::debug;

use crate::{
    command::Command,
    connection::Connection,
    error::Error,
    flash_target::{FlashTarget, ProgressCallbacks, Segment, MAX_RAM_BLOCK_SIZE},
};

/// A target for loading code into device RAM.
pub struct RamTarget {
    entry: u32,
}

impl RamTarget {
    pub fn new(entry: u32) -> Self {
        RamTarget { entry }
    }
}

impl FlashTarget for RamTarget {
    fn write_segment(
        &mut self,
        connection: &mut Connection,
        segment: Segment<'_>,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<(), Error> {
        let addr = segment.addr;
        let block_count = segment.data.len().div_ceil(MAX_RAM_BLOCK_SIZE);

        connection.command(Command::MemBegin {
            size: segment.data.len() as u32,
            blocks: block_count as u32,
            block_size: MAX_RAM_BLOCK_SIZE as u32,
            offset: addr,
        })?;

        progress.init(addr, block_count);

        for (i, block) in segment.data.chunks(MAX_RAM_BLOCK_SIZE).enumerate() {
            // RAM downloads take the final block at its natural length.
            connection.command(Command::MemData {
                data: block,
                sequence: i as u32,
            })?;
            progress.update(i + 1);
        }

        progress.finish();
        Ok(())
    }

    fn finish(&mut self, connection: &mut Connection) -> Result<(), Error> {
        debug!("Jumping to RAM entry point {:#010x}", self.entry);
        connection.command(Command::MemEnd { entry: self.entry })?;
        Ok(())
    }
}
