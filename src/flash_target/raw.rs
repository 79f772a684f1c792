use log::debug;

use crate::{
    command::Command,
    connection::Connection,
    error::{Error, ResultExt},
    flash_target::{
        flash_end, send_block, verify_md5, FlashTarget, ProgressCallbacks, Segment,
        FLASH_SECTOR_SIZE, FLASH_WRITE_SIZE, STUB_FLASH_WRITE_SIZE,
    },
    targets::Chip,
};

const FLASH_SECTORS_PER_BLOCK: usize = 16;

/// A target that writes an image to SPI flash uncompressed.
pub struct RawFlashTarget {
    chip: Chip,
    use_stub: bool,
    verify: bool,
}

impl RawFlashTarget {
    pub fn new(chip: Chip, use_stub: bool, verify: bool) -> Self {
        RawFlashTarget {
            chip,
            use_stub,
            verify,
        }
    }
}

impl FlashTarget for RawFlashTarget {
    fn write_segment(
        &mut self,
        connection: &mut Connection,
        segment: Segment<'_>,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<(), Error> {
        let addr = segment.addr;
        let block_size = if self.use_stub {
            STUB_FLASH_WRITE_SIZE
        } else {
            FLASH_WRITE_SIZE
        };
        let block_count = segment.data.len().div_ceil(block_size);

        // The stub takes the exact byte count; the ROM loader wants to know
        // how much to erase up front.
        let write_size = if self.use_stub {
            segment.data.len()
        } else {
            erase_size(self.chip, addr as usize, segment.data.len())
        };

        debug!(
            "Writing {} bytes ({} blocks) to {:#x}",
            segment.data.len(),
            block_count,
            addr
        );

        connection
            .command(Command::FlashBegin {
                size: write_size as u32,
                blocks: block_count as u32,
                block_size: block_size as u32,
                offset: addr,
                supports_encryption: self.chip.supports_extended_begin(),
            })
            .flashing()?;

        progress.init(addr, block_count);

        for (i, block) in segment.data.chunks(block_size).enumerate() {
            let command = Command::FlashData {
                data: block,
                pad_to: block_size,
                sequence: i as u32,
            };
            send_block(connection, command, i as u32).flashing()?;
            progress.update(i + 1);
        }

        if self.verify && self.chip.supports_md5() {
            progress.verifying();
            verify_md5(connection, addr, &segment.data)?;
        }

        progress.finish();
        Ok(())
    }

    fn finish(&mut self, connection: &mut Connection) -> Result<(), Error> {
        flash_end(connection).flashing()
    }
}

/// Number of bytes the ROM loader should erase for an image of `size` bytes
/// at `offset`.
fn erase_size(chip: Chip, offset: usize, size: usize) -> usize {
    match chip {
        Chip::Esp8266 => esp8266_erase_size(offset, size),
        _ => size.div_ceil(FLASH_SECTOR_SIZE) * FLASH_SECTOR_SIZE,
    }
}

/// The ESP8266 ROM erases more than asked once the write crosses its first
/// 16-sector block; shrink the request so the erased range comes out right.
fn esp8266_erase_size(offset: usize, size: usize) -> usize {
    let sector_count = size.div_ceil(FLASH_SECTOR_SIZE);
    let start_sector = offset / FLASH_SECTOR_SIZE;

    let head_sectors = usize::min(
        FLASH_SECTORS_PER_BLOCK - (start_sector % FLASH_SECTORS_PER_BLOCK),
        sector_count,
    );

    if sector_count < 2 * head_sectors {
        sector_count.div_ceil(2) * FLASH_SECTOR_SIZE
    } else {
        (sector_count - head_sectors) * FLASH_SECTOR_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erase_rounds_up_to_sectors() {
        assert_eq!(erase_size(Chip::Esp32, 0x1_0000, 1), 0x1000);
        assert_eq!(erase_size(Chip::Esp32, 0x1_0000, 0x400), 0x1000);
        assert_eq!(erase_size(Chip::Esp32, 0x1_0000, 0x1000), 0x1000);
        assert_eq!(erase_size(Chip::Esp32, 0x1_0000, 0x1001), 0x2000);
    }

    #[test]
    fn esp8266_erase_compensates_for_the_rom_bug() {
        // Entirely within the first 16-sector block: halved, rounded up.
        assert_eq!(esp8266_erase_size(0, 0x4000), 0x2000);
        // Crossing the block boundary: the head sectors are dropped.
        assert_eq!(esp8266_erase_size(0, 0x40000), 0x40000 - 16 * FLASH_SECTOR_SIZE);
        // Unaligned start shrinks the head.
        assert_eq!(esp8266_erase_size(0xF000, 0x2000), 0x1000);
    }
}
