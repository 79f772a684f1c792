use std::io::Write;

use flate2::{write::ZlibEncoder, Compression};
use log::debug;

use crate::{
    command::Command,
    connection::Connection,
    error::{ConnectionError, Error, ResultExt},
    flash_target::{
        flash_end, send_block, verify_md5, FlashTarget, ProgressCallbacks, Segment,
        FLASH_SECTOR_SIZE, FLASH_WRITE_SIZE, STUB_FLASH_WRITE_SIZE,
    },
    targets::Chip,
};

/// A target that deflates an image before streaming it to SPI flash.
///
/// The loader inflates on the fly, so the block count on the wire is over
/// the compressed byte stream while erase sizing and verification work on
/// the uncompressed image.
pub struct CompressedFlashTarget {
    chip: Chip,
    use_stub: bool,
    verify: bool,
}

impl CompressedFlashTarget {
    pub fn new(chip: Chip, use_stub: bool, verify: bool) -> Self {
        CompressedFlashTarget {
            chip,
            use_stub,
            verify,
        }
    }
}

impl FlashTarget for CompressedFlashTarget {
    fn write_segment(
        &mut self,
        connection: &mut Connection,
        segment: Segment<'_>,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<(), Error> {
        let addr = segment.addr;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder
            .write_all(&segment.data)
            .map_err(ConnectionError::from)?;
        let compressed = encoder.finish().map_err(ConnectionError::from)?;

        let block_size = if self.use_stub {
            STUB_FLASH_WRITE_SIZE
        } else {
            FLASH_WRITE_SIZE
        };
        let block_count = compressed.len().div_ceil(block_size);

        // The size word covers the uncompressed image: exact for the stub,
        // rounded up to the erase sector for the ROM loader.
        let write_size = if self.use_stub {
            segment.data.len()
        } else {
            segment.data.len().div_ceil(FLASH_SECTOR_SIZE) * FLASH_SECTOR_SIZE
        };

        debug!(
            "Writing {} bytes ({} compressed, {} blocks) to {:#x}",
            segment.data.len(),
            compressed.len(),
            block_count,
            addr
        );

        connection
            .command(Command::FlashDeflBegin {
                size: write_size as u32,
                blocks: block_count as u32,
                block_size: block_size as u32,
                offset: addr,
                supports_encryption: self.chip.supports_extended_begin(),
            })
            .flashing()?;

        progress.init(addr, block_count);

        for (i, block) in compressed.chunks(block_size).enumerate() {
            // Compressed blocks go out at their natural length; the tail is
            // never padded.
            let command = Command::FlashDeflData {
                data: block,
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
