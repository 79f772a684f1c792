//! Targets for writing image data to a device.
//!
//! [`RawFlashTarget`] and [`CompressedFlashTarget`] stream an image into
//! SPI flash (uncompressed and zlib-compressed respectively);
//! [`RamTarget`] loads a segment into device RAM, which is how the flasher
//! stub gets uploaded.

use std::borrow::Cow;

use log::{debug, warn};
use md5::{Digest, Md5};

pub use self::{compressed::CompressedFlashTarget, ram::RamTarget, raw::RawFlashTarget};
use crate::{
    command::Command,
    connection::Connection,
    error::{Error, ResultExt},
};

mod compressed;
mod ram;
mod raw;

/// Flash erase granularity of every supported chip.
pub(crate) const FLASH_SECTOR_SIZE: usize = 0x1000;
/// Transfer block size accepted by the ROM loaders.
pub(crate) const FLASH_WRITE_SIZE: usize = 0x400;
/// Transfer block size accepted by the RAM stub.
pub(crate) const STUB_FLASH_WRITE_SIZE: usize = 0x4000;
/// Transfer block size for RAM downloads.
pub(crate) const MAX_RAM_BLOCK_SIZE: usize = 0x1800;

/// Settle time after the final FLASH_END before the loader is ready again.
const FLASH_END_SETTLE_DELAY: std::time::Duration = std::time::Duration::from_millis(200);

/// A contiguous run of bytes destined for a fixed device address.
#[derive(Debug, Clone)]
pub struct Segment<'a> {
    /// Flash offset or RAM load address.
    pub addr: u32,
    pub data: Cow<'a, [u8]>,
}

/// Operations for writing to a device target.
pub trait FlashTarget {
    /// Write a segment to the target.
    fn write_segment(
        &mut self,
        connection: &mut Connection,
        segment: Segment<'_>,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<(), Error>;

    /// Complete the download.
    fn finish(&mut self, connection: &mut Connection) -> Result<(), Error>;
}

/// Progress update callbacks.
pub trait ProgressCallbacks {
    /// Initialize some progress report.
    fn init(&mut self, addr: u32, total: usize);
    /// Update some progress report.
    fn update(&mut self, current: usize);
    /// Indicate that post-write checksum verification has begun.
    fn verifying(&mut self);
    /// Finish some progress report.
    fn finish(&mut self);
}

/// An empty implementation of [ProgressCallbacks] that does nothing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DefaultProgressCallback;

impl ProgressCallbacks for DefaultProgressCallback {
    fn init(&mut self, _addr: u32, _total: usize) {}
    fn update(&mut self, _current: usize) {}
    fn verifying(&mut self) {}
    fn finish(&mut self) {}
}

/// Send FLASH_END (staying in the loader) and give it time to settle.
pub(crate) fn flash_end(connection: &mut Connection) -> Result<(), Error> {
    connection.command(Command::FlashEnd)?;
    std::thread::sleep(FLASH_END_SETTLE_DELAY);
    Ok(())
}

/// Send one data block, re-sending it once with the same sequence number if
/// the first attempt fails. A second failure aborts the transfer.
pub(crate) fn send_block(
    connection: &mut Connection,
    command: Command<'_>,
    sequence: u32,
) -> Result<(), Error> {
    match connection.command(command) {
        Ok(_) => Ok(()),
        Err(err) => {
            debug!("Block {} failed ({:?}), re-sending once", sequence, err);
            connection.command(command)?;
            Ok(())
        }
    }
}

/// Ask the loader for the MD5 of the freshly written region and compare it
/// against the digest of the image we hold.
pub(crate) fn verify_md5(
    connection: &mut Connection,
    offset: u32,
    image: &[u8],
) -> Result<(), Error> {
    let response = connection
        .command(Command::FlashMd5 {
            offset,
            size: image.len() as u32,
        })
        .flashing()?;
    let device = parse_md5_digest(&response.data)?;

    let mut hasher = Md5::new();
    hasher.update(image);
    let local: [u8; 16] = hasher.finalize().into();

    if device != local {
        warn!(
            "MD5 mismatch at {:#x}: device reports {:02x?}, image is {:02x?}",
            offset, device, local
        );
        return Err(Error::VerifyFailed { offset });
    }

    debug!("Flash content at {:#x} verified", offset);
    Ok(())
}

/// Extract the 16-byte digest from an MD5 reply body.
///
/// Stub loaders return the digest as 16 raw bytes, ROM loaders as 32 ASCII
/// hex digits; the length tells them apart.
fn parse_md5_digest(data: &[u8]) -> Result<[u8; 16], Error> {
    match data.len() {
        16 => Ok(data.try_into().unwrap()),
        32 => {
            let text = std::str::from_utf8(data)
                .map_err(|_| Error::InvalidResponse("MD5 reply is not ASCII hex".into()))?;
            let mut digest = [0u8; 16];
            for (i, byte) in digest.iter_mut().enumerate() {
                *byte = u8::from_str_radix(&text[2 * i..2 * i + 2], 16)
                    .map_err(|_| Error::InvalidResponse("MD5 reply is not ASCII hex".into()))?;
            }
            Ok(digest)
        }
        other => Err(Error::InvalidResponse(format!(
            "unexpected MD5 reply length: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_md5_digest;

    #[test]
    fn stub_digest_is_raw_bytes() {
        let digest = parse_md5_digest(&[0x42; 16]).unwrap();
        assert_eq!(digest, [0x42; 16]);
    }

    #[test]
    fn rom_digest_is_ascii_hex() {
        let digest = parse_md5_digest(b"d41d8cd98f00b204e9800998ecf8427e").unwrap();
        assert_eq!(
            digest,
            [
                0xD4, 0x1D, 0x8C, 0xD9, 0x8F, 0x00, 0xB2, 0x04, 0xE9, 0x80, 0x09, 0x98, 0xEC,
                0xF8, 0x42, 0x7E
            ]
        );
    }

    #[test]
    fn unexpected_digest_length_is_rejected() {
        assert!(parse_md5_digest(&[0x00; 20]).is_err());
    }
}
