//! Commands understood by the ROM bootloader and the RAM flasher stub.
//!
//! Every request is framed as `0x00 | opcode | len (LE u16) | checksum
//! (LE u32) | payload` before SLIP encoding. The checksum word is only
//! meaningful for the data-carrying opcodes, where it is the XOR reduction
//! of `0xEF` and every payload data byte (padding included); control
//! commands carry `0`.

use std::{io::Write, time::Duration};

use bytemuck::{bytes_of, Pod, Zeroable};
use strum::Display;

use crate::flasher::SpiSetParams;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const SYNC_TIMEOUT: Duration = Duration::from_millis(100);
const MEM_END_TIMEOUT: Duration = Duration::from_millis(50);
const BEGIN_TIMEOUT_PER_MB: Duration = Duration::from_secs(30);
const DATA_TIMEOUT_PER_MB: Duration = Duration::from_secs(40);
const MD5_TIMEOUT_PER_MB: Duration = Duration::from_secs(8);

/// Body of the SYNC command: 0x07 0x07 0x12 0x20 followed by 32 x 0x55.
const SYNC_FRAME: [u8; 36] = {
    let mut frame = [0x55u8; 36];
    frame[0] = 0x07;
    frame[1] = 0x07;
    frame[2] = 0x12;
    frame[3] = 0x20;
    frame
};

/// Opcodes of the serial bootloader protocol.
///
/// The 0xD0..0xD3 range is only implemented by the RAM stub; `ReadFlashSlow`
/// is only implemented by the ROM and must not be issued once the stub is
/// running.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
#[non_exhaustive]
#[repr(u8)]
pub enum CommandType {
    FlashBegin = 0x02,
    FlashData = 0x03,
    FlashEnd = 0x04,
    MemBegin = 0x05,
    MemEnd = 0x06,
    MemData = 0x07,
    Sync = 0x08,
    WriteReg = 0x09,
    ReadReg = 0x0A,
    SpiSetParams = 0x0B,
    SpiAttach = 0x0D,
    ReadFlashSlow = 0x0E,
    ChangeBaudrate = 0x0F,
    FlashDeflBegin = 0x10,
    FlashDeflData = 0x11,
    FlashDeflEnd = 0x12,
    FlashMd5 = 0x13,
    // Implemented only by the RAM stub
    EraseFlash = 0xD0,
    EraseRegion = 0xD1,
    ReadFlash = 0xD2,
    RunUserCode = 0xD3,
}

impl CommandType {
    /// Return the default timeout for this command.
    pub fn timeout(&self) -> Duration {
        match self {
            CommandType::MemEnd => MEM_END_TIMEOUT,
            CommandType::Sync => SYNC_TIMEOUT,
            _ => DEFAULT_TIMEOUT,
        }
    }

    /// Return a timeout that scales with the amount of flash involved in
    /// the transfer.
    pub fn timeout_for_size(&self, size: u32) -> Duration {
        let per_mb = match self {
            CommandType::FlashBegin | CommandType::FlashDeflBegin => BEGIN_TIMEOUT_PER_MB,
            CommandType::FlashData | CommandType::FlashDeflData => DATA_TIMEOUT_PER_MB,
            CommandType::FlashMd5 => MD5_TIMEOUT_PER_MB,
            _ => return self.timeout(),
        };

        per_mb.mul_f64(size as f64 / 1_000_000.0).max(DEFAULT_TIMEOUT)
    }
}

/// A single request to the loader, with everything needed to put it on the
/// wire.
#[derive(Copy, Clone, Debug)]
#[non_exhaustive]
pub enum Command<'a> {
    /// Begin a flash download.
    FlashBegin {
        /// Bytes to erase (ROM) or exact write size (stub).
        size: u32,
        /// Number of data packets that will follow.
        blocks: u32,
        /// Data size of one packet.
        block_size: u32,
        /// Flash offset.
        offset: u32,
        /// Append the encryption word to the parameter block. Required on
        /// everything newer than the ESP32/ESP8266.
        supports_encryption: bool,
    },
    /// One block of a flash download, padded to the block size with 0xFF.
    FlashData {
        data: &'a [u8],
        pad_to: usize,
        sequence: u32,
    },
    /// Finish a flash download, staying in the loader.
    FlashEnd,
    /// Begin a RAM download.
    MemBegin {
        size: u32,
        blocks: u32,
        block_size: u32,
        offset: u32,
    },
    /// Finish a RAM download and jump to the entry point.
    MemEnd { entry: u32 },
    /// One block of a RAM download. Never padded.
    MemData { data: &'a [u8], sequence: u32 },
    /// Sync frame; the first command after reset.
    Sync,
    /// Write a 32-bit register.
    WriteReg {
        address: u32,
        value: u32,
        mask: Option<u32>,
    },
    /// Read a 32-bit register.
    ReadReg { address: u32 },
    /// Configure the attached SPI flash chip.
    SpiSetParams { spi_params: SpiSetParams },
    /// Attach the SPI flash chip (ROM loader form, with the trailing
    /// configuration word zeroed to use the fused pin assignment).
    SpiAttach,
    /// Change the baud rate.
    ChangeBaudrate {
        new_baud: u32,
        /// Rate the stub is currently running at; `0` for the ROM loader.
        prior_baud: u32,
    },
    /// Begin a compressed flash download.
    FlashDeflBegin {
        /// Uncompressed image size (stub) or erase budget (ROM).
        size: u32,
        /// Number of *compressed* data packets that will follow.
        blocks: u32,
        block_size: u32,
        offset: u32,
        supports_encryption: bool,
    },
    /// One block of a compressed flash download, sent at its natural
    /// length.
    FlashDeflData { data: &'a [u8], sequence: u32 },
    /// Calculate the MD5 digest of a flash region.
    FlashMd5 { offset: u32, size: u32 },
}

impl Command<'_> {
    /// Return the opcode of this command.
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::FlashBegin { .. } => CommandType::FlashBegin,
            Command::FlashData { .. } => CommandType::FlashData,
            Command::FlashEnd => CommandType::FlashEnd,
            Command::MemBegin { .. } => CommandType::MemBegin,
            Command::MemEnd { .. } => CommandType::MemEnd,
            Command::MemData { .. } => CommandType::MemData,
            Command::Sync => CommandType::Sync,
            Command::WriteReg { .. } => CommandType::WriteReg,
            Command::ReadReg { .. } => CommandType::ReadReg,
            Command::SpiSetParams { .. } => CommandType::SpiSetParams,
            Command::SpiAttach => CommandType::SpiAttach,
            Command::ChangeBaudrate { .. } => CommandType::ChangeBaudrate,
            Command::FlashDeflBegin { .. } => CommandType::FlashDeflBegin,
            Command::FlashDeflData { .. } => CommandType::FlashDeflData,
            Command::FlashMd5 { .. } => CommandType::FlashMd5,
        }
    }

    /// Return the reply deadline for this command, scaled by the data it
    /// carries where that matters.
    pub fn timeout(&self) -> Duration {
        match self {
            Command::FlashBegin { size, .. } => CommandType::FlashBegin.timeout_for_size(*size),
            Command::FlashDeflBegin { size, .. } => {
                CommandType::FlashDeflBegin.timeout_for_size(*size)
            }
            Command::FlashData { data, pad_to, .. } => {
                CommandType::FlashData.timeout_for_size((*pad_to).max(data.len()) as u32)
            }
            Command::FlashDeflData { data, .. } => {
                CommandType::FlashDeflData.timeout_for_size(data.len() as u32)
            }
            Command::FlashMd5 { size, .. } => CommandType::FlashMd5.timeout_for_size(*size),
            other => other.command_type().timeout(),
        }
    }

    /// Write the framed request (direction byte, opcode, length, checksum
    /// and payload) to a writer.
    pub fn write<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_all(&[0, self.command_type() as u8])?;
        match *self {
            Command::FlashBegin {
                size,
                blocks,
                block_size,
                offset,
                supports_encryption,
            }
            | Command::FlashDeflBegin {
                size,
                blocks,
                block_size,
                offset,
                supports_encryption,
            } => {
                let params = DownloadParams {
                    total: size,
                    packets: blocks,
                    packet_size: block_size,
                    target: offset,
                };
                if supports_encryption {
                    emit(writer, 0, &[bytes_of(&params), &[0u8; 4]])
                } else {
                    emit(writer, 0, &[bytes_of(&params)])
                }
            }
            Command::FlashData {
                data,
                pad_to,
                sequence,
            } => emit_block(writer, data, sequence, pad_to, 0xFF),
            Command::FlashEnd => {
                // Two sentinel bytes, then a little-endian 1 meaning "do
                // not reboot".
                emit(writer, 0, &[&[0x3C, 0x49], &1u32.to_le_bytes()])
            }
            Command::MemBegin {
                size,
                blocks,
                block_size,
                offset,
            } => {
                let params = DownloadParams {
                    total: size,
                    packets: blocks,
                    packet_size: block_size,
                    target: offset,
                };
                emit(writer, 0, &[bytes_of(&params)])
            }
            Command::MemEnd { entry } => {
                // The leading zero word asks the loader to jump to `entry`.
                emit(writer, 0, &[&0u32.to_le_bytes(), &entry.to_le_bytes()])
            }
            Command::MemData { data, sequence } => emit_block(writer, data, sequence, 0, 0x00),
            Command::Sync => emit(writer, 0, &[&SYNC_FRAME]),
            Command::WriteReg {
                address,
                value,
                mask,
            } => emit(
                writer,
                0,
                &[
                    &address.to_le_bytes(),
                    &value.to_le_bytes(),
                    &mask.unwrap_or(u32::MAX).to_le_bytes(),
                    // delay in microseconds before the write lands
                    &0u32.to_le_bytes(),
                ],
            ),
            Command::ReadReg { address } => emit(writer, 0, &[&address.to_le_bytes()]),
            Command::SpiSetParams { spi_params } => emit(writer, 0, &[&spi_params.encode()]),
            Command::SpiAttach => emit(writer, 0, &[&[0u8; 8]]),
            Command::ChangeBaudrate {
                new_baud,
                prior_baud,
            } => emit(
                writer,
                0,
                &[&new_baud.to_le_bytes(), &prior_baud.to_le_bytes()],
            ),
            Command::FlashDeflData { data, sequence } => {
                emit_block(writer, data, sequence, 0, 0xFF)
            }
            Command::FlashMd5 { offset, size } => emit(
                writer,
                0,
                &[&offset.to_le_bytes(), &size.to_le_bytes(), &[0u8; 8]],
            ),
        }
    }
}

/// Parameter block shared by the BEGIN commands. Chips that know about
/// flash encryption take one extra word, appended by the caller.
#[derive(Zeroable, Pod, Copy, Clone, Debug)]
#[repr(C)]
struct DownloadParams {
    total: u32,
    packets: u32,
    packet_size: u32,
    target: u32,
}

/// Header preceding the payload of every DATA command.
#[derive(Zeroable, Pod, Copy, Clone, Debug)]
#[repr(C)]
struct BlockHeader {
    len: u32,
    sequence: u32,
    reserved: [u32; 2],
}

/// Seed of the XOR checksum carried by DATA commands.
const CHECK_SEED: u8 = 0xEF;

/// XOR-reduce the given payload parts, starting from the protocol seed.
fn xor_check<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> u8 {
    parts
        .into_iter()
        .flatten()
        .fold(CHECK_SEED, |check, byte| check ^ byte)
}

/// Write the length and checksum words followed by the payload parts.
fn emit<W: Write>(mut writer: W, check: u8, parts: &[&[u8]]) -> std::io::Result<()> {
    let len: usize = parts.iter().map(|part| part.len()).sum();
    writer.write_all(&(len as u16).to_le_bytes())?;
    writer.write_all(&u32::from(check).to_le_bytes())?;
    for part in parts {
        writer.write_all(part)?;
    }
    Ok(())
}

/// Write a DATA command body: block header, payload, then padding up to
/// `pad_to`. The checksum covers payload and padding but not the header.
fn emit_block<W: Write>(
    writer: W,
    data: &[u8],
    sequence: u32,
    pad_to: usize,
    pad_byte: u8,
) -> std::io::Result<()> {
    let padding = vec![pad_byte; pad_to.saturating_sub(data.len())];
    let header = BlockHeader {
        len: (data.len() + padding.len()) as u32,
        sequence,
        reserved: [0; 2],
    };

    let check = xor_check([data, padding.as_slice()]);
    emit(writer, check, &[bytes_of(&header), data, &padding])
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn encode(command: Command<'_>) -> Vec<u8> {
        let mut out = Vec::new();
        command.write(&mut out).unwrap();
        out
    }

    #[test]
    fn sync_wire_format() {
        let bytes = encode(Command::Sync);
        assert_eq!(&bytes[..8], &[0x00, 0x08, 0x24, 0x00, 0, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[0x07, 0x07, 0x12, 0x20]);
        assert!(bytes[12..].iter().all(|b| *b == 0x55));
        assert_eq!(bytes.len(), 8 + 36);
    }

    #[test]
    fn read_reg_wire_format() {
        let bytes = encode(Command::ReadReg {
            address: 0x4000_1000,
        });
        assert_eq!(
            bytes,
            vec![0x00, 0x0A, 0x04, 0x00, 0, 0, 0, 0, 0x00, 0x10, 0x00, 0x40]
        );
    }

    #[test]
    fn begin_without_encryption_word_is_16_bytes() {
        let bytes = encode(Command::FlashBegin {
            size: 0x1000,
            blocks: 1,
            block_size: 0x400,
            offset: 0x1_0000,
            supports_encryption: false,
        });
        assert_eq!(bytes[2], 16);
        assert_eq!(bytes.len(), 8 + 16);
        assert_eq!(&bytes[8..12], &0x1000u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &0x1_0000u32.to_le_bytes());
    }

    #[test]
    fn begin_with_encryption_word_is_20_bytes() {
        let bytes = encode(Command::FlashBegin {
            size: 0x1000,
            blocks: 1,
            block_size: 0x400,
            offset: 0x1_0000,
            supports_encryption: true,
        });
        assert_eq!(bytes[2], 20);
        assert_eq!(bytes.len(), 8 + 20);
        assert_eq!(&bytes[24..28], &[0, 0, 0, 0]);
    }

    #[test]
    fn data_block_checksum_and_padding() {
        let bytes = encode(Command::FlashData {
            data: &[0xAA, 0xAA],
            pad_to: 4,
            sequence: 3,
        });
        // 16-byte block header plus the padded payload.
        assert_eq!(bytes[2], 20);
        // 0xEF ^ 0xAA ^ 0xAA ^ 0xFF ^ 0xFF = 0xEF
        assert_eq!(&bytes[4..8], &[0xEF, 0, 0, 0]);
        // size field counts the padding
        assert_eq!(&bytes[8..12], &4u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &3u32.to_le_bytes());
        assert_eq!(&bytes[24..], &[0xAA, 0xAA, 0xFF, 0xFF]);
    }

    #[test]
    fn mem_data_is_never_padded() {
        let bytes = encode(Command::MemData {
            data: &[0x01, 0x02, 0x03],
            sequence: 0,
        });
        assert_eq!(bytes[2], 16 + 3);
        assert_eq!(&bytes[4..8], &[0xEF ^ 0x01 ^ 0x02 ^ 0x03, 0, 0, 0]);
        assert_eq!(&bytes[24..], &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn mem_end_takes_entry_point() {
        let bytes = encode(Command::MemEnd { entry: 0x4038_05AC });
        assert_eq!(bytes[2], 8);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &0x4038_05ACu32.to_le_bytes());
    }

    #[test]
    fn flash_end_sentinel_payload() {
        let bytes = encode(Command::FlashEnd);
        assert_eq!(
            bytes,
            vec![0x00, 0x04, 0x06, 0x00, 0, 0, 0, 0, 0x3C, 0x49, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn spi_attach_is_eight_zero_bytes() {
        let bytes = encode(Command::SpiAttach);
        assert_eq!(bytes, vec![0x00, 0x0D, 0x08, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn change_baudrate_payload() {
        let bytes = encode(Command::ChangeBaudrate {
            new_baud: 921_600,
            prior_baud: 115_200,
        });
        assert_eq!(bytes[2], 8);
        assert_eq!(&bytes[8..12], &921_600u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &115_200u32.to_le_bytes());
    }

    #[test]
    fn md5_payload_has_trailing_zero_words() {
        let bytes = encode(Command::FlashMd5 {
            offset: 0x1_0000,
            size: 0x400,
        });
        assert_eq!(bytes[2], 16);
        assert_eq!(&bytes[8..12], &0x1_0000u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &0x400u32.to_le_bytes());
        assert_eq!(&bytes[16..24], &[0u8; 8]);
    }

    #[test]
    fn write_reg_masks_everything_by_default() {
        let bytes = encode(Command::WriteReg {
            address: 0x6000_8090,
            value: 0,
            mask: None,
        });
        assert_eq!(bytes[2], 16);
        assert_eq!(&bytes[8..12], &0x6000_8090u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&bytes[20..24], &[0, 0, 0, 0]);
    }

    #[test]
    fn block_write_timeout_has_a_floor() {
        let timeout = CommandType::FlashData.timeout_for_size(0x400);
        assert_eq!(timeout, DEFAULT_TIMEOUT);

        let timeout = CommandType::FlashData.timeout_for_size(4 * 1024 * 1024);
        assert!(timeout > DEFAULT_TIMEOUT);
    }

    #[test]
    fn checksum_folds_across_parts() {
        let empty: &[u8] = &[];
        assert_eq!(xor_check([empty]), 0xEF);

        let block = [0xAAu8; 1024];
        assert_eq!(xor_check([block.as_slice()]), 0x45);

        let parts: [&[u8]; 2] = [&[0x01, 0x02], &[0x03]];
        assert_eq!(xor_check(parts), 0xEF ^ 0x01 ^ 0x02 ^ 0x03);
    }
}
