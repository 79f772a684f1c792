//! Library errors.
//!
//! Errors are layered the way the protocol is: [`ConnectionError`] covers
//! the serial link and framing, [`RomError`] carries failure codes reported
//! by the chip itself, and [`Error`] is the top-level kind returned by every
//! public operation.

use std::{
    fmt::{Display, Formatter},
    io,
};

use miette::Diagnostic;
use strum::VariantNames;
use thiserror::Error;

use crate::{command::CommandType, targets::Chip};

/// All possible errors returned by this library.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Error while connecting to device")]
    #[diagnostic(transparent)]
    Connection(#[source] ConnectionError),

    #[error("Communication error while flashing device")]
    #[diagnostic(transparent)]
    Flashing(#[source] ConnectionError),

    #[error("The bootloader returned an error")]
    #[diagnostic(transparent)]
    RomError(#[from] RomError),

    #[error("Unrecognized magic value: {0:#010x}")]
    #[diagnostic(
        code(esploader::unsupported_chip),
        help("Supported chips are: {}\n\
              If your chip is supported, try hard-resetting the device and try again",
             Chip::VARIANTS.join(", "))
    )]
    UnsupportedChip(u32),

    #[error("No chip has been detected on this connection")]
    #[diagnostic(
        code(esploader::chip_not_detected),
        help("Run `sync` and `detect_chip` (or use `Flasher::connect`) before flashing")
    )]
    ChipNotDetected,

    #[error("Failed to load the RAM stub during the {phase} phase")]
    #[diagnostic(code(esploader::stub_load_failed))]
    StubLoad {
        phase: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("MD5 digest mismatch for the image at {offset:#x}")]
    #[diagnostic(
        code(esploader::verify_failed),
        help("The flash contents do not match the written image; try flashing again")
    )]
    VerifyFailed { offset: u32 },

    #[error("Invalid response: {0}")]
    #[diagnostic(code(esploader::invalid_response))]
    InvalidResponse(String),
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Self::Connection(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Connection(err.into())
    }
}

/// Connection-related errors.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("Could not establish a connection with the device")]
    #[diagnostic(
        code(esploader::connection_failed),
        help("Check the cabling and make sure nothing is holding the reset or boot pins down")
    )]
    ConnectionFailed,

    #[error("Reply frame has broken SLIP framing")]
    #[diagnostic(
        code(esploader::slip_framing),
        help("Hard-reset the device and try again")
    )]
    FramingError,

    #[error("Reply frame exceeds the response buffer")]
    #[diagnostic(code(esploader::oversized_packet))]
    OverSizedPacket,

    #[error("Timeout while running {0}command")]
    #[diagnostic(code(esploader::timeout))]
    Timeout(TimedOutCommand),

    #[error("IO error while using the transport: {0}")]
    #[diagnostic(code(esploader::transport_error))]
    Io(#[source] io::Error),
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => ConnectionError::Timeout(TimedOutCommand::default()),
            _ => ConnectionError::Io(err),
        }
    }
}

/// An executed command which has timed out.
#[derive(Clone, Debug, Default)]
pub struct TimedOutCommand {
    command: Option<CommandType>,
}

impl Display for TimedOutCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(command) = &self.command {
            write!(f, "{} ", command)?;
        }
        Ok(())
    }
}

impl From<CommandType> for TimedOutCommand {
    fn from(ct: CommandType) -> Self {
        TimedOutCommand { command: Some(ct) }
    }
}

/// Failure codes reported by a device's ROM or stub loader.
#[derive(Clone, Copy, Debug, Default, Diagnostic, Error, strum::FromRepr)]
#[non_exhaustive]
#[repr(u8)]
pub enum RomErrorKind {
    #[error("Request could not be parsed")]
    InvalidMessage = 0x05,

    #[error("Loader failed to act on the request")]
    FailedToAct = 0x06,

    #[error("Request arrived with a bad CRC")]
    InvalidCrc = 0x07,

    #[error("Write to flash failed")]
    FlashWriteError = 0x08,

    #[error("Read from flash failed")]
    FlashReadError = 0x09,

    #[error("Flash read length out of range")]
    FlashReadLengthError = 0x0a,

    #[error("Compressed stream is malformed")]
    DeflateError = 0x0b,

    #[error("Data block has the wrong length")]
    BadDataLen = 0xc0,

    #[error("Data block failed its checksum")]
    BadDataChecksum = 0xc1,

    #[error("Block size not accepted")]
    BadBlocksize = 0xc2,

    #[error("Opcode not recognized")]
    InvalidCommand = 0xc3,

    #[error("SPI operation failed")]
    FailedSpiOp = 0xc4,

    #[error("SPI unlock failed")]
    FailedSpiUnlock = 0xc5,

    #[error("A download was not begun first")]
    NotInFlashMode = 0xc6,

    #[error("Inflate of a compressed block failed")]
    InflateError = 0xc7,

    #[error("Fewer data bytes arrived than announced")]
    NotEnoughData = 0xc8,

    #[error("More data bytes arrived than announced")]
    TooMuchData = 0xc9,

    #[default]
    #[error("Unlisted failure code")]
    Other = 0xff,
}

impl From<u8> for RomErrorKind {
    fn from(raw: u8) -> Self {
        Self::from_repr(raw).unwrap_or_default()
    }
}

/// An error reported by the chip in a command reply's status bytes.
#[derive(Clone, Copy, Debug, Diagnostic, Error)]
#[error("Error while running {command} command")]
#[non_exhaustive]
pub struct RomError {
    command: CommandType,
    #[source]
    kind: RomErrorKind,
}

impl RomError {
    pub fn new(command: CommandType, kind: RomErrorKind) -> RomError {
        RomError { command, kind }
    }
}

pub(crate) trait ResultExt {
    /// Mark an error as having occurred during the flashing stage.
    fn flashing(self) -> Self;
    /// Mark the command from which this error originates.
    fn for_command(self, command: CommandType) -> Self;
}

impl<T> ResultExt for Result<T, Error> {
    fn flashing(self) -> Self {
        match self {
            Err(Error::Connection(err)) => Err(Error::Flashing(err)),
            other => other,
        }
    }

    fn for_command(self, command: CommandType) -> Self {
        let tag = |err: ConnectionError| match err {
            ConnectionError::Timeout(_) => ConnectionError::Timeout(command.into()),
            other => other,
        };

        match self {
            Err(Error::Connection(err)) => Err(Error::Connection(tag(err))),
            Err(Error::Flashing(err)) => Err(Error::Flashing(tag(err))),
            other => other,
        }
    }
}
