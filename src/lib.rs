//! A library for flashing Espressif devices over their serial bootloader.
//!
//! The ROM bootloader (and the optional RAM-resident flasher stub) speak a
//! SLIP-framed request/response protocol. [`Flasher`] drives the whole
//! conversation: reset into the bootloader, sync, chip detection, stub
//! upload, SPI flash setup, and finally writing firmware images with MD5
//! verification.
//!
//! The serial link itself is abstracted behind the [`Transport`] trait; a
//! `serialport`-backed implementation is available behind the `serialport`
//! feature.
//!
//! ```no_run
//! use esploader::{DefaultProgressCallback, Flasher, FlasherConfig, SerialTransport};
//!
//! # fn main() -> Result<(), esploader::Error> {
//! let port = serialport::new("/dev/ttyUSB0", 115_200).open().unwrap();
//! let transport = SerialTransport::new(port);
//!
//! let mut flasher = Flasher::connect(Box::new(transport), FlasherConfig::default())?;
//! let image = std::fs::read("firmware.bin").unwrap();
//! flasher.flash_compressed_data(&image, 0x1_0000, &mut DefaultProgressCallback)?;
//! flasher.flash_finish()?;
//! flasher.reset()?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod connection;
pub mod error;
pub mod flash_target;
pub mod flasher;
pub mod slip;
pub mod targets;
pub mod transport;

#[cfg(feature = "serialport")]
pub use self::transport::SerialTransport;
pub use self::{
    error::Error,
    flash_target::{DefaultProgressCallback, ProgressCallbacks, Segment},
    flasher::{Flasher, FlasherConfig},
    targets::Chip,
    transport::Transport,
};
