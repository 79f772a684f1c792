//! Write firmware images to a target device.
//!
//! [`Flasher`] drives a whole programming session over one exclusively
//! owned [`Transport`]: reset into the bootloader, sync, chip detection,
//! optional stub upload, SPI flash setup, image writes and the final reset
//! into the user application.

use std::{borrow::Cow, thread::sleep, time::Duration};

use log::{debug, info, warn};

use crate::{
    command::{Command, DEFAULT_TIMEOUT},
    connection::Connection,
    error::{ConnectionError, Error, ResultExt},
    flash_target::{
        flash_end, CompressedFlashTarget, DefaultProgressCallback, FlashTarget,
        ProgressCallbacks, RamTarget, RawFlashTarget, Segment,
    },
    flasher::stubs::{FlashStub, CHIP_DETECT_MAGIC_REG_ADDR, STUB_GREETING},
    targets::Chip,
    transport::Transport,
};

pub(crate) mod stubs;

/// Baud rate the ROM loaders come up with.
pub const DEFAULT_BAUD: u32 = 115_200;

const MAX_SYNC_ATTEMPTS: usize = 7;
const SYNC_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Supported flash sizes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u8)]
pub enum FlashSize {
    /// 256 KB
    _256Kb,
    /// 512 KB
    _512Kb,
    /// 1 MB
    _1Mb,
    /// 2 MB
    _2Mb,
    /// 4 MB
    #[default]
    _4Mb,
    /// 8 MB
    _8Mb,
    /// 16 MB
    _16Mb,
    /// 32 MB
    _32Mb,
}

impl FlashSize {
    /// Returns the flash size in bytes.
    pub const fn size(self) -> u32 {
        let kib = match self {
            FlashSize::_256Kb => 256,
            FlashSize::_512Kb => 512,
            FlashSize::_1Mb => 1024,
            FlashSize::_2Mb => 2 * 1024,
            FlashSize::_4Mb => 4 * 1024,
            FlashSize::_8Mb => 8 * 1024,
            FlashSize::_16Mb => 16 * 1024,
            FlashSize::_32Mb => 32 * 1024,
        };
        kib * 1024
    }
}

/// Geometry of the attached SPI flash chip, sent to the loader before any
/// write.
///
/// Only the total size varies between boards; block, sector and page
/// geometry is the same across every supported part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpiSetParams {
    total_size: u32,
}

impl SpiSetParams {
    pub const fn new(total_size: u32) -> Self {
        SpiSetParams { total_size }
    }

    /// Serialize as the six little-endian words the command takes: chip
    /// id, total size, block size, sector size, page size and status mask.
    pub fn encode(&self) -> Vec<u8> {
        const BLOCK_SIZE: u32 = 0x1_0000;
        const SECTOR_SIZE: u32 = 0x1000;
        const PAGE_SIZE: u32 = 256;
        const STATUS_MASK: u32 = 0xFFFF;

        let words = [
            0,
            self.total_size,
            BLOCK_SIZE,
            SECTOR_SIZE,
            PAGE_SIZE,
            STATUS_MASK,
        ];
        words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }
}

/// Session configuration for a [Flasher].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct FlasherConfig {
    /// Baud rate the transport is currently running at.
    pub baud: u32,
    /// Total size of the attached SPI flash.
    pub flash_size: FlashSize,
    /// Upload the RAM stub during [Flasher::connect].
    pub use_stub: bool,
    /// Verify written images against the loader's MD5.
    pub verify: bool,
    /// Require every reply to echo the opcode of its request.
    pub strict: bool,
}

impl Default for FlasherConfig {
    fn default() -> Self {
        FlasherConfig {
            baud: DEFAULT_BAUD,
            flash_size: FlashSize::default(),
            use_stub: true,
            verify: true,
            strict: false,
        }
    }
}

/// Connect to and flash a target device.
pub struct Flasher {
    /// Connection for the programming session
    connection: Connection,
    /// Detected chip, populated by [Flasher::detect_chip]
    chip: Option<Chip>,
    /// Indicates the RAM stub loader is in use
    stub_loaded: bool,
    /// Baud rate the chip side currently runs at
    baud: u32,
    /// Indicates SPI flash parameters have been sent for this session
    flash_params_set: bool,
    flash_size: FlashSize,
    use_stub: bool,
    verify: bool,
}

impl Flasher {
    /// Create a flasher over a transport without touching the device.
    pub fn new(transport: Box<dyn Transport>, config: FlasherConfig) -> Self {
        let mut connection = Connection::new(transport);
        connection.set_strict(config.strict);

        Flasher {
            connection,
            chip: None,
            stub_loaded: false,
            baud: config.baud,
            flash_params_set: false,
            flash_size: config.flash_size,
            use_stub: config.use_stub,
            verify: config.verify,
        }
    }

    /// Reset into the bootloader and establish a full programming session:
    /// sync, chip detection, stub upload (where available and enabled) and
    /// SPI flash setup.
    pub fn connect(transport: Box<dyn Transport>, config: FlasherConfig) -> Result<Self, Error> {
        let mut flasher = Flasher::new(transport, config);

        flasher.enter_bootloader()?;
        flasher.sync()?;

        let chip = flasher.detect_chip()?;
        info!("Connected to {}", chip);

        if flasher.use_stub {
            match flasher.load_stub() {
                Ok(true) => debug!("Using the RAM stub"),
                Ok(false) => debug!("No stub ships for the {}, staying on the ROM loader", chip),
                Err(err) => {
                    warn!("Stub upload failed ({err}), continuing with the ROM loader");
                }
            }
        }

        flasher.init()?;

        Ok(flasher)
    }

    /// The detected chip, if detection has run.
    pub fn chip(&self) -> Option<Chip> {
        self.chip
    }

    /// Whether the RAM stub has taken over the link.
    pub fn stub_loaded(&self) -> bool {
        self.stub_loaded
    }

    /// Baud rate the chip side currently runs at.
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// The active connection used by the flasher.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.connection
    }

    fn require_chip(&self) -> Result<Chip, Error> {
        self.chip.ok_or(Error::ChipNotDetected)
    }

    /// Reset the device into its serial bootloader.
    pub fn enter_bootloader(&mut self) -> Result<(), Error> {
        self.stub_loaded = false;
        self.flash_params_set = false;
        self.connection.reset_to_bootloader()
    }

    /// Sync with the loader, retrying up to 7 times.
    pub fn sync(&mut self) -> Result<(), Error> {
        for attempt in 0..MAX_SYNC_ATTEMPTS {
            self.connection.flush()?;

            match self.connection.command(Command::Sync) {
                Ok(_) => {
                    debug!("Synced after {} attempt(s)", attempt + 1);
                    return Ok(());
                }
                Err(err) => {
                    debug!("Sync attempt {} failed: {err:#?}", attempt + 1);
                    sleep(SYNC_RETRY_DELAY);
                }
            }
        }

        Err(Error::Connection(ConnectionError::ConnectionFailed))
    }

    /// Read the identification register and resolve the chip family.
    pub fn detect_chip(&mut self) -> Result<Chip, Error> {
        let magic = self.connection.read_reg(CHIP_DETECT_MAGIC_REG_ADDR)?;
        let chip = Chip::from_magic(magic)?;
        self.chip = Some(chip);

        Ok(chip)
    }

    /// Upload the RAM stub and hand the link over to it.
    ///
    /// Returns `Ok(false)` for chips that ship without a stub; those keep
    /// using the ROM loader. Any failure along the way leaves the ROM
    /// loader in charge, so the caller may simply carry on without the
    /// stub.
    pub fn load_stub(&mut self) -> Result<bool, Error> {
        let chip = self.require_chip()?;
        let Some(stub) = FlashStub::get(chip) else {
            return Ok(false);
        };

        debug!("Uploading the {} flash stub", chip);

        let mut ram_target = RamTarget::new(stub.entry());
        let mut progress = DefaultProgressCallback;

        let (text_addr, text) = stub.text();
        debug!("Stub text: {} bytes at {:#010x}", text.len(), text_addr);
        ram_target
            .write_segment(
                &mut self.connection,
                Segment {
                    addr: text_addr,
                    data: Cow::Borrowed(&text),
                },
                &mut progress,
            )
            .map_err(stub_phase("text"))?;

        let (data_addr, data) = stub.data();
        debug!("Stub data: {} bytes at {:#010x}", data.len(), data_addr);
        ram_target
            .write_segment(
                &mut self.connection,
                Segment {
                    addr: data_addr,
                    data: Cow::Borrowed(&data),
                },
                &mut progress,
            )
            .map_err(stub_phase("data"))?;

        ram_target
            .finish(&mut self.connection)
            .map_err(stub_phase("entry"))?;

        // The stub announces itself as soon as it starts running.
        let greeting = self
            .connection
            .read_frame(DEFAULT_TIMEOUT)
            .map_err(stub_phase("handshake"))?;
        if greeting != STUB_GREETING.as_bytes() {
            return Err(Error::StubLoad {
                phase: "handshake",
                source: Box::new(Error::InvalidResponse(format!(
                    "unexpected greeting: {greeting:02x?}"
                ))),
            });
        }

        debug!("Stub running");
        self.stub_loaded = true;

        Ok(true)
    }

    /// Set up SPI flash access: attach the flash chip (ROM loader only) and
    /// send its parameters.
    pub fn init(&mut self) -> Result<(), Error> {
        let chip = self.require_chip()?;
        if chip == Chip::Esp8266 {
            // The ESP8266 ROM has neither command and needs neither.
            debug!("The {} loader has no SPI setup commands", chip);
            return Ok(());
        }

        if !self.stub_loaded {
            self.connection.command(Command::SpiAttach)?;
        }

        let spi_params = SpiSetParams::new(self.flash_size.size());
        self.connection.command(Command::SpiSetParams { spi_params })?;
        self.flash_params_set = true;

        Ok(())
    }

    /// Renegotiate the baud rate with the chip, then re-tune the host.
    ///
    /// The stub needs to know the rate it is currently running at; the ROM
    /// loader takes a zero there. The host side is only switched once the
    /// chip has acknowledged the command at the old rate.
    pub fn change_baud(&mut self, baud: u32) -> Result<(), Error> {
        let chip = self.require_chip()?;
        if !chip.supports_baud_change() {
            debug!("The {} loader keeps its initial baud rate", chip);
            return Ok(());
        }

        debug!("Negotiating a baud rate of {baud}");

        // The ROM loader takes a zero; the stub wants the rate it is
        // currently listening at.
        let prior_baud = if self.stub_loaded { self.baud } else { 0 };

        self.connection.command(Command::ChangeBaudrate {
            new_baud: baud,
            prior_baud,
        })?;

        self.connection.set_baud(baud)?;
        self.baud = baud;
        self.connection.flush()?;

        Ok(())
    }

    /// Write an image to flash at `offset`, uncompressed.
    pub fn flash_data(
        &mut self,
        data: &[u8],
        offset: u32,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<(), Error> {
        let chip = self.require_chip()?;
        if !self.flash_params_set && chip != Chip::Esp8266 {
            warn!("Writing to flash without SPI parameters set for this session");
        }

        let mut target = RawFlashTarget::new(chip, self.stub_loaded, self.verify);
        let segment = Segment {
            addr: offset,
            data: Cow::Borrowed(data),
        };

        target
            .write_segment(&mut self.connection, segment, progress)
            .flashing()
    }

    /// Deflate an image and write it to flash at `offset`.
    pub fn flash_compressed_data(
        &mut self,
        data: &[u8],
        offset: u32,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<(), Error> {
        let chip = self.require_chip()?;
        if !self.flash_params_set && chip != Chip::Esp8266 {
            warn!("Writing to flash without SPI parameters set for this session");
        }

        let mut target = CompressedFlashTarget::new(chip, self.stub_loaded, self.verify);
        let segment = Segment {
            addr: offset,
            data: Cow::Borrowed(data),
        };

        target
            .write_segment(&mut self.connection, segment, progress)
            .flashing()
    }

    /// Close the flash download, staying in the loader.
    pub fn flash_finish(&mut self) -> Result<(), Error> {
        flash_end(&mut self.connection).flashing()
    }

    /// Reset the device and boot the user application. Ends the session.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.chip = None;
        self.stub_loaded = false;
        self.flash_params_set = false;
        self.connection.reset_to_user_code()
    }
}

impl Drop for Flasher {
    fn drop(&mut self) {
        // Leave the board running user code rather than parked in the
        // loader; a failure here is not actionable.
        if self.chip.is_some() {
            let _ = self.connection.reset_to_user_code();
        }
    }
}

fn stub_phase(phase: &'static str) -> impl FnOnce(Error) -> Error {
    move |err| Error::StubLoad {
        phase,
        source: Box::new(err),
    }
}
