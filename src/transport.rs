//! The serial link consumed by the driver.
//!
//! The protocol engine only needs four operations from the underlying
//! device, collected in the [`Transport`] trait. Anything that can move
//! bytes and wiggle DTR/RTS can be used: a real serial port, an RFC 2217
//! bridge, or an in-memory fake for tests.

use std::io;

#[cfg(feature = "serialport")]
use std::time::Duration;

#[cfg(feature = "serialport")]
use serialport::SerialPort;

/// Byte-level access to the device.
///
/// Implementations are synchronous. The driver owns its transport
/// exclusively for the lifetime of a session; nothing else may read from or
/// write to the link between entering the bootloader and the final reset.
pub trait Transport {
    /// Discard any buffered input.
    ///
    /// Called between sync attempts and before each command to realign the
    /// stream after a timeout may have left a partial frame behind.
    fn flush(&mut self) -> io::Result<()>;

    /// Read up to `buf.len()` bytes.
    ///
    /// Must not block indefinitely: implementations either poll or use a
    /// short timeout. Returning `Ok(0)` is normal and means "no data yet";
    /// the caller enforces its own deadline across polls.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `buf` to the device.
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Drive the DTR and RTS control lines.
    ///
    /// On standard dev boards these are wired to the chip's IO0 and EN pins
    /// and implement the reset-into-bootloader sequences.
    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> io::Result<()>;

    /// Change the host-side line rate.
    ///
    /// Called only after the chip has acknowledged a change-baud command.
    /// Links without a configurable rate can leave the default no-op in
    /// place.
    fn set_baud(&mut self, baud: u32) -> io::Result<()> {
        let _ = baud;
        Ok(())
    }
}

/// Poll interval used by [`SerialTransport::read`].
#[cfg(feature = "serialport")]
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// A [`Transport`] backed by a [`serialport::SerialPort`].
#[cfg(feature = "serialport")]
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

#[cfg(feature = "serialport")]
impl SerialTransport {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        SerialTransport { port }
    }

    /// Consume self and return the underlying port.
    pub fn into_port(self) -> Box<dyn SerialPort> {
        self.port
    }
}

#[cfg(feature = "serialport")]
impl Transport for SerialTransport {
    fn flush(&mut self) -> io::Result<()> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;

        self.port.set_timeout(READ_POLL_TIMEOUT)?;
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            // A poll that saw no data is not an error at this layer.
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(err),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        use std::io::Write;

        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> io::Result<()> {
        self.port.write_data_terminal_ready(dtr)?;
        self.port.write_request_to_send(rts)?;
        Ok(())
    }

    fn set_baud(&mut self, baud: u32) -> io::Result<()> {
        self.port.set_baud_rate(baud)?;
        Ok(())
    }
}
