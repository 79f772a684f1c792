//! Supported target devices.
//!
//! Every chip family is identified by the 32-bit magic value its ROM
//! exposes at a fixed address; some families match more than one value
//! across silicon revisions. The per-chip protocol quirks (BEGIN parameter
//! layout, stub availability, ROM feature set) hang off the [`Chip`] enum.

use strum::{Display, EnumIter, VariantNames};

use self::{
    esp32::Esp32, esp32c2::Esp32c2, esp32c3::Esp32c3, esp32c6::Esp32c6, esp32h2::Esp32h2,
    esp32s2::Esp32s2, esp32s3::Esp32s3, esp8266::Esp8266,
};
use crate::error::Error;

mod esp32;
mod esp32c2;
mod esp32c3;
mod esp32c6;
mod esp32h2;
mod esp32s2;
mod esp32s3;
mod esp8266;

/// All supported devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, VariantNames)]
#[non_exhaustive]
#[strum(serialize_all = "lowercase")]
pub enum Chip {
    /// ESP32
    Esp32,
    /// ESP32-C2, ESP8684
    Esp32c2,
    /// ESP32-C3, ESP8685
    Esp32c3,
    /// ESP32-C6
    Esp32c6,
    /// ESP32-H2
    Esp32h2,
    /// ESP32-S2
    Esp32s2,
    /// ESP32-S3
    Esp32s3,
    /// ESP8266
    Esp8266,
}

impl Chip {
    /// Create a [Chip] from a magic value.
    pub fn from_magic(magic: u32) -> Result<Self, Error> {
        if Esp32::has_magic_value(magic) {
            Ok(Chip::Esp32)
        } else if Esp32c2::has_magic_value(magic) {
            Ok(Chip::Esp32c2)
        } else if Esp32c3::has_magic_value(magic) {
            Ok(Chip::Esp32c3)
        } else if Esp32c6::has_magic_value(magic) {
            Ok(Chip::Esp32c6)
        } else if Esp32h2::has_magic_value(magic) {
            Ok(Chip::Esp32h2)
        } else if Esp32s2::has_magic_value(magic) {
            Ok(Chip::Esp32s2)
        } else if Esp32s3::has_magic_value(magic) {
            Ok(Chip::Esp32s3)
        } else if Esp8266::has_magic_value(magic) {
            Ok(Chip::Esp8266)
        } else {
            Err(Error::UnsupportedChip(magic))
        }
    }

    /// Returns the numeric chip ID for the [Chip].
    pub fn id(&self) -> u16 {
        match self {
            Chip::Esp32 => esp32::CHIP_ID,
            Chip::Esp32c2 => esp32c2::CHIP_ID,
            Chip::Esp32c3 => esp32c3::CHIP_ID,
            Chip::Esp32c6 => esp32c6::CHIP_ID,
            Chip::Esp32h2 => esp32h2::CHIP_ID,
            Chip::Esp32s2 => esp32s2::CHIP_ID,
            Chip::Esp32s3 => esp32s3::CHIP_ID,
            Chip::Esp8266 => esp8266::CHIP_ID,
        }
    }

    /// Whether the loader takes the fifth (encryption) word in its BEGIN
    /// parameter blocks. True for everything newer than the ESP32.
    pub fn supports_extended_begin(&self) -> bool {
        !matches!(self, Chip::Esp32 | Chip::Esp8266)
    }

    /// Whether a RAM flasher stub is available for this chip.
    pub fn has_stub(&self) -> bool {
        !matches!(self, Chip::Esp8266 | Chip::Esp32c2)
    }

    /// Whether the ROM implements the flash MD5 command.
    pub fn supports_md5(&self) -> bool {
        !matches!(self, Chip::Esp8266)
    }

    /// Whether the loader can renegotiate its baud rate.
    pub fn supports_baud_change(&self) -> bool {
        !matches!(self, Chip::Esp8266)
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::Chip;

    /// Every production magic value and the chip it identifies.
    const MAGIC_TABLE: &[(u32, Chip)] = &[
        (0xFFF0_C101, Chip::Esp8266),
        (0x00F0_1D83, Chip::Esp32),
        (0x0000_07C6, Chip::Esp32s2),
        (0x0000_0009, Chip::Esp32s3),
        (0x6F51_306F, Chip::Esp32c2),
        (0x6921_506F, Chip::Esp32c3),
        (0x1B31_506F, Chip::Esp32c3),
        (0x0DA1_806F, Chip::Esp32c6),
        (0xCA26_CC22, Chip::Esp32h2),
        (0xD7B7_3E80, Chip::Esp32h2),
    ];

    #[test]
    fn detection_covers_the_magic_table() {
        for (magic, chip) in MAGIC_TABLE {
            assert_eq!(Chip::from_magic(*magic).unwrap(), *chip, "{magic:#010x}");
        }
    }

    #[test]
    fn every_chip_is_detectable() {
        for chip in Chip::iter() {
            assert!(MAGIC_TABLE.iter().any(|(_, c)| *c == chip));
        }
    }

    #[test]
    fn chip_ids_are_distinct() {
        let mut ids: Vec<u16> = Chip::iter().map(|chip| chip.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), Chip::iter().count());
    }

    #[test]
    fn unknown_magic_is_rejected() {
        for magic in [0x0000_0000, 0xDEAD_BEEF, 0xFFFF_FFFF] {
            assert!(Chip::from_magic(magic).is_err());
        }
    }

    #[test]
    fn begin_parameter_layout_per_chip() {
        assert!(!Chip::Esp32.supports_extended_begin());
        assert!(!Chip::Esp8266.supports_extended_begin());
        for chip in Chip::iter() {
            if !matches!(chip, Chip::Esp32 | Chip::Esp8266) {
                assert!(chip.supports_extended_begin(), "{chip}");
            }
        }
    }

    #[test]
    fn stub_availability() {
        assert!(!Chip::Esp8266.has_stub());
        assert!(!Chip::Esp32c2.has_stub());
        for chip in [
            Chip::Esp32,
            Chip::Esp32c3,
            Chip::Esp32c6,
            Chip::Esp32h2,
            Chip::Esp32s2,
            Chip::Esp32s3,
        ] {
            assert!(chip.has_stub(), "{chip}");
        }
    }
}
