//! RAM flasher stub descriptors.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::targets::Chip;

/// Register holding the chip-identification magic value.
pub(crate) const CHIP_DETECT_MAGIC_REG_ADDR: u32 = 0x4000_1000;

/// Greeting the stub prints once it is up and has taken over the link.
pub(crate) const STUB_GREETING: &str = "OHAI";

/// Flash stub descriptor: two loadable blobs plus the entry point,
/// deserialized from TOML with the binary sections base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashStub {
    /// Entry point (address)
    entry: u32,
    /// Text (base64 encoded)
    text: String,
    /// Start of text section address
    text_start: u32,
    /// Data (base64 encoded)
    data: String,
    /// Start of data section address
    data_start: u32,
}

// Include stub objects in the binary
const STUB_32: &str = include_str!("../../resources/stubs/esp32.toml");
const STUB_32C3: &str = include_str!("../../resources/stubs/esp32c3.toml");
const STUB_32C6: &str = include_str!("../../resources/stubs/esp32c6.toml");
const STUB_32H2: &str = include_str!("../../resources/stubs/esp32h2.toml");
const STUB_32S2: &str = include_str!("../../resources/stubs/esp32s2.toml");
const STUB_32S3: &str = include_str!("../../resources/stubs/esp32s3.toml");

impl FlashStub {
    /// Fetch the flash stub for the provided chip, if one ships for it.
    ///
    /// The ESP8266 and ESP32-C2 are driven through their ROM loaders alone.
    pub fn get(chip: Chip) -> Option<FlashStub> {
        let s = match chip {
            Chip::Esp32 => STUB_32,
            Chip::Esp32c3 => STUB_32C3,
            Chip::Esp32c6 => STUB_32C6,
            Chip::Esp32h2 => STUB_32H2,
            Chip::Esp32s2 => STUB_32S2,
            Chip::Esp32s3 => STUB_32S3,
            _ => return None,
        };

        let stub: FlashStub = toml::from_str(s).unwrap();

        Some(stub)
    }

    /// Stub entry point address.
    pub fn entry(&self) -> u32 {
        self.entry
    }

    /// Text section: load address and decoded bytes.
    pub fn text(&self) -> (u32, Vec<u8>) {
        (self.text_start, decode(&self.text))
    }

    /// Data section: load address and decoded bytes.
    pub fn data(&self) -> (u32, Vec<u8>) {
        (self.data_start, decode(&self.data))
    }
}

// The embedded resources are trusted input, so a decode failure here is a
// build defect rather than a runtime condition.
fn decode(blob: &str) -> Vec<u8> {
    general_purpose::STANDARD.decode(blob).unwrap()
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::FlashStub;
    use crate::targets::Chip;

    #[test]
    fn check_stub_encodings() {
        for c in Chip::iter() {
            // Stub availability must line up with the chip table, every
            // shipped stub must be valid TOML, and its sections must decode
            // from base64.
            match FlashStub::get(c) {
                Some(s) => {
                    assert!(c.has_stub());

                    let (_, text) = s.text();
                    let (_, data) = s.data();
                    assert!(!text.is_empty());
                    assert!(!data.is_empty());
                }
                None => assert!(!c.has_stub()),
            }
        }
    }
}
