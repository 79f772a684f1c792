// The ESP8266 predates the chip-id scheme of the ESP32 family.
pub(crate) const CHIP_ID: u16 = 0xFFFF;

const CHIP_DETECT_MAGIC_VALUES: &[u32] = &[0xFFF0_C101];

/// ESP8266 target.
///
/// The oldest ROM loader of the family: no SPI attach/parameter commands,
/// no baud-rate renegotiation, no flash MD5, and no RAM stub.
pub struct Esp8266;

impl Esp8266 {
    /// Check if the magic value matches this chip.
    pub fn has_magic_value(value: u32) -> bool {
        CHIP_DETECT_MAGIC_VALUES.contains(&value)
    }
}
