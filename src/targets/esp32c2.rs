pub(crate) const CHIP_ID: u16 = 12;

const CHIP_DETECT_MAGIC_VALUES: &[u32] = &[0x6F51_306F];

/// ESP32-C2 target.
///
/// No RAM stub ships for this chip; it is programmed through the ROM
/// loader alone.
pub struct Esp32c2;

impl Esp32c2 {
    /// Check if the magic value matches this chip.
    pub fn has_magic_value(value: u32) -> bool {
        CHIP_DETECT_MAGIC_VALUES.contains(&value)
    }
}
