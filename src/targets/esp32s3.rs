pub(crate) const CHIP_ID: u16 = 9;

const CHIP_DETECT_MAGIC_VALUES: &[u32] = &[0x0000_0009];

/// ESP32-S3 target.
pub struct Esp32s3;

impl Esp32s3 {
    /// Check if the magic value matches this chip.
    pub fn has_magic_value(value: u32) -> bool {
        CHIP_DETECT_MAGIC_VALUES.contains(&value)
    }
}
