use super::{ClientHints, ConnectionClass};

/// Quality cap applied when the client asked to save data.
pub const SAVE_DATA_QUALITY_CAP: u8 = 40;

const MIN_QUALITY: u8 = 10;
const MAX_QUALITY: u8 = 100;

/// Client-side quality correction.
///
/// Save-data caps at 40; the connection class then applies its own cap
/// (`slow-2g` 30, `2g` 40, `3g` 70, `4g` none, unknown 80). The result is
/// clamped to 10..=100.
pub fn adjust_quality(base: u8, hints: &ClientHints) -> u8 {
    let mut quality = base;

    if hints.save_data {
        quality = quality.min(SAVE_DATA_QUALITY_CAP);
    }

    quality = match hints.connection {
        ConnectionClass::Slow2g => quality.min(30),
        ConnectionClass::TwoG => quality.min(40),
        ConnectionClass::ThreeG => quality.min(70),
        ConnectionClass::FourG => quality,
        ConnectionClass::Unknown => quality.min(80),
    };

    quality.clamp(MIN_QUALITY, MAX_QUALITY)
}
