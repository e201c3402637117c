//! Light banks and the packing of light values into `param1`.
//!
//! Every node whose content stores light keeps two 4-bit values in `param1`: the low nibble
//! belongs to the day bank (sunlight and artificial light), the high nibble to the night bank
//! (artificial light only).

/// Light level of direct sunlight. Only ever found in columns that are open to the sky.
pub const LIGHT_SUN: u8 = 15;

/// Highest light level an artificial light source may emit.
pub const LIGHT_MAX: u8 = 14;

/// Range of the externally supplied day/night ratio (`0` = full night, `1000` = full day).
pub const DAYLIGHT_RATIO_MAX: u32 = 1000;

/// One of the two independent light channels stored per node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightBank {
    /// Sunlight plus artificial light
    Day,
    /// Artificial light only
    Night,
}

impl LightBank {
    /// Both banks in the order they are usually processed
    pub const ALL: [Self; 2] = [Self::Day, Self::Night];

    /// Extracts this bank's light level from a packed `param1`.
    #[must_use]
    pub const fn get(self, param1: u8) -> u8 {
        match self {
            Self::Day => param1 & 0x0f,
            Self::Night => param1 >> 4,
        }
    }

    /// Returns `param1` with this bank's nibble replaced by `light` (clamped to 4 bits).
    #[must_use]
    pub const fn set(self, param1: u8, light: u8) -> u8 {
        let light = light & 0x0f;
        match self {
            Self::Day => (param1 & 0xf0) | light,
            Self::Night => (param1 & 0x0f) | (light << 4),
        }
    }

    /// Whether sunlight exists in this bank
    #[must_use]
    pub const fn has_sunlight(self) -> bool {
        matches!(self, Self::Day)
    }
}

/// Combines both banks into the light level that is effectively visible.
///
/// The day bank is scaled by `daylight_ratio` (`0..=1000`); the night bank is never dimmed, so the
/// result is always at least the night value.
#[must_use]
pub fn blend_light(daylight_ratio: u32, day: u8, night: u8) -> u8 {
    let ratio = daylight_ratio.min(DAYLIGHT_RATIO_MAX);
    let scaled_day = u32::from(day) * ratio / DAYLIGHT_RATIO_MAX;
    let scaled_day = u8::try_from(scaled_day).unwrap_or(LIGHT_SUN);
    scaled_day.max(night).min(LIGHT_SUN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banks_are_independent_nibbles() {
        let param1 = LightBank::Day.set(0, 13);
        let param1 = LightBank::Night.set(param1, 7);
        assert_eq!(LightBank::Day.get(param1), 13, "day nibble");
        assert_eq!(LightBank::Night.get(param1), 7, "night nibble");

        let param1 = LightBank::Day.set(param1, 2);
        assert_eq!(LightBank::Day.get(param1), 2, "day nibble after overwrite");
        assert_eq!(LightBank::Night.get(param1), 7, "night nibble untouched");
    }

    #[test]
    fn blending_respects_night_floor() {
        assert_eq!(blend_light(1000, LIGHT_SUN, 3), LIGHT_SUN);
        assert_eq!(blend_light(0, LIGHT_SUN, 3), 3);
        assert_eq!(blend_light(500, 14, 3), 7);
        assert_eq!(blend_light(500, 4, 9), 9);
        assert_eq!(blend_light(5000, 10, 0), 10, "ratio is clamped");
    }
}
