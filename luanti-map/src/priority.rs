//! Orders work by how urgently a client needs a block.

use glam::Vec3;
use luanti_core::MapBlockPos;

/// How important something (e.g. a map block) is to a client.
///
/// Smaller values mean higher priority, so the natural order of `Priority` sorts the most
/// important work first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Priority(u16);

impl Priority {
    /// The highest achievable priority
    pub const MAX: Self = Self(u16::MIN);

    /// The lowest achievable priority (before being `NONE`)
    pub const MIN: Self = Self(Self::NONE.0 - 1);

    /// The associated work shall not be done at all.
    ///
    /// Equivalent to `Option::<Priority>::None` but sorted after every other priority.
    pub const NONE: Self = Self(u16::MAX);

    /// Number of steps per block of distance
    const STEPS_PER_BLOCK: f32 = 64.0;

    /// Whether this is `NONE`
    #[must_use]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Maps a distance measured in blocks to a priority.
    ///
    /// Fractions of a block are kept, so neighboring rings of blocks stay distinguishable.
    /// Negative distances count as zero; distances beyond the representable range are clamped to
    /// `MIN`.
    #[must_use]
    #[expect(clippy::cast_possible_truncation, reason = "clamped to the range of u16")]
    #[expect(clippy::cast_sign_loss, reason = "clamped to positive values")]
    pub fn from_distance(distance: f32) -> Self {
        if distance.is_nan() {
            return Self::NONE;
        }
        let steps = (distance.max(0.0) * Self::STEPS_PER_BLOCK).min(f32::from(Self::MIN.0));
        Self(steps as u16)
    }

    /// Uses the euclidean distance between two blocks as priority.
    ///
    /// Distances exceeding `max_distance` are mapped to `NONE`.
    #[must_use]
    pub fn from_block_distance(from: MapBlockPos, to: MapBlockPos, max_distance: f32) -> Self {
        let distance = Vec3::distance(from.vec().as_vec3(), to.vec().as_vec3());
        if distance > max_distance {
            Self::NONE
        } else {
            Self::from_distance(distance)
        }
    }
}

/// Converts values in the range of `0.0..=1.0` to priorities `MAX..=MIN`.
///
/// Values outside of that range are clamped; `NAN` is mapped to `NONE`.
impl From<f32> for Priority {
    #[expect(clippy::cast_possible_truncation, reason = "clamped to the range of u16")]
    #[expect(clippy::cast_sign_loss, reason = "clamped to positive values")]
    fn from(value: f32) -> Self {
        if value.is_nan() {
            Self::NONE
        } else {
            Self((value.clamp(0.0, 1.0) * f32::from(Self::MIN.0)) as u16)
        }
    }
}
