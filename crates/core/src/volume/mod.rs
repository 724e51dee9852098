use std::fmt;

use serde::{Deserialize, Serialize};

/// Output volume in percent, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeLevel(u8);

impl VolumeLevel {
    pub const MIN: VolumeLevel = VolumeLevel(0);
    pub const MAX: VolumeLevel = VolumeLevel(100);

    /// Builds a level from any integer, saturating at both bounds.
    pub fn saturating(value: i64) -> Self {
        Self(value.clamp(0, 100) as u8)
    }

    pub fn percent(self) -> u8 {
        self.0
    }
}

impl fmt::Display for VolumeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Applies relative and absolute volume changes with clamping. Never fails.
#[derive(Debug, Clone)]
pub struct VolumeController {
    level: VolumeLevel,
}

impl VolumeController {
    pub fn new(initial: i64) -> Self {
        Self {
            level: VolumeLevel::saturating(initial),
        }
    }

    pub fn level(&self) -> VolumeLevel {
        self.level
    }

    pub fn apply_delta(&mut self, step: i64) -> VolumeLevel {
        self.level = VolumeLevel::saturating(i64::from(self.level.0).saturating_add(step));
        self.level
    }

    pub fn apply_absolute(&mut self, level: i64) -> VolumeLevel {
        self.level = VolumeLevel::saturating(level);
        self.level
    }
}
