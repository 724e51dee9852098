use std::fmt;

use serde::{Deserialize, Serialize};

/// Interpretation applied to a successful scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Play,
    Print,
}

impl Mode {
    pub fn flipped(self) -> Self {
        match self {
            Self::Play => Self::Print,
            Self::Print => Self::Play,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Play => f.write_str("play"),
            Self::Print => f.write_str("print"),
        }
    }
}

/// Current operating mode. Starts in [`Mode::Play`] and only changes on an
/// explicit toggle.
#[derive(Debug, Clone, Default)]
pub struct ModeState {
    current: Mode,
}

impl ModeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Mode {
        self.current
    }

    /// Flips Play and Print, returning the new mode.
    pub fn toggle(&mut self) -> Mode {
        self.current = self.current.flipped();
        self.current
    }
}
