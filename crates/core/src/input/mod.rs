use crate::ScanEvent;

/// Discrete user input from the keyboard or the rotary knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    VolumeUp,
    VolumeDown,
    /// Rotary knob movement in detents; positive turns raise the volume.
    Turn(i32),
    ModeToggle,
    PlayPause,
    /// Print a sticker for whatever is currently playing.
    PrintCurrent,
    Quit,
}

impl InputEvent {
    /// Keyboard map: `m` mode, `+`/`=` louder, `-`/`_` quieter, space
    /// play/pause, `p` print current, `q` quit.
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            'm' | 'M' => Some(Self::ModeToggle),
            '+' | '=' => Some(Self::VolumeUp),
            '-' | '_' => Some(Self::VolumeDown),
            ' ' => Some(Self::PlayPause),
            'p' | 'P' => Some(Self::PrintCurrent),
            'q' | 'Q' => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Everything the controller consumes, funneled through one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButlerEvent {
    Scan(ScanEvent),
    Input(InputEvent),
}

impl From<ScanEvent> for ButlerEvent {
    fn from(value: ScanEvent) -> Self {
        Self::Scan(value)
    }
}

impl From<InputEvent> for ButlerEvent {
    fn from(value: InputEvent) -> Self {
        Self::Input(value)
    }
}
