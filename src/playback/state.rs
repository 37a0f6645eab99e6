//! Player-level state.

/// Coarse lifecycle of a prepared player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Decoding and rendering (possibly silent or gate-blocked).
    Running,
    /// Every active stream hit end of file.
    Eof,
    /// Released or never started.
    Stopped,
    /// Paused by the application.
    Paused,
}

impl PlaybackState {
    pub fn is_running(&self) -> bool {
        matches!(self, PlaybackState::Running)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, PlaybackState::Paused)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, PlaybackState::Stopped)
    }
}

/// What to do when playback reaches end of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RepeatMode {
    Off = 0,
    One = 1,
    All = 2,
}

impl RepeatMode {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => RepeatMode::One,
            2 => RepeatMode::All,
            _ => RepeatMode::Off,
        }
    }
}
