//! Audio track state machine.
//!
//! Transitions are a declarative table so they stay auditable; anything not
//! listed is a no-op. `Dead` is terminal.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of the audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AudioState {
    NoAudio = 0,
    Initializing = 1,
    Initialized = 2,
    Ready = 3,
    Playing = 4,
    Paused = 5,
    StoppedBySystem = 6,
    Dead = 7,
}

impl AudioState {
    pub fn as_str(self) -> &'static str {
        match self {
            AudioState::NoAudio => "no_audio",
            AudioState::Initializing => "initializing",
            AudioState::Initialized => "initialized",
            AudioState::Ready => "ready",
            AudioState::Playing => "playing",
            AudioState::Paused => "paused",
            AudioState::StoppedBySystem => "stopped_by_system",
            AudioState::Dead => "dead",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => AudioState::Initializing,
            2 => AudioState::Initialized,
            3 => AudioState::Ready,
            4 => AudioState::Playing,
            5 => AudioState::Paused,
            6 => AudioState::StoppedBySystem,
            7 => AudioState::Dead,
            _ => AudioState::NoAudio,
        }
    }
}

/// Observed condition driving a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioTrigger {
    /// An audio stream was found in the container.
    StreamFound,
    /// The sink opened and its handles are cached.
    SinkOpened,
    /// The sink accepted the first PCM buffer.
    WriteAccepted,
    /// The sink liveness counter confirms output is running.
    LivenessPlaying,
    /// Application pause.
    AppPause,
    /// Application resume; demotes to re-prime the buffer.
    AppResume,
    /// The sink liveness counter froze past the threshold.
    LivenessFrozen,
    /// The frozen counter started moving again.
    LivenessResumed,
    /// Unrecoverable sink error, or `start` rejected.
    Fatal,
}

/// The transition table. Returns the next state, or `None` when the trigger
/// does not apply in the current state.
pub fn transition(from: AudioState, trigger: AudioTrigger) -> Option<AudioState> {
    use AudioState::*;
    use AudioTrigger::*;
    match (from, trigger) {
        (NoAudio, StreamFound) => Some(Initializing),
        (Initializing, SinkOpened) => Some(Initialized),
        (Initialized, WriteAccepted) => Some(Ready),
        (Ready, LivenessPlaying) => Some(Playing),
        (Playing, AppPause) => Some(Paused),
        (Paused, AppResume) => Some(Initialized),
        (Playing, LivenessFrozen) => Some(StoppedBySystem),
        (StoppedBySystem, LivenessResumed) => Some(Playing),
        (Dead, _) => None,
        (_, Fatal) => Some(Dead),
        _ => None,
    }
}

/// Shared-read, CAS-updated holder for the current state.
pub struct AudioStateCell {
    state: AtomicU8,
}

impl AudioStateCell {
    pub fn new(initial: AudioState) -> Self {
        Self {
            state: AtomicU8::new(initial as u8),
        }
    }

    pub fn get(&self) -> AudioState {
        AudioState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Apply a trigger; returns the new state when a transition happened.
    pub fn apply(&self, trigger: AudioTrigger) -> Option<AudioState> {
        loop {
            let cur = self.state.load(Ordering::Relaxed);
            let next = transition(AudioState::from_u8(cur), trigger)?;
            if self
                .state
                .compare_exchange(cur, next as u8, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AudioState::*;
    use AudioTrigger::*;

    #[test]
    fn test_happy_path() {
        let cell = AudioStateCell::new(NoAudio);
        assert_eq!(cell.apply(StreamFound), Some(Initializing));
        assert_eq!(cell.apply(SinkOpened), Some(Initialized));
        assert_eq!(cell.apply(WriteAccepted), Some(Ready));
        assert_eq!(cell.apply(LivenessPlaying), Some(Playing));
    }

    #[test]
    fn test_pause_resume_reprimes() {
        let cell = AudioStateCell::new(Playing);
        assert_eq!(cell.apply(AppPause), Some(Paused));
        assert_eq!(cell.apply(AppResume), Some(Initialized));
        // Re-priming runs the write/liveness path again.
        assert_eq!(cell.apply(WriteAccepted), Some(Ready));
        assert_eq!(cell.apply(LivenessPlaying), Some(Playing));
    }

    #[test]
    fn test_system_stop_and_revival() {
        let cell = AudioStateCell::new(Playing);
        assert_eq!(cell.apply(LivenessFrozen), Some(StoppedBySystem));
        assert_eq!(cell.apply(LivenessResumed), Some(Playing));
    }

    #[test]
    fn test_dead_is_terminal() {
        let cell = AudioStateCell::new(Ready);
        assert_eq!(cell.apply(Fatal), Some(Dead));
        assert_eq!(cell.apply(StreamFound), None);
        assert_eq!(cell.apply(Fatal), None);
        assert_eq!(cell.get(), Dead);
    }

    #[test]
    fn test_unlisted_transitions_are_noops() {
        let cell = AudioStateCell::new(Initializing);
        assert_eq!(cell.apply(LivenessPlaying), None);
        assert_eq!(cell.get(), Initializing);
        assert_eq!(transition(NoAudio, AppPause), None);
        assert_eq!(transition(Ready, LivenessFrozen), None);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(NoAudio.as_str(), "no_audio");
        assert_eq!(StoppedBySystem.as_str(), "stopped_by_system");
    }
}
