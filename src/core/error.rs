//! Player error taxonomy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Everything that can go wrong inside the playback core.
///
/// Per-packet decode failures are swallowed and counted; they only surface
/// as [`PlayerError::DecodeVideo`]/[`PlayerError::DecodeAudio`] after enough
/// consecutive failures. Audio-path failures never stop playback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayerError {
    #[error("failed to open source: {0}")]
    OpenFailed(String),
    #[error("container has no playable streams")]
    NoStreams,
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("video decode failed: {0}")]
    DecodeVideo(String),
    #[error("audio decode failed: {0}")]
    DecodeAudio(String),
    #[error("audio device died: {0}")]
    AudioDead(String),
    #[error("master clock stalled")]
    ClockStall,
    #[error("a/v drift ran away")]
    DriftRunaway,
    #[error("audio master lost")]
    AudioMasterLost,
    #[error("video resynchronized to master")]
    VideoResync,
    #[error("internal error: {0}")]
    Internal(String),
}

impl PlayerError {
    /// Stable uppercase tag for host-side matching and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            PlayerError::OpenFailed(_) => "OPEN_FAILED",
            PlayerError::NoStreams => "NO_STREAMS",
            PlayerError::UnsupportedCodec(_) => "UNSUPPORTED_CODEC",
            PlayerError::DecodeVideo(_) => "DECODE_VIDEO",
            PlayerError::DecodeAudio(_) => "DECODE_AUDIO",
            PlayerError::AudioDead(_) => "AUDIO_DEAD",
            PlayerError::ClockStall => "CLOCK_STALL",
            PlayerError::DriftRunaway => "DRIFT_RUNAWAY",
            PlayerError::AudioMasterLost => "AUDIO_MASTER_LOST",
            PlayerError::VideoResync => "VIDEO_RESYNC",
            PlayerError::Internal(_) => "INTERNAL",
        }
    }

    /// Fatal errors are single-shot: the first one recorded wins.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlayerError::OpenFailed(_)
                | PlayerError::NoStreams
                | PlayerError::UnsupportedCodec(_)
                | PlayerError::AudioDead(_)
                | PlayerError::Internal(_)
        )
    }
}

/// Single-shot slot for the first fatal error.
///
/// Later fatals are still logged by the caller but never replace the first.
#[derive(Debug, Default)]
pub struct FatalSlot {
    occupied: AtomicBool,
    slot: Mutex<Option<PlayerError>>,
}

impl FatalSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error; returns true when this was the first one.
    pub fn record(&self, err: PlayerError) -> bool {
        if self.occupied.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.slot.lock().unwrap() = Some(err);
        true
    }

    pub fn get(&self) -> Option<PlayerError> {
        self.slot.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fatal_wins() {
        let slot = FatalSlot::new();
        assert!(slot.record(PlayerError::AudioDead("start rejected".into())));
        assert!(!slot.record(PlayerError::Internal("later".into())));
        assert_eq!(
            slot.get(),
            Some(PlayerError::AudioDead("start rejected".into()))
        );
    }

    #[test]
    fn test_tags_are_stable() {
        assert_eq!(PlayerError::ClockStall.tag(), "CLOCK_STALL");
        assert_eq!(PlayerError::AudioMasterLost.tag(), "AUDIO_MASTER_LOST");
        assert_eq!(PlayerError::NoStreams.tag(), "NO_STREAMS");
    }

    #[test]
    fn test_recovery_errors_are_not_fatal() {
        assert!(!PlayerError::ClockStall.is_fatal());
        assert!(!PlayerError::DriftRunaway.is_fatal());
        assert!(!PlayerError::AudioMasterLost.is_fatal());
        assert!(PlayerError::AudioDead("x".into()).is_fatal());
    }
}
