//! PCM sink contract.
//!
//! The engine enforces one rule on implementations: after `start`,
//! `play_state` must report `Playing`, otherwise the audio track is declared
//! dead. `frames_played` is a liveness signal only; it is never used as a
//! clock source.

/// Driver-reported playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkPlayState {
    Stopped,
    Paused,
    Playing,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("audio device error: {0}")]
    Device(String),
    #[error("write rejected: {0}")]
    Write(String),
    #[error("sink released")]
    Closed,
}

/// Platform PCM output. S16 interleaved input.
pub trait AudioSink: Send {
    /// Queue PCM bytes for output. Returns how many bytes were accepted;
    /// zero means the device buffer is full right now.
    fn write(&mut self, pcm: &[u8]) -> Result<usize, SinkError>;

    /// Start (or resume) output. `false` means the device refused, which
    /// the engine treats as fatal for the audio track.
    fn start(&mut self) -> bool;

    fn pause(&mut self);
    fn stop(&mut self);

    /// Drop queued-but-unplayed PCM.
    fn flush(&mut self);

    /// Tear the device down; every call after this fails.
    fn release(&mut self);

    /// Monotone count of sample frames the device consumed. Liveness only.
    fn frames_played(&self) -> u64;

    /// Reported output latency, or a non-positive value when unknown.
    fn latency_ms(&self) -> i64;

    fn play_state(&self) -> SinkPlayState;
}
