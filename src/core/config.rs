//! Engine tunables.
//!
//! Every threshold the synchronization engine acts on lives here, so hosts
//! can tighten or relax them without rebuilding. The defaults are the values
//! the engine was hardened with.

use serde::{Deserialize, Serialize};

/// Playback engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Drift below this is presented normally (seconds).
    pub desync_warn_sec: f64,
    /// Above this, video frames behind the master are dropped without render.
    pub desync_soft_sec: f64,
    /// Above this, the video clock is re-based onto the master.
    pub desync_hard_sec: f64,
    /// Above this, the video pipeline is hard-reset.
    pub desync_limit_sec: f64,

    /// Audio clock with no update for this long counts as stalled.
    pub audio_stall_sec: f64,
    /// Video clock with no update for this long counts as stalled.
    pub video_stall_sec: f64,
    /// Master clock with no advance for this long trips the gate watchdog.
    pub master_stall_us: i64,
    /// Sink liveness counter frozen for this long demotes the audio track.
    pub sink_frozen_ms: i64,
    /// Seek without a first presented frame for this long forces a reset.
    pub seek_timeout_ms: i64,

    /// Audio ahead of the master by more than this sleeps instead of writing.
    pub audio_ahead_max_sec: f64,
    /// Audio behind the master by more than this drops the dequeued frame.
    pub audio_behind_max_sec: f64,

    /// Resample correction engages above this average drift.
    pub drift_correct_min_sec: f64,
    /// Resample correction disengages above this average drift.
    pub drift_correct_max_sec: f64,
    /// Resample correction is bounded to +/- this ratio.
    pub drift_correct_limit: f64,
    /// Drift beyond this counts toward runaway detection (seconds).
    pub drift_runaway_sec: f64,
    /// Consecutive over-threshold evaluations before runaway fires.
    pub drift_runaway_frames: u32,

    /// Compressed packets buffered per stream.
    pub packet_queue_capacity: usize,
    /// Decoded frames buffered per stream.
    pub frame_queue_capacity: usize,
    /// Consecutive decode failures before the error surfaces.
    pub decode_error_limit: u32,

    /// AV-sync watchdog period in milliseconds.
    pub watchdog_period_ms: u64,
    /// Diagnostic snapshot period in milliseconds.
    pub diagnostic_period_ms: u64,

    /// Assumed sink output latency when the sink cannot report one.
    pub latency_fallback_sec: f64,
    /// Lower bound for `set_speed`.
    pub min_speed: f64,
    /// Upper bound for `set_speed`.
    pub max_speed: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            desync_warn_sec: 0.150,
            desync_soft_sec: 0.300,
            desync_hard_sec: 0.800,
            desync_limit_sec: 2.0,

            audio_stall_sec: 0.5,
            video_stall_sec: 0.7,
            master_stall_us: 500_000,
            sink_frozen_ms: 1000,
            seek_timeout_ms: 2000,

            audio_ahead_max_sec: 0.040,
            audio_behind_max_sec: 0.080,

            drift_correct_min_sec: 0.040,
            drift_correct_max_sec: 0.100,
            drift_correct_limit: 0.005,
            drift_runaway_sec: 1.0,
            drift_runaway_frames: 30,

            packet_queue_capacity: 128,
            frame_queue_capacity: 16,
            decode_error_limit: 16,

            watchdog_period_ms: 500,
            diagnostic_period_ms: 1000,

            latency_fallback_sec: 0.100,
            min_speed: 0.5,
            max_speed: 3.0,
        }
    }
}

impl PlayerConfig {
    /// Clamp a requested playback rate into the supported range.
    pub fn clamp_speed(&self, rate: f64) -> f64 {
        if rate.is_nan() {
            return 1.0;
        }
        rate.clamp(self.min_speed, self.max_speed)
    }
}
