//! Audio media clock.
//!
//! Canonical definition: `clock = last_pts + last_frame_duration - latency`.
//! The clock advances at exactly one site (immediately after a PCM buffer
//! is accepted by the sink) and is never derived from the sink's
//! frames-played counter, which is a liveness signal only. It does not
//! extrapolate with wall time.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use log::debug;

use crate::core::time::{Pts, CLOCK_JITTER_SEC, NO_PTS};

/// Latency-compensated, PTS-derived clock for the audio track.
///
/// Single-writer (the audio render loop), shared-read. All fields are
/// relaxed atomics; readers tolerate small skews and invariants are checked
/// at coarser granularity.
pub struct AudioClock {
    clock_bits: AtomicU64,
    last_pts_bits: AtomicU64,
    last_duration_bits: AtomicU64,
    latency_bits: AtomicU64,
    last_update_us: AtomicI64,
    valid: AtomicBool,
}

impl AudioClock {
    pub fn new() -> Self {
        Self {
            clock_bits: AtomicU64::new(NO_PTS.to_bits()),
            last_pts_bits: AtomicU64::new(NO_PTS.to_bits()),
            last_duration_bits: AtomicU64::new(0f64.to_bits()),
            latency_bits: AtomicU64::new(0f64.to_bits()),
            last_update_us: AtomicI64::new(0),
            valid: AtomicBool::new(false),
        }
    }

    /// Record the sink's output latency. Read once at sink init and then
    /// treated as constant.
    pub fn set_latency(&self, latency_sec: f64) {
        self.latency_bits
            .store(latency_sec.to_bits(), Ordering::Relaxed);
    }

    pub fn latency(&self) -> f64 {
        f64::from_bits(self.latency_bits.load(Ordering::Relaxed))
    }

    /// Invalidate the clock. Done after construction, after seek, and after
    /// any write the sink rejected.
    pub fn reset(&self) {
        self.valid.store(false, Ordering::Relaxed);
        self.clock_bits.store(NO_PTS.to_bits(), Ordering::Relaxed);
        self.last_pts_bits.store(NO_PTS.to_bits(), Ordering::Relaxed);
        self.last_duration_bits
            .store(0f64.to_bits(), Ordering::Relaxed);
        self.last_update_us.store(0, Ordering::Relaxed);
    }

    /// Advance the clock for a frame the sink just accepted.
    ///
    /// This is the single update site. `pts` and `duration` describe the
    /// frame that was written, in media seconds.
    pub fn update(&self, pts: Pts, duration: f64, now_us: i64) {
        let latency = self.latency();
        let clock = pts + duration - latency;

        debug_assert!(!clock.is_nan(), "audio clock must not be NaN");
        debug_assert!(clock >= -latency, "audio clock must not be negative");
        if self.valid.load(Ordering::Relaxed) {
            let prev = f64::from_bits(self.clock_bits.load(Ordering::Relaxed));
            debug_assert!(
                clock >= prev - CLOCK_JITTER_SEC,
                "audio clock regression: {clock} < {prev}"
            );
        }

        self.last_pts_bits.store(pts.to_bits(), Ordering::Relaxed);
        self.last_duration_bits
            .store(duration.to_bits(), Ordering::Relaxed);
        self.last_update_us.store(now_us, Ordering::Relaxed);
        self.clock_bits.store(clock.to_bits(), Ordering::Relaxed);
        self.valid.store(true, Ordering::Relaxed);
    }

    /// Current clock value, `None` while invalid.
    pub fn read(&self) -> Option<f64> {
        if !self.valid.load(Ordering::Relaxed) {
            return None;
        }
        let v = f64::from_bits(self.clock_bits.load(Ordering::Relaxed));
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }

    /// Collaborator-boundary form: NaN while invalid.
    pub fn get_clock(&self) -> f64 {
        self.read().unwrap_or(NO_PTS)
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    /// True when the clock was supposed to be running but has not advanced
    /// within `threshold_sec`. The caller must invalidate the gate and
    /// demote audio when this trips.
    pub fn is_stalled(&self, now_us: i64, threshold_sec: f64) -> bool {
        if !self.valid.load(Ordering::Relaxed) {
            return false;
        }
        let last = self.last_update_us.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        let stalled = (now_us - last) as f64 / 1_000_000.0 > threshold_sec;
        if stalled {
            debug!("audio clock stalled: no update for > {threshold_sec}s");
        }
        stalled
    }

    pub fn last_update_us(&self) -> i64 {
        self.last_update_us.load(Ordering::Relaxed)
    }
}

impl Default for AudioClock {
    fn default() -> Self {
        Self::new()
    }
}
