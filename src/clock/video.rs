//! Video media clock.
//!
//! Holds the PTS of the last frame that was actually shown. Updated only
//! after the surface confirms the swap; never advanced speculatively. A
//! resync may re-base it by assignment, but nothing ever extrapolates it.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use log::debug;

use crate::core::time::{Pts, CLOCK_JITTER_SEC, NO_PTS};

/// Presentation-confirmed clock for the video track. Single-writer (the
/// video render loop), shared-read, relaxed atomics throughout.
pub struct VideoClock {
    pts_bits: AtomicU64,
    last_present_us: AtomicI64,
    valid: AtomicBool,
}

impl VideoClock {
    pub fn new() -> Self {
        Self {
            pts_bits: AtomicU64::new(NO_PTS.to_bits()),
            last_present_us: AtomicI64::new(0),
            valid: AtomicBool::new(false),
        }
    }

    /// Invalidate after construction, seek, or hard reset.
    pub fn reset(&self) {
        self.valid.store(false, Ordering::Relaxed);
        self.pts_bits.store(NO_PTS.to_bits(), Ordering::Relaxed);
        self.last_present_us.store(0, Ordering::Relaxed);
    }

    /// Record a confirmed presentation. Called only after the buffer swap
    /// reported success.
    pub fn update(&self, pts: Pts, now_us: i64) {
        debug_assert!(!pts.is_nan(), "video clock must not be NaN");
        if self.valid.load(Ordering::Relaxed) {
            let prev = f64::from_bits(self.pts_bits.load(Ordering::Relaxed));
            debug_assert!(
                pts >= prev - CLOCK_JITTER_SEC,
                "video clock regression: {pts} < {prev}"
            );
        }
        self.pts_bits.store(pts.to_bits(), Ordering::Relaxed);
        self.last_present_us.store(now_us, Ordering::Relaxed);
        self.valid.store(true, Ordering::Relaxed);
    }

    /// Re-base the clock onto another clock's value (resync). Assignment
    /// only; the drift controller decides when.
    pub fn force(&self, pts: Pts, now_us: i64) {
        debug!("video clock re-based to {pts:.3}");
        self.pts_bits.store(pts.to_bits(), Ordering::Relaxed);
        self.last_present_us.store(now_us, Ordering::Relaxed);
        self.valid.store(true, Ordering::Relaxed);
    }

    pub fn read(&self) -> Option<f64> {
        if !self.valid.load(Ordering::Relaxed) {
            return None;
        }
        let v = f64::from_bits(self.pts_bits.load(Ordering::Relaxed));
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }

    pub fn get_clock(&self) -> f64 {
        self.read().unwrap_or(NO_PTS)
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    /// True when no frame has been presented for `threshold_sec` while the
    /// clock claims to be running.
    pub fn is_stalled(&self, now_us: i64, threshold_sec: f64) -> bool {
        if !self.valid.load(Ordering::Relaxed) {
            return false;
        }
        let last = self.last_present_us.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        (now_us - last) as f64 / 1_000_000.0 > threshold_sec
    }

    pub fn last_present_us(&self) -> i64 {
        self.last_present_us.load(Ordering::Relaxed)
    }
}

impl Default for VideoClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_until_first_present() {
        let clock = VideoClock::new();
        assert!(clock.read().is_none());
        assert!(clock.get_clock().is_nan());
    }

    #[test]
    fn test_update_sets_value() {
        let clock = VideoClock::new();
        clock.update(0.04, 40_000);
        assert_eq!(clock.read(), Some(0.04));
        assert_eq!(clock.last_present_us(), 40_000);
    }

    #[test]
    fn test_force_rebases() {
        let clock = VideoClock::new();
        clock.update(0.5, 10_000);
        clock.force(2.0, 20_000);
        assert_eq!(clock.read(), Some(2.0));
    }

    #[test]
    fn test_stall_detection() {
        let clock = VideoClock::new();
        clock.update(0.1, 100_000);
        assert!(!clock.is_stalled(700_000, 0.7));
        assert!(clock.is_stalled(900_001, 0.7));
        clock.reset();
        assert!(!clock.is_stalled(5_000_000, 0.7));
    }
}
