//! Drift measurement and correction policy.
//!
//! For video: a ladder of increasingly aggressive actions driven by how far
//! the next frame lags the master clock. For audio: a gentle resample-ratio
//! nudge driven by an exponential moving average of measured drift, bounded
//! so it is never audible as a pitch step.

use log::warn;

use crate::core::config::PlayerConfig;

/// What to do with the video frame under consideration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftAction {
    /// Within tolerance: schedule and present normally.
    Present,
    /// Drop frames behind the master until caught up.
    Drop,
    /// Drop without presenting anything until caught up.
    AggressiveDrop,
    /// Re-base the video clock onto the master and flush queued frames.
    Resync,
    /// Flush, reset the video clock, re-enter master selection.
    HardReset,
}

/// Per-frame drift evaluation plus runaway accounting.
pub struct DriftController {
    warn_sec: f64,
    soft_sec: f64,
    hard_sec: f64,
    limit_sec: f64,
    runaway_sec: f64,
    runaway_frames: u32,
    runaway_count: u32,
    last_drift: f64,
}

impl DriftController {
    pub fn new(cfg: &PlayerConfig) -> Self {
        Self {
            warn_sec: cfg.desync_warn_sec,
            soft_sec: cfg.desync_soft_sec,
            hard_sec: cfg.desync_hard_sec,
            limit_sec: cfg.desync_limit_sec,
            runaway_sec: cfg.drift_runaway_sec,
            runaway_frames: cfg.drift_runaway_frames,
            runaway_count: 0,
            last_drift: 0.0,
        }
    }

    /// Decide the fate of a video frame whose PTS lags (or leads) the
    /// master clock. Leading frames are `Present`; the scheduler handles
    /// the wait.
    pub fn evaluate(&mut self, video_pts: f64, master: f64) -> DriftAction {
        let diff = video_pts - master;
        self.last_drift = diff;
        if diff >= -self.warn_sec {
            return DriftAction::Present;
        }
        let behind = -diff;
        if behind <= self.soft_sec {
            DriftAction::Drop
        } else if behind <= self.hard_sec {
            DriftAction::AggressiveDrop
        } else if behind <= self.limit_sec {
            warn!("video resync needed (drift {diff:.3}s)");
            DriftAction::Resync
        } else {
            warn!("drift beyond hard limit ({diff:.3}s), hard reset");
            DriftAction::HardReset
        }
    }

    /// Count consecutive over-threshold drifts; returns true exactly when
    /// the runaway threshold is crossed. One bad PTS never fires it.
    pub fn track_runaway(&mut self, drift: f64) -> bool {
        if drift.abs() > self.runaway_sec {
            self.runaway_count += 1;
            if self.runaway_count >= self.runaway_frames {
                self.runaway_count = 0;
                return true;
            }
        } else {
            self.runaway_count = 0;
        }
        false
    }

    /// Reset accounting after seek or hard reset.
    pub fn reset(&mut self) {
        self.runaway_count = 0;
        self.last_drift = 0.0;
    }

    pub fn last_drift(&self) -> f64 {
        self.last_drift
    }
}

const EMA_ALPHA: f64 = 0.1;
const CORRECTION_GAIN: f64 = 0.05;

/// Exponential-moving-average drift tracker driving the audio resampler.
///
/// Engaged only inside the configured window; below it the drift is noise,
/// above it the video-side ladder takes over. The same formula applies at
/// every playback speed.
pub struct ResampleCorrection {
    ema: f64,
    primed: bool,
    engage_min_sec: f64,
    engage_max_sec: f64,
    limit: f64,
}

impl ResampleCorrection {
    pub fn new(cfg: &PlayerConfig) -> Self {
        Self {
            ema: 0.0,
            primed: false,
            engage_min_sec: cfg.drift_correct_min_sec,
            engage_max_sec: cfg.drift_correct_max_sec,
            limit: cfg.drift_correct_limit,
        }
    }

    /// Feed one drift measurement (audio minus video, seconds) and get the
    /// resample ratio to apply: > 1.0 stretches audio (more samples per
    /// input frame), < 1.0 shrinks it.
    pub fn update(&mut self, drift: f64) -> f64 {
        if !drift.is_finite() {
            return 1.0;
        }
        if self.primed {
            self.ema = self.ema * (1.0 - EMA_ALPHA) + drift * EMA_ALPHA;
        } else {
            self.ema = drift;
            self.primed = true;
        }
        let magnitude = self.ema.abs();
        if magnitude <= self.engage_min_sec || magnitude >= self.engage_max_sec {
            return 1.0;
        }
        let correction = (self.ema * CORRECTION_GAIN).clamp(-self.limit, self.limit);
        1.0 + correction
    }

    pub fn reset(&mut self) {
        self.ema = 0.0;
        self.primed = false;
    }

    pub fn average(&self) -> f64 {
        self.ema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> DriftController {
        DriftController::new(&PlayerConfig::default())
    }

    #[test]
    fn test_ladder_thresholds() {
        let mut c = controller();
        assert_eq!(c.evaluate(10.00, 10.10), DriftAction::Present);
        assert_eq!(c.evaluate(10.00, 10.20), DriftAction::Drop);
        assert_eq!(c.evaluate(10.00, 10.50), DriftAction::AggressiveDrop);
        assert_eq!(c.evaluate(10.00, 11.20), DriftAction::Resync);
        assert_eq!(c.evaluate(10.00, 12.50), DriftAction::HardReset);
    }

    #[test]
    fn test_leading_video_presents() {
        let mut c = controller();
        assert_eq!(c.evaluate(11.0, 10.0), DriftAction::Present);
    }

    #[test]
    fn test_runaway_needs_consecutive_violations() {
        let mut c = controller();
        for _ in 0..29 {
            assert!(!c.track_runaway(1.5));
        }
        assert!(c.track_runaway(1.5));
        // Counter reset after firing.
        assert!(!c.track_runaway(1.5));
    }

    #[test]
    fn test_runaway_resets_on_good_frame() {
        let mut c = controller();
        for _ in 0..20 {
            c.track_runaway(1.5);
        }
        assert!(!c.track_runaway(0.1));
        for _ in 0..29 {
            assert!(!c.track_runaway(1.5));
        }
        assert!(c.track_runaway(1.5));
    }

    #[test]
    fn test_correction_window() {
        let cfg = PlayerConfig::default();
        let mut corr = ResampleCorrection::new(&cfg);
        // Small drift: disengaged.
        assert_eq!(corr.update(0.010), 1.0);
        corr.reset();
        // Mid-window drift engages with a bounded ratio.
        let ratio = corr.update(0.060);
        assert!(ratio > 1.0);
        assert!(ratio <= 1.0 + cfg.drift_correct_limit);
        corr.reset();
        // Huge drift: this mechanism stands aside.
        assert_eq!(corr.update(0.500), 1.0);
    }

    #[test]
    fn test_correction_sign_follows_drift() {
        let cfg = PlayerConfig::default();
        let mut corr = ResampleCorrection::new(&cfg);
        let ratio = corr.update(-0.060);
        assert!(ratio < 1.0);
        assert!(ratio >= 1.0 - cfg.drift_correct_limit);
    }
}
