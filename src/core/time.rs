//! Media-time helpers.
//!
//! Presentation timestamps are double-precision seconds in media time;
//! `f64::NAN` means "no value yet". Wall-clock measurements use a
//! process-monotonic microsecond counter.

use std::sync::OnceLock;
use std::time::Instant;

/// Presentation timestamp in seconds of media time.
pub type Pts = f64;

/// Sentinel for "no timestamp yet".
pub const NO_PTS: Pts = f64::NAN;

/// Tolerance applied to monotonicity checks, absorbs FP jitter.
pub const CLOCK_JITTER_SEC: f64 = 0.001;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic wall time in microseconds since the first call in this process.
pub fn monotonic_us() -> i64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as i64
}

/// Convert seconds to microseconds.
#[inline]
pub fn secs_to_us(secs: f64) -> i64 {
    (secs * 1_000_000.0) as i64
}

/// Convert microseconds to seconds.
#[inline]
pub fn us_to_secs(us: i64) -> f64 {
    us as f64 / 1_000_000.0
}

/// Convert milliseconds to seconds.
#[inline]
pub fn ms_to_secs(ms: i64) -> f64 {
    ms as f64 / 1_000.0
}

/// Convert seconds to milliseconds, saturating NaN to zero.
#[inline]
pub fn secs_to_ms(secs: f64) -> i64 {
    if secs.is_nan() {
        0
    } else {
        (secs * 1_000.0) as i64
    }
}
