//! The A/V sync gate.
//!
//! One object, one truth: which clock is master and whether it can be
//! trusted. The gate knows nothing about state machines, decoders or the
//! host. While it is closed, no frame may be presented, no PCM written, and
//! no scheduling sleep taken, except on the one path producing the frame
//! that will reopen it. During a seek the gate reports open to keep the
//! pipeline from deadlocking; the seek coordinator restores real validity
//! afterwards.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Mutex;

use log::{info, warn};

use crate::core::time::monotonic_us;

/// Which clock currently drives scheduling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MasterKind {
    None = 0,
    Audio = 1,
    Video = 2,
}

impl MasterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MasterKind::None => "none",
            MasterKind::Audio => "audio",
            MasterKind::Video => "video",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => MasterKind::Audio,
            2 => MasterKind::Video,
            _ => MasterKind::None,
        }
    }
}

/// Lock-free authorization object shared by every worker.
pub struct AvSyncGate {
    master: AtomicU8,
    master_valid: AtomicBool,
    audio_clock_us: AtomicI64,
    video_clock_us: AtomicI64,
    last_master_advance_us: AtomicI64,
    seek_in_progress: AtomicBool,
    invalidation_reason: Mutex<String>,
}

impl AvSyncGate {
    pub fn new() -> Self {
        Self {
            master: AtomicU8::new(MasterKind::None as u8),
            master_valid: AtomicBool::new(false),
            audio_clock_us: AtomicI64::new(0),
            video_clock_us: AtomicI64::new(0),
            last_master_advance_us: AtomicI64::new(0),
            seek_in_progress: AtomicBool::new(false),
            invalidation_reason: Mutex::new(String::new()),
        }
    }

    /// Open iff the master clock is trusted, or a seek holds the gate in
    /// bypass.
    pub fn is_open(&self) -> bool {
        if self.seek_in_progress.load(Ordering::Relaxed) {
            return true;
        }
        self.master_valid.load(Ordering::Relaxed)
    }

    pub fn set_master(&self, kind: MasterKind) {
        self.master.store(kind as u8, Ordering::Relaxed);
        info!("sync master = {}", kind.as_str());
    }

    pub fn master(&self) -> MasterKind {
        MasterKind::from_u8(self.master.load(Ordering::Relaxed))
    }

    /// Mark the master clock trusted and stamp the stall detector.
    pub fn set_valid(&self) {
        self.master_valid.store(true, Ordering::Relaxed);
        self.last_master_advance_us
            .store(monotonic_us(), Ordering::Relaxed);
    }

    /// Close the gate. A reason is mandatory; it is what diagnostics show
    /// when playback froze.
    pub fn invalidate(&self, reason: &str) {
        self.master_valid.store(false, Ordering::Relaxed);
        let mut slot = self.invalidation_reason.lock().unwrap();
        slot.clear();
        slot.push_str(reason);
        warn!("sync gate invalidated: {reason}");
    }

    pub fn invalidation_reason(&self) -> String {
        self.invalidation_reason.lock().unwrap().clone()
    }

    pub fn master_valid(&self) -> bool {
        self.master_valid.load(Ordering::Relaxed)
    }

    /// Mirror the audio clock; advances the stall stamp when audio is the
    /// open master.
    pub fn update_audio_clock(&self, clock_us: i64) {
        self.audio_clock_us.store(clock_us, Ordering::Relaxed);
        if self.master() == MasterKind::Audio && self.is_open() {
            self.last_master_advance_us
                .store(monotonic_us(), Ordering::Relaxed);
        }
    }

    /// Mirror the video clock; advances the stall stamp when video is the
    /// open master.
    pub fn update_video_clock(&self, clock_us: i64) {
        self.video_clock_us.store(clock_us, Ordering::Relaxed);
        if self.master() == MasterKind::Video && self.is_open() {
            self.last_master_advance_us
                .store(monotonic_us(), Ordering::Relaxed);
        }
    }

    pub fn audio_clock_us(&self) -> i64 {
        self.audio_clock_us.load(Ordering::Relaxed)
    }

    pub fn video_clock_us(&self) -> i64 {
        self.video_clock_us.load(Ordering::Relaxed)
    }

    pub fn last_advance_us(&self) -> i64 {
        self.last_master_advance_us.load(Ordering::Relaxed)
    }

    /// True when the gate is open for non-seek reasons but the master clock
    /// has not advanced within the threshold.
    pub fn check_stall(&self, threshold_us: i64) -> bool {
        if self.seek_in_progress.load(Ordering::Relaxed) {
            return false;
        }
        if !self.master_valid.load(Ordering::Relaxed) {
            return false;
        }
        let last = self.last_master_advance_us.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        let elapsed = monotonic_us() - last;
        if elapsed > threshold_us {
            warn!("master clock stall: last advance {} ms ago", elapsed / 1000);
            return true;
        }
        false
    }

    pub fn set_seek_in_progress(&self, in_progress: bool) {
        self.seek_in_progress.store(in_progress, Ordering::Relaxed);
        if in_progress {
            info!("seek: sync gate bypass enabled");
        } else {
            info!("seek done: sync gate restored");
        }
    }

    pub fn seek_in_progress(&self) -> bool {
        self.seek_in_progress.load(Ordering::Relaxed)
    }
}

impl Default for AvSyncGate {
    fn default() -> Self {
        Self::new()
    }
}
