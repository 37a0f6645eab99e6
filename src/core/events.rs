//! Host-visible events.
//!
//! The engine never holds a back-reference to its host. Event delivery goes
//! through a callback registered at construction; workers receive the hub by
//! shared context and fire into it.

use log::{debug, warn};
use serde::Serialize;

use crate::audio::state::AudioState;
use crate::core::error::{FatalSlot, PlayerError};
use crate::core::time::Pts;
use std::sync::atomic::{AtomicBool, Ordering};

/// Periodic state snapshot for host-side HUDs and logs.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticSnapshot {
    pub master: &'static str,
    pub audio_clock: Option<f64>,
    pub video_clock: Option<f64>,
    pub drift: Option<f64>,
    pub audio_stalled: bool,
    pub audio_healthy: bool,
    pub recovering: bool,
}

impl DiagnosticSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }
}

/// Everything the host can observe about playback.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// First decode context is configured.
    Prepared,
    /// The video render loop presented a frame at or past the seek target.
    FirstFrameAfterSeek { pts: Pts },
    /// The audio track changed state.
    AudioState(AudioState),
    /// Authoritative playback position, emitted so the UI never regresses
    /// across a seek.
    Position { ms: i64 },
    /// Periodic diagnostic snapshot.
    Diagnostic(DiagnosticSnapshot),
    /// A recovery or fatal condition. Recovery errors repeat; fatals are
    /// single-shot.
    Error(PlayerError),
    /// EOF reached on every active stream.
    Completed,
}

/// Callback the host registers to receive events.
pub type EventCallback = Box<dyn Fn(&PlayerEvent) + Send + Sync>;

/// Fan-out point for engine events.
pub struct EventHub {
    callback: Option<EventCallback>,
    fatal: FatalSlot,
    closed: AtomicBool,
}

impl EventHub {
    pub fn new(callback: Option<EventCallback>) -> Self {
        Self {
            callback,
            fatal: FatalSlot::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Stop delivery permanently. Called on release; nothing is emitted after.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn emit(&self, event: PlayerEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        debug!("event: {:?}", event);
        if let Some(cb) = &self.callback {
            cb(&event);
        }
    }

    /// Report an error. Fatal errors are recorded single-shot: only the
    /// first reaches the host, the rest are logged.
    pub fn error(&self, err: PlayerError) {
        if err.is_fatal() && !self.fatal.record(err.clone()) {
            warn!("suppressed subsequent fatal error: {} ({})", err, err.tag());
            return;
        }
        self.emit(PlayerEvent::Error(err));
    }

    /// The first fatal error recorded, if any.
    pub fn fatal(&self) -> Option<PlayerError> {
        self.fatal.get()
    }
}
