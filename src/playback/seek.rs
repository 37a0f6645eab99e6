//! Seek protocol.
//!
//! A seek is an epoch change. The coordinator bumps the epoch, puts the
//! gate into bypass, invalidates both clocks, flushes the packet queues and
//! repositions the container. Video is the seek master: the render loop
//! presents the first frame of the new epoch at or past the target, which
//! clears the video drop flag; audio stays silent until then. At most one
//! seek is active: newer requests replace the pending slot and are replayed
//! once the active one completes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use log::{info, warn};

use crate::audio::state::AudioState;
use crate::core::events::PlayerEvent;
use crate::core::time::{monotonic_us, ms_to_secs, Pts};
use crate::playback::context::{DemuxCommand, PlayerContext};

#[derive(Debug, Default)]
struct SeekInner {
    target_ms: i64,
    exact: bool,
    pending: Option<(i64, bool)>,
    started_us: i64,
}

/// Seek bookkeeping shared by the coordinator and the render loops.
pub struct SeekState {
    in_progress: AtomicBool,
    drop_audio: AtomicBool,
    drop_video: AtomicBool,
    epoch: AtomicU64,
    inner: Mutex<SeekInner>,
}

impl SeekState {
    pub fn new() -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            drop_audio: AtomicBool::new(false),
            drop_video: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            inner: Mutex::new(SeekInner::default()),
        }
    }

    /// Current seek generation. Frames of older epochs are dropped on
    /// dequeue.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Relaxed)
    }

    pub fn drop_audio(&self) -> bool {
        self.drop_audio.load(Ordering::Relaxed)
    }

    pub fn drop_video(&self) -> bool {
        self.drop_video.load(Ordering::Relaxed)
    }

    pub fn clear_drop_audio(&self) {
        self.drop_audio.store(false, Ordering::Relaxed);
    }

    pub fn clear_drop_video(&self) {
        self.drop_video.store(false, Ordering::Relaxed);
    }

    pub fn target_sec(&self) -> Pts {
        ms_to_secs(self.inner.lock().unwrap().target_ms)
    }

    pub fn exact(&self) -> bool {
        self.inner.lock().unwrap().exact
    }

    pub fn started_us(&self) -> i64 {
        self.inner.lock().unwrap().started_us
    }

    fn begin(&self, target_ms: i64, exact: bool) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.target_ms = target_ms;
        inner.exact = exact;
        inner.started_us = monotonic_us();
        self.drop_audio.store(true, Ordering::Relaxed);
        self.drop_video.store(true, Ordering::Relaxed);
        self.in_progress.store(true, Ordering::Relaxed);
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn store_pending(&self, target_ms: i64, exact: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending = Some((target_ms, exact));
    }

    fn take_pending(&self) -> Option<(i64, bool)> {
        self.inner.lock().unwrap().pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.inner.lock().unwrap().pending.is_some()
    }

    fn end(&self) {
        self.in_progress.store(false, Ordering::Relaxed);
    }
}

impl Default for SeekState {
    fn default() -> Self {
        Self::new()
    }
}

/// Start (or queue) a seek to `target_ms`.
pub(crate) fn request_seek(ctx: &PlayerContext, target_ms: i64, exact: bool) {
    if ctx.is_aborted() {
        return;
    }
    if ctx.seek.in_progress() {
        // Coalesce: the newest request wins, the active one keeps running.
        info!("seek({target_ms} ms) queued behind active seek");
        ctx.seek.store_pending(target_ms, exact);
        return;
    }

    let epoch = ctx.seek.begin(target_ms, exact);
    ctx.gate.set_seek_in_progress(true);
    ctx.waiting_first_frame_after_seek
        .store(true, Ordering::Relaxed);
    info!("seek to {target_ms} ms (epoch {epoch}, exact={exact})");

    // The UI must not regress while the clocks are invalid: report the last
    // trusted position as final.
    ctx.events.emit(PlayerEvent::Position {
        ms: ctx.last_position(),
    });

    ctx.audio_clock.reset();
    ctx.video_clock.reset();

    ctx.audio_packets.flush(epoch);
    ctx.video_packets.flush(epoch);
    ctx.audio_frames.flush(epoch);
    ctx.video_frames.flush(epoch);
    ctx.clear_eof();
    ctx.selector.unlock("seek");

    if ctx
        .demux_ctl
        .send(DemuxCommand::Seek {
            target_sec: ms_to_secs(target_ms),
        })
        .is_err()
    {
        warn!("demux thread gone, abandoning seek");
        force_end_seek(ctx);
    }

    // Degenerate stream layouts: without the missing (or dead) stream its
    // drop flag can never be cleared by a render loop.
    if !ctx.has_video {
        ctx.seek.clear_drop_video();
    }
    if !ctx.has_audio || ctx.audio_state.get() == AudioState::Dead {
        ctx.seek.clear_drop_audio();
    }
}

/// Called by the video render loop when it presented the first frame of the
/// new epoch at or past the target.
pub(crate) fn on_first_frame(ctx: &PlayerContext, pts: Pts) {
    ctx.seek.clear_drop_video();
    ctx.waiting_first_frame_after_seek
        .store(false, Ordering::Relaxed);
    ctx.note_position(pts);
    // Coalesced seeks report once: a queued request supersedes this event.
    if !ctx.seek.has_pending() {
        ctx.events.emit(PlayerEvent::FirstFrameAfterSeek { pts });
    }
    complete_if_done(ctx);
}

/// Finish the protocol once both drop flags are clear; replays a pending
/// request if one accumulated.
pub(crate) fn complete_if_done(ctx: &PlayerContext) {
    if !ctx.seek.in_progress() {
        return;
    }
    if ctx.seek.drop_audio() || ctx.seek.drop_video() {
        return;
    }
    ctx.seek.end();
    ctx.gate.set_seek_in_progress(false);
    ctx.selector.unlock("seek complete");
    ctx.reselect_master();
    info!("seek complete (epoch {})", ctx.seek.epoch());

    if let Some((target_ms, exact)) = ctx.seek.take_pending() {
        request_seek(ctx, target_ms, exact);
    }
}

/// Forced teardown of a stuck seek (watchdog, demux death). Invalidates the
/// video pipeline but keeps playback alive.
pub(crate) fn force_end_seek(ctx: &PlayerContext) {
    warn!("forcing seek to end (epoch {})", ctx.seek.epoch());
    ctx.video_frames.flush(ctx.seek.epoch());
    ctx.video_clock.reset();
    ctx.force_video_reset.store(true, Ordering::Relaxed);
    ctx.seek.clear_drop_audio();
    ctx.seek.clear_drop_video();
    ctx.seek.end();
    ctx.gate.set_seek_in_progress(false);
    ctx.waiting_first_frame_after_seek
        .store(false, Ordering::Relaxed);
    ctx.selector.unlock("seek aborted");
    ctx.reselect_master();
    ctx.events.emit(PlayerEvent::Position {
        ms: ctx.last_position(),
    });
    if let Some((target_ms, exact)) = ctx.seek.take_pending() {
        request_seek(ctx, target_ms, exact);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_is_monotone() {
        let seek = SeekState::new();
        let a = seek.begin(1000, false);
        seek.end();
        let b = seek.begin(2000, false);
        assert!(b > a);
        assert_eq!(seek.epoch(), b);
    }

    #[test]
    fn test_begin_sets_drop_flags() {
        let seek = SeekState::new();
        seek.begin(5000, true);
        assert!(seek.in_progress());
        assert!(seek.drop_audio());
        assert!(seek.drop_video());
        assert!(seek.exact());
        assert!((seek.target_sec() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_pending_replaces() {
        let seek = SeekState::new();
        seek.begin(1000, false);
        seek.store_pending(2000, false);
        seek.store_pending(3000, true);
        assert_eq!(seek.take_pending(), Some((3000, true)));
        assert_eq!(seek.take_pending(), None);
    }
}
