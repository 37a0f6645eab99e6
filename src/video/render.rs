//! Video render loop.
//!
//! Decodes inline from the video packet queue, schedules each frame against
//! the master clock, and presents through the host surface. The video clock
//! advances only after a confirmed swap. During seek this loop is the seek
//! master: the first presented frame of the new epoch at or past the target
//! ends the video side of the protocol.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::core::error::PlayerError;
use crate::core::time::{monotonic_us, secs_to_us};
use crate::media::source::{VideoDecoder, VideoFrame};
use crate::playback::context::PlayerContext;
use crate::playback::seek;
use crate::queue::{PopResult, PushOutcome};
use crate::sync::{DriftAction, DriftController, MasterKind};
use crate::video::surface::VideoSurface;

const IDLE_SLEEP: Duration = Duration::from_millis(5);
const POP_TIMEOUT: Duration = Duration::from_millis(10);
const MAX_SCHED_SLEEP_SEC: f64 = 0.010;

struct VideoLoop {
    ctx: Arc<PlayerContext>,
    decoder: Box<dyn VideoDecoder>,
    surface: Box<dyn VideoSurface>,
    drift: DriftController,
    pending: Option<(VideoFrame, u64)>,
    decoder_epoch: u64,
    drained: bool,
    consecutive_errors: u32,
    present_failures: u32,
    force_present: bool,
}

pub(crate) fn run(
    ctx: Arc<PlayerContext>,
    decoder: Box<dyn VideoDecoder>,
    surface: Box<dyn VideoSurface>,
) {
    let drift = DriftController::new(&ctx.cfg);
    let mut worker = VideoLoop {
        ctx,
        decoder,
        surface,
        drift,
        pending: None,
        decoder_epoch: 0,
        drained: false,
        consecutive_errors: 0,
        present_failures: 0,
        force_present: false,
    };
    debug!("video render worker up");
    worker.run();
    debug!("video render worker down");
}

impl VideoLoop {
    fn run(&mut self) {
        loop {
            if self.ctx.is_aborted() {
                break;
            }

            if self.ctx.force_video_reset.swap(false, Ordering::AcqRel) {
                self.hard_reset("forced by watchdog");
            }

            if self.ctx.is_paused() && !self.ctx.seek.in_progress() {
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }

            self.top_up();

            if self.pending.is_none() {
                match self.ctx.video_frames.pop_timeout(POP_TIMEOUT) {
                    PopResult::Aborted => break,
                    PopResult::Item(frame, epoch) => self.pending = Some((frame, epoch)),
                    PopResult::TimedOut => {
                        self.check_eof();
                        continue;
                    }
                }
            }

            let (pts, duration, epoch) = {
                let (frame, epoch) = self.pending.as_ref().unwrap();
                (frame.pts, frame.duration, *epoch)
            };

            // Epoch fencing: a frame of an older generation is never shown.
            if epoch < self.ctx.seek.epoch() {
                self.pending = None;
                continue;
            }

            if self.ctx.seek.drop_video() {
                let target = self.ctx.seek.target_sec();
                if pts.is_nan() || pts < target {
                    self.pending = None;
                    continue;
                }
                // First frame of the new epoch at or past the target: the
                // gate is in seek bypass, present without scheduling.
                if self.present_pending() {
                    seek::on_first_frame(&self.ctx, pts);
                }
                continue;
            }

            if !self.ctx.gate.is_open() {
                // The one permitted path while closed: an idle video master
                // presenting the frame that makes its clock valid again.
                let bootstrap = self.ctx.selector.current() == MasterKind::Video
                    && !self.ctx.video_clock.is_valid();
                if !bootstrap {
                    self.ctx.reselect_master();
                    std::thread::sleep(IDLE_SLEEP);
                    continue;
                }
                self.present_pending();
                continue;
            }

            let Some(master) = self.ctx.master_clock() else {
                // Open gate without a readable master happens only for the
                // idle-video case; establish the clock.
                self.present_pending();
                continue;
            };

            let master_kind = self.ctx.selector.current();
            let action = if pts.is_nan() {
                DriftAction::Present
            } else if self.force_present {
                // After a resync only a frame at or past the re-based clock
                // may be force-presented; earlier ones are still late.
                let base = self.ctx.video_clock.get_clock();
                if base.is_nan() || pts + 1e-9 >= base {
                    self.force_present = false;
                    DriftAction::Present
                } else {
                    DriftAction::Drop
                }
            } else if master_kind == MasterKind::Video {
                // We are the master; cadence comes from frame durations,
                // not from comparing against our own clock.
                DriftAction::Present
            } else {
                // Runaway accounting only on live comparisons, not while a
                // resync catch-up is already dropping frames.
                if self.drift.track_runaway(pts - master) {
                    self.ctx.events.error(PlayerError::DriftRunaway);
                    self.hard_reset("drift runaway");
                    continue;
                }
                self.drift.evaluate(pts, master)
            };

            match action {
                DriftAction::Present => {
                    if master_kind != MasterKind::Video && !pts.is_nan() {
                        let ahead = pts - master;
                        let speed = self.ctx.speed();
                        if ahead > 0.002 {
                            let wait = (ahead / speed).min(MAX_SCHED_SLEEP_SEC);
                            std::thread::sleep(Duration::from_secs_f64(wait));
                            if ahead / speed > MAX_SCHED_SLEEP_SEC {
                                // Not due yet; re-evaluate with a fresh master.
                                continue;
                            }
                        }
                    }
                    self.present_pending();
                }
                DriftAction::Drop | DriftAction::AggressiveDrop => {
                    debug!("dropping late frame {pts:.3} (master {master:.3})");
                    self.pending = None;
                }
                DriftAction::Resync => {
                    warn!("video resync: re-basing video clock to {master:.3}");
                    self.ctx.video_clock.force(master, monotonic_us());
                    self.ctx.video_frames.flush(self.ctx.seek.epoch());
                    self.pending = None;
                    self.force_present = true;
                    self.drift.reset();
                    self.ctx.events.error(PlayerError::VideoResync);
                }
                DriftAction::HardReset => {
                    self.ctx.events.error(PlayerError::DriftRunaway);
                    self.hard_reset("drift beyond hard limit");
                }
            }

            // Scheduling vs. our own cadence when video is master.
            if master_kind == MasterKind::Video && self.pending.is_none() {
                let wait = (duration / self.ctx.speed()).clamp(0.001, 0.100);
                std::thread::sleep(Duration::from_secs_f64(wait));
            }
        }
    }

    /// Keep the frame queue topped up from the packet queue. Non-blocking;
    /// decode happens on this thread by design (the fixed thread set has no
    /// video-decode worker).
    fn top_up(&mut self) {
        while self.ctx.video_frames.len() < self.ctx.video_frames.capacity() {
            let Some((packet, epoch)) = self.ctx.video_packets.try_pop() else {
                if self.ctx.demux_eof.load(Ordering::Relaxed) && !self.drained {
                    match self.decoder.drain() {
                        Ok(frames) => {
                            let epoch = self.ctx.seek.epoch();
                            for frame in frames {
                                if self.ctx.video_frames.push(frame, epoch) == PushOutcome::Aborted
                                {
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!("video drain failed: {e}"),
                    }
                    self.drained = true;
                }
                return;
            };
            if epoch > self.decoder_epoch {
                self.decoder.flush();
                self.decoder_epoch = epoch;
                self.drained = false;
            }
            if epoch < self.ctx.seek.epoch() {
                continue;
            }
            match self.decoder.decode(&packet) {
                Ok(frames) => {
                    self.consecutive_errors = 0;
                    for frame in frames {
                        if self.ctx.video_frames.push(frame, epoch) == PushOutcome::Aborted {
                            return;
                        }
                    }
                }
                Err(e) => {
                    self.consecutive_errors += 1;
                    if self.consecutive_errors == self.ctx.cfg.decode_error_limit {
                        self.ctx.events.error(PlayerError::DecodeVideo(e.to_string()));
                    }
                }
            }
        }
    }

    /// Present the pending frame. Only a confirmed swap advances the video
    /// clock. Returns true when the frame made it to the screen.
    fn present_pending(&mut self) -> bool {
        let Some((frame, _)) = self.pending.take() else {
            return false;
        };
        let shown = self.surface.present(&frame);
        if !shown {
            self.present_failures += 1;
            if self.present_failures % 60 == 1 {
                warn!(
                    "surface rejected frame (failures={})",
                    self.present_failures
                );
            }
            return false;
        }
        self.present_failures = 0;
        if !frame.pts.is_nan() {
            let now = monotonic_us();
            self.ctx.video_clock.update(frame.pts, now);
            self.ctx.gate.update_video_clock(secs_to_us(frame.pts));
            if self.ctx.selector.current() != MasterKind::Audio {
                self.ctx.note_position(frame.pts);
            }
            // An idle video master becomes a live one with its first frame.
            if !self.ctx.gate.is_open() && !self.ctx.seek.in_progress() {
                self.ctx.reselect_master();
            }
        }
        true
    }

    fn check_eof(&mut self) {
        if self.drained
            && self.ctx.demux_eof.load(Ordering::Relaxed)
            && self.pending.is_none()
            && self.ctx.video_packets.is_empty()
            && self.ctx.video_frames.is_empty()
        {
            if !self.ctx.video_eof.swap(true, Ordering::AcqRel) {
                debug!("video render reached end of stream");
            }
            self.ctx.maybe_completed();
        }
    }

    /// Flush the video pipeline and re-enter master selection without
    /// stopping playback.
    fn hard_reset(&mut self, why: &str) {
        info!("video pipeline hard reset: {why}");
        self.ctx.video_frames.flush(self.ctx.seek.epoch());
        self.pending = None;
        self.ctx.video_clock.reset();
        self.drift.reset();
        self.force_present = true;
        self.ctx.selector.unlock("video hard reset");
        self.ctx.reselect_master();
    }
}
