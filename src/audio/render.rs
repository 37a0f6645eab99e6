//! Audio render loop.
//!
//! The sole writer of the audio clock. Every accepted sink write advances
//! the clock with the PTS of the frame just written; nothing else does.
//! The loop also enforces the pacing rules (audio never plays ahead of the
//! master), drives the audio state machine from sink liveness, and keeps
//! draining frames after audio death so the rest of the pipeline never
//! backs up.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::audio::sink::SinkPlayState;
use crate::audio::state::{AudioState, AudioTrigger};
use crate::core::error::PlayerError;
use crate::core::time::{monotonic_us, secs_to_us};
use crate::playback::context::PlayerContext;
use crate::playback::seek;
use crate::queue::PopResult;
use crate::sync::MasterKind;

const IDLE_SLEEP: Duration = Duration::from_millis(5);
const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Sink liveness tracking: the frames-played counter is only ever compared
/// against itself, never used as a clock.
struct Liveness {
    last_counter: u64,
    last_change_ms: i64,
    advances: u32,
}

impl Liveness {
    fn new(now_ms: i64) -> Self {
        Self {
            last_counter: 0,
            last_change_ms: now_ms,
            advances: 0,
        }
    }

    fn observe(&mut self, ctx: &PlayerContext, counter: u64, play_state: SinkPlayState, now_ms: i64) {
        if counter > self.last_counter {
            self.last_counter = counter;
            self.last_change_ms = now_ms;
            self.advances += 1;
            match ctx.audio_state.get() {
                AudioState::Ready if self.advances >= 2 && play_state == SinkPlayState::Playing => {
                    ctx.audio_state_apply(AudioTrigger::LivenessPlaying);
                    // Audio just became healthy: it may take mastership even
                    // though the first selection already locked.
                    ctx.selector.unlock("audio confirmed playing");
                    ctx.reselect_master();
                }
                AudioState::StoppedBySystem => {
                    info!("sink liveness resumed, reviving audio");
                    ctx.audio_state_apply(AudioTrigger::LivenessResumed);
                    ctx.selector.unlock("audio revived");
                    ctx.reselect_master();
                }
                _ => {}
            }
        } else if ctx.audio_state.get() == AudioState::Playing
            && now_ms - self.last_change_ms > ctx.cfg.sink_frozen_ms
        {
            warn!(
                "sink liveness counter frozen for {} ms",
                now_ms - self.last_change_ms
            );
            ctx.audio_state_apply(AudioTrigger::LivenessFrozen);
            ctx.audio_clock.reset();
            ctx.gate.invalidate("sink liveness frozen");
            ctx.events.error(PlayerError::AudioMasterLost);
            ctx.selector.force_demote(
                &ctx.gate,
                "sink liveness frozen",
                ctx.video_clock.read().is_some(),
            );
            self.last_change_ms = now_ms;
        }
    }
}

pub(crate) fn run(ctx: Arc<PlayerContext>) {
    let mut liveness = Liveness::new(monotonic_us() / 1000);
    let mut dead = false;
    let mut last_stall_check_us = monotonic_us();

    debug!("audio render worker up");
    loop {
        if ctx.is_aborted() {
            break;
        }

        if dead {
            // Audio is gone but playback continues; keep the queue moving.
            match ctx.audio_frames.pop_timeout(POP_TIMEOUT) {
                PopResult::Aborted => break,
                _ => continue,
            }
        }

        if ctx.is_paused() && !ctx.seek.in_progress() {
            std::thread::sleep(IDLE_SLEEP);
            continue;
        }

        // Seek: audio follows silently until video has positioned.
        if ctx.seek.in_progress() && ctx.seek.drop_audio() && !ctx.seek.drop_video() {
            ctx.seek.clear_drop_audio();
            seek::complete_if_done(&ctx);
        }

        // Audio never plays ahead of the master.
        let mut drop_behind = false;
        if let (Some(audio), Some(master)) = (ctx.audio_clock.read(), ctx.master_clock()) {
            if ctx.selector.current() != MasterKind::Audio {
                let delta = audio - master;
                if delta > ctx.cfg.audio_ahead_max_sec {
                    std::thread::sleep(IDLE_SLEEP);
                    continue;
                }
                drop_behind = delta < -ctx.cfg.audio_behind_max_sec;
            }
        }

        let (frame, epoch) = match ctx.audio_frames.pop_timeout(POP_TIMEOUT) {
            PopResult::Aborted => break,
            PopResult::TimedOut => {
                if ctx.audio_decode_eof.load(Ordering::Relaxed) && ctx.audio_frames.is_empty() {
                    if !ctx.audio_render_eof.swap(true, Ordering::AcqRel) {
                        debug!("audio render reached end of stream");
                    }
                    ctx.maybe_completed();
                }
                continue;
            }
            PopResult::Item(frame, epoch) => (frame, epoch),
        };

        if epoch < ctx.seek.epoch() {
            continue;
        }
        if ctx.seek.drop_audio() {
            if !ctx.has_video {
                // Audio-only source: audio is its own seek master.
                let target = ctx.seek.target_sec();
                if frame.pts.is_nan() || frame.pts + frame.duration < target {
                    continue;
                }
                ctx.seek.clear_drop_audio();
                seek::complete_if_done(&ctx);
            } else {
                continue;
            }
        }
        if drop_behind {
            debug!("audio behind master, dropping frame at {:.3}", frame.pts);
            continue;
        }

        // Write the whole buffer; zero-acceptance means the device buffer
        // is full right now, not an error.
        let mut offset = 0usize;
        let mut write_failed = None;
        while offset < frame.pcm.len() && !ctx.is_aborted() {
            let result = {
                let mut sink = ctx
                    .sink
                    .as_ref()
                    .expect("audio render loop requires a sink")
                    .lock()
                    .unwrap();
                sink.write(&frame.pcm[offset..])
            };
            match result {
                Ok(0) => std::thread::sleep(IDLE_SLEEP),
                Ok(n) => offset += n,
                Err(e) => {
                    write_failed = Some(e);
                    break;
                }
            }
            if ctx.seek.epoch() > epoch {
                // A seek landed mid-buffer; what we wrote is gone with the
                // flush and the rest of this frame is stale.
                break;
            }
        }

        if let Some(e) = write_failed {
            warn!("audio sink write failed: {e}");
            dead = true;
            ctx.audio_state_apply(AudioTrigger::Fatal);
            ctx.audio_clock.reset();
            ctx.gate.invalidate("audio sink died");
            ctx.events.error(PlayerError::AudioDead(e.to_string()));
            ctx.selector
                .force_demote(&ctx.gate, "audio sink died", ctx.video_clock.read().is_some());
            continue;
        }
        if offset == 0 || ctx.seek.epoch() > epoch {
            continue;
        }

        // The single audio clock update site: a buffer was just accepted.
        if !frame.pts.is_nan() {
            let now_us = monotonic_us();
            ctx.audio_clock.update(frame.pts, frame.duration, now_us);
            if ctx.gate.is_open() {
                ctx.gate
                    .update_audio_clock(secs_to_us(ctx.audio_clock.get_clock()));
            }
            if ctx.selector.current() == MasterKind::Audio {
                ctx.note_position(ctx.audio_clock.get_clock());
            }
        }

        ctx.audio_state_apply(AudioTrigger::WriteAccepted);

        let (counter, play_state) = {
            let sink = ctx.sink.as_ref().unwrap().lock().unwrap();
            (sink.frames_played(), sink.play_state())
        };
        liveness.observe(&ctx, counter, play_state, monotonic_us() / 1000);

        // A newly healthy audio clock may win mastership back.
        ctx.reselect_master();

        let now_us = monotonic_us();
        if now_us - last_stall_check_us > 500_000 {
            last_stall_check_us = now_us;
            if ctx.gate.check_stall(ctx.cfg.master_stall_us) {
                ctx.gate.invalidate("MASTER CLOCK STALLED");
            }
        }
    }
    debug!("audio render worker down");
}
