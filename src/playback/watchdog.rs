//! Background supervisors.
//!
//! The AV-sync watchdog guarantees liveness: it catches master clock
//! stalls, demotes a stalled audio master, promotes a revived one, feeds
//! the resample correction, and publishes the periodic diagnostic
//! snapshot. The seek watchdog breaks seek deadlocks by force-resetting
//! the video pipeline when no first frame arrives in time.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::audio::state::AudioState;
use crate::core::error::PlayerError;
use crate::core::events::{DiagnosticSnapshot, PlayerEvent};
use crate::core::time::monotonic_us;
use crate::playback::context::PlayerContext;
use crate::playback::seek;
use crate::sync::{MasterKind, ResampleCorrection};

/// Sleep in small slices so shutdown never waits out a full period.
/// Returns true when the player aborted.
fn sleep_with_abort(ctx: &PlayerContext, total: Duration) -> bool {
    let slice = Duration::from_millis(20);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if ctx.is_aborted() {
            return true;
        }
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining -= step;
    }
    ctx.is_aborted()
}

pub(crate) fn run_sync(ctx: Arc<PlayerContext>) {
    let mut correction = ResampleCorrection::new(&ctx.cfg);
    let period = Duration::from_millis(ctx.cfg.watchdog_period_ms);
    let mut since_diag_ms = 0u64;

    loop {
        if sleep_with_abort(&ctx, period) {
            break;
        }
        since_diag_ms += ctx.cfg.watchdog_period_ms;

        if ctx.is_paused() && !ctx.seek.in_progress() {
            // Paused clocks are legitimately frozen.
            continue;
        }
        if ctx
            .completed_emitted
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            // Post-EOF quiescence is not a stall.
            continue;
        }

        let now = monotonic_us();

        if ctx.gate.check_stall(ctx.cfg.master_stall_us) {
            ctx.gate.invalidate("MASTER CLOCK STALLED");
            ctx.events.error(PlayerError::ClockStall);
            ctx.selector.unlock("master stalled");
            ctx.reselect_master();
        }

        let audio_stalled = ctx.audio_clock.is_stalled(now, ctx.cfg.audio_stall_sec);

        // Audio stalled mid-play: demote without pausing anything.
        if ctx.has_audio && audio_stalled && ctx.selector.current() == MasterKind::Audio {
            warn!("audio stalled mid-play, demoting to video master");
            ctx.events.error(PlayerError::AudioMasterLost);
            ctx.selector.force_demote(
                &ctx.gate,
                "audio clock stalled",
                ctx.video_clock.read().is_some(),
            );
        }

        ctx.selector.check_invariants(&ctx.gate, ctx.selector_inputs());

        // Audio revival: the sink came back, hand mastership home. Soft
        // switch, no clock is reset.
        if ctx.has_audio
            && ctx.selector.current() == MasterKind::Video
            && ctx.audio_state.get() == AudioState::Playing
            && !audio_stalled
            && ctx.audio_clock.read().is_some()
        {
            info!("audio revived, re-selecting master");
            ctx.selector.unlock("audio revived");
            ctx.reselect_master();
        }

        // Gentle audio-side drift correction via the resampler.
        if let (Some(audio), Some(video)) = (ctx.audio_clock.read(), ctx.video_clock.read()) {
            let ratio = correction.update(audio - video);
            ctx.set_resample_correction(ratio);
        }

        if since_diag_ms >= ctx.cfg.diagnostic_period_ms {
            since_diag_ms = 0;
            let audio = ctx.audio_clock.read();
            let video = ctx.video_clock.read();
            let snapshot = DiagnosticSnapshot {
                master: ctx.selector.current().as_str(),
                audio_clock: audio,
                video_clock: video,
                drift: match (audio, video) {
                    (Some(a), Some(v)) => Some(v - a),
                    _ => None,
                },
                audio_stalled,
                audio_healthy: ctx.has_audio
                    && ctx.audio_state.get() == AudioState::Playing
                    && !audio_stalled
                    && audio.is_some(),
                recovering: ctx.selector.recovering(),
            };
            ctx.events.emit(PlayerEvent::Diagnostic(snapshot));
        }
    }
}

pub(crate) fn run_seek(ctx: Arc<PlayerContext>) {
    let poll = Duration::from_millis(100);
    loop {
        if sleep_with_abort(&ctx, poll) {
            break;
        }
        if !ctx.seek.in_progress() {
            continue;
        }
        let elapsed_us = monotonic_us() - ctx.seek.started_us();
        if elapsed_us > ctx.cfg.seek_timeout_ms * 1000 {
            warn!(
                "seek stuck for {} ms without a first frame, forcing reset",
                elapsed_us / 1000
            );
            seek::force_end_seek(&ctx);
        }
    }
}
