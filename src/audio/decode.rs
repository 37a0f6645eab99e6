//! Audio decode worker.
//!
//! Pops compressed packets, decodes and resamples them, and feeds the audio
//! frame queue. The resample ratio folds playback speed and drift
//! correction together; epoch changes flush the codec so no stale frames
//! cross a seek.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::core::error::PlayerError;
use crate::media::source::AudioDecoder;
use crate::playback::context::PlayerContext;
use crate::queue::{PopResult, PushOutcome};

pub(crate) fn run(ctx: Arc<PlayerContext>, mut decoder: Box<dyn AudioDecoder>) {
    let mut decoder_epoch = 0u64;
    let mut drained = false;
    let mut consecutive_errors = 0u32;
    let mut last_ratio = 1.0f64;

    debug!("audio decode worker up");
    loop {
        if ctx.is_aborted() {
            break;
        }

        let ratio = ctx.resample_correction() / ctx.speed();
        if (ratio - last_ratio).abs() > f64::EPSILON {
            decoder.set_resample_ratio(ratio);
            last_ratio = ratio;
        }

        match ctx.audio_packets.pop_timeout(Duration::from_millis(100)) {
            PopResult::Aborted => break,
            PopResult::TimedOut => {
                if ctx.demux_eof.load(Ordering::Relaxed)
                    && ctx.audio_packets.is_empty()
                    && !drained
                {
                    let epoch = ctx.seek.epoch();
                    match decoder.drain() {
                        Ok(frames) => {
                            for frame in frames {
                                if ctx.audio_frames.push(frame, epoch) == PushOutcome::Aborted {
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!("audio drain failed: {e}"),
                    }
                    drained = true;
                    ctx.audio_decode_eof.store(true, Ordering::Relaxed);
                    debug!("audio decode reached end of stream");
                }
            }
            PopResult::Item(packet, epoch) => {
                if epoch > decoder_epoch {
                    decoder.flush();
                    decoder_epoch = epoch;
                    drained = false;
                }
                if epoch < ctx.seek.epoch() {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(frames) => {
                        consecutive_errors = 0;
                        for frame in frames {
                            if ctx.audio_frames.push(frame, epoch) == PushOutcome::Aborted {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        // Per-packet failures are dropped and counted; only
                        // a run of them surfaces.
                        consecutive_errors += 1;
                        if consecutive_errors == ctx.cfg.decode_error_limit {
                            ctx.events.error(PlayerError::DecodeAudio(e.to_string()));
                        }
                    }
                }
            }
        }
    }
    debug!("audio decode worker down");
}
