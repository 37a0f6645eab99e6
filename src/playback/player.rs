//! The player: context ownership, worker lifecycle, control surface.
//!
//! One context per player instance, passed to every worker at spawn. The
//! fixed thread set is demux, audio-decode, audio-render, video-render and
//! the two watchdogs; shutdown joins them in that order behind
//! (started, joined) guards so a double join is impossible.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel;
use log::{info, warn};

use crate::audio;
use crate::audio::sink::AudioSink;
use crate::audio::state::{AudioState, AudioTrigger};
use crate::core::config::PlayerConfig;
use crate::core::error::PlayerError;
use crate::core::events::{EventCallback, EventHub, PlayerEvent};
use crate::core::time::secs_to_ms;
use crate::media::source::{SourceError, SourceParts};
use crate::playback::context::PlayerContext;
use crate::playback::seek::request_seek;
use crate::playback::state::{PlaybackState, RepeatMode};
use crate::playback::{demux, watchdog};
use crate::video;
use crate::video::surface::VideoSurface;

/// Join guard for one worker thread. The (started, joined) pair makes a
/// double join impossible.
struct WorkerHandle {
    name: &'static str,
    started: bool,
    joined: bool,
    handle: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            started: false,
            joined: false,
            handle: None,
        }
    }

    fn spawn<F>(&mut self, f: F) -> Result<(), PlayerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("tern-{}", self.name))
            .spawn(f)
            .map_err(|e| PlayerError::Internal(format!("spawn {}: {e}", self.name)))?;
        self.handle = Some(handle);
        self.started = true;
        Ok(())
    }

    fn join(&mut self) {
        if !self.started || self.joined {
            return;
        }
        self.joined = true;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("worker {} panicked", self.name);
            }
        }
    }
}

struct Workers {
    audio_render: WorkerHandle,
    audio_decode: WorkerHandle,
    video_render: WorkerHandle,
    demux: WorkerHandle,
    sync_watchdog: WorkerHandle,
    seek_watchdog: WorkerHandle,
}

impl Workers {
    fn new() -> Self {
        Self {
            audio_render: WorkerHandle::new("audio-render"),
            audio_decode: WorkerHandle::new("audio-decode"),
            video_render: WorkerHandle::new("video-render"),
            demux: WorkerHandle::new("demux"),
            sync_watchdog: WorkerHandle::new("sync-watchdog"),
            seek_watchdog: WorkerHandle::new("seek-watchdog"),
        }
    }
}

fn map_source_error(e: SourceError) -> PlayerError {
    match e {
        SourceError::NoStreams => PlayerError::NoStreams,
        SourceError::UnsupportedCodec(c) => PlayerError::UnsupportedCodec(c),
        SourceError::Open(m) | SourceError::Decode(m) | SourceError::Seek(m) => {
            PlayerError::OpenFailed(m)
        }
    }
}

/// A prepared media player. Workers spawn at construction and idle paused;
/// `play` opens the tap.
pub struct Player {
    ctx: Arc<PlayerContext>,
    workers: Workers,
    state: Mutex<PlaybackState>,
    released: bool,
}

impl Player {
    /// Open `path` through the FFmpeg shell with a cpal sink and start the
    /// worker set.
    pub fn prepare<P: AsRef<Path>>(
        path: P,
        surface: Box<dyn VideoSurface>,
        callback: Option<EventCallback>,
        cfg: PlayerConfig,
    ) -> Result<Self, PlayerError> {
        let parts = crate::media::ffmpeg::open(path.as_ref()).map_err(map_source_error)?;

        let sink: Option<Box<dyn AudioSink>> = match &parts.info.audio {
            Some(audio_info) => {
                // ~200 ms of S16 stereo.
                let buffer_bytes = audio_info.sample_rate as usize * 2 * 2 / 5;
                match audio::CpalSink::open(audio_info.sample_rate, 2, buffer_bytes) {
                    Ok(sink) => Some(Box::new(sink)),
                    Err(e) => {
                        warn!("audio sink unavailable, playing silent: {e}");
                        None
                    }
                }
            }
            None => None,
        };

        Self::prepare_with(parts, sink, surface, callback, cfg)
    }

    /// Assemble a player from explicit collaborators. This is the seam the
    /// integration tests drive with scripted fakes.
    pub fn prepare_with(
        parts: SourceParts,
        sink: Option<Box<dyn AudioSink>>,
        surface: Box<dyn VideoSurface>,
        callback: Option<EventCallback>,
        cfg: PlayerConfig,
    ) -> Result<Self, PlayerError> {
        let SourceParts {
            info,
            demuxer,
            audio_decoder,
            video_decoder,
        } = parts;

        if audio_decoder.is_none() && video_decoder.is_none() {
            return Err(PlayerError::NoStreams);
        }

        let has_audio_stream = audio_decoder.is_some();
        let audio_usable = has_audio_stream && sink.is_some();
        let has_video = video_decoder.is_some();
        let audio_decoder = if audio_usable { audio_decoder } else { None };

        let (demux_tx, demux_rx) = channel::unbounded();
        let hub = EventHub::new(callback);
        let ctx = Arc::new(PlayerContext::new(
            cfg,
            hub,
            if audio_usable { sink } else { None },
            demux_tx,
            audio_usable,
            has_video,
        ));

        if has_audio_stream {
            ctx.audio_state_apply(AudioTrigger::StreamFound);
            if audio_usable {
                ctx.audio_state_apply(AudioTrigger::SinkOpened);
                let latency_ms = ctx.sink.as_ref().unwrap().lock().unwrap().latency_ms();
                let latency_sec = if latency_ms > 0 {
                    latency_ms as f64 / 1000.0
                } else {
                    ctx.cfg.latency_fallback_sec
                };
                ctx.audio_clock.set_latency(latency_sec);
            } else {
                ctx.audio_state_apply(AudioTrigger::Fatal);
                ctx.events
                    .error(PlayerError::AudioDead("no usable audio sink".into()));
            }
        } else {
            // Sources without audio still announce the track state once.
            ctx.events.emit(PlayerEvent::AudioState(AudioState::NoAudio));
        }

        // Establish the initial master (video, possibly idle) so the gate
        // has an answer before the first frame.
        ctx.reselect_master();
        ctx.events.emit(PlayerEvent::Prepared);
        info!(
            "prepared: audio={} video={} duration={:.2}s",
            ctx.has_audio, ctx.has_video, info.duration_sec
        );

        let mut workers = Workers::new();
        {
            let ctx = Arc::clone(&ctx);
            workers
                .demux
                .spawn(move || demux::run(ctx, demuxer, demux_rx))?;
        }
        if let Some(decoder) = audio_decoder {
            let ctx_decode = Arc::clone(&ctx);
            workers
                .audio_decode
                .spawn(move || audio::decode::run(ctx_decode, decoder))?;
            let ctx_render = Arc::clone(&ctx);
            workers
                .audio_render
                .spawn(move || audio::render::run(ctx_render))?;
        }
        if let Some(decoder) = video_decoder {
            let ctx_video = Arc::clone(&ctx);
            workers
                .video_render
                .spawn(move || video::render::run(ctx_video, decoder, surface))?;
        }
        {
            let ctx = Arc::clone(&ctx);
            workers.sync_watchdog.spawn(move || watchdog::run_sync(ctx))?;
        }
        {
            let ctx = Arc::clone(&ctx);
            workers.seek_watchdog.spawn(move || watchdog::run_seek(ctx))?;
        }

        Ok(Self {
            ctx,
            workers,
            state: Mutex::new(PlaybackState::Paused),
            released: false,
        })
    }

    /// Start or resume playback.
    pub fn play(&self) {
        if self.released {
            return;
        }
        let was_paused = {
            let state = self.state.lock().unwrap();
            state.is_paused()
        };
        self.ctx
            .paused
            .store(false, std::sync::atomic::Ordering::Relaxed);

        if self.ctx.has_audio && self.ctx.audio_state.get() != AudioState::Dead {
            // The sink must not only accept start but actually report
            // itself playing; anything else is a dead device.
            let started = self
                .ctx
                .sink
                .as_ref()
                .map(|s| {
                    let mut sink = s.lock().unwrap();
                    sink.start() && sink.play_state() == crate::audio::SinkPlayState::Playing
                })
                .unwrap_or(false);
            if !started {
                // The sink refusing to start is fatal for audio, not for
                // playback: demote and keep rolling silently.
                warn!("audio sink refused to start");
                self.ctx.audio_state_apply(AudioTrigger::Fatal);
                self.ctx
                    .events
                    .error(PlayerError::AudioDead("sink refused to start".into()));
                self.ctx.selector.force_demote(
                    &self.ctx.gate,
                    "sink refused to start",
                    self.ctx.video_clock.read().is_some(),
                );
            } else if was_paused {
                // Resume demotes the track to re-prime the buffer.
                self.ctx.audio_state_apply(AudioTrigger::AppResume);
            }
        }

        // pause→play releases the hysteresis lock; the epoch is not bumped.
        self.ctx.selector.unlock("pause->play");
        self.ctx.reselect_master();
        *self.state.lock().unwrap() = PlaybackState::Running;
    }

    /// Pause playback, freezing both clocks legitimately.
    pub fn pause(&self) {
        if self.released {
            return;
        }
        self.ctx
            .paused
            .store(true, std::sync::atomic::Ordering::Relaxed);
        if let Some(sink) = &self.ctx.sink {
            sink.lock().unwrap().pause();
        }
        self.ctx.audio_state_apply(AudioTrigger::AppPause);
        *self.state.lock().unwrap() = PlaybackState::Paused;
    }

    /// Seek to `target_ms`. Rapid calls coalesce: the active seek finishes,
    /// then the newest pending target runs.
    pub fn seek(&self, target_ms: i64, exact: bool) {
        if self.released {
            return;
        }
        request_seek(&self.ctx, target_ms, exact);
    }

    /// Set the playback rate, clamped to the configured range.
    pub fn set_speed(&self, rate: f64) {
        let clamped = self.ctx.cfg.clamp_speed(rate);
        self.ctx.set_speed_value(clamped);
    }

    pub fn set_repeat(&self, mode: RepeatMode) {
        self.ctx.set_repeat_mode(mode);
    }

    /// Current position in milliseconds, derived from the master clock.
    pub fn position_ms(&self) -> i64 {
        match self.ctx.master_clock() {
            Some(clock) => secs_to_ms(clock),
            None => self.ctx.last_position(),
        }
    }

    pub fn playback_state(&self) -> PlaybackState {
        if self.released {
            return PlaybackState::Stopped;
        }
        if self
            .ctx
            .completed_emitted
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            return PlaybackState::Eof;
        }
        *self.state.lock().unwrap()
    }

    pub fn audio_state(&self) -> AudioState {
        self.ctx.audio_state.get()
    }

    /// The first fatal error, if one was recorded.
    pub fn fatal_error(&self) -> Option<PlayerError> {
        self.ctx.events.fatal()
    }

    /// Tear everything down. After this returns no worker thread is alive
    /// and no further event is emitted.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        info!("releasing player");
        self.ctx
            .shutting_down
            .store(true, std::sync::atomic::Ordering::Relaxed);
        self.ctx.abort_all();

        self.workers.audio_render.join();
        self.workers.audio_decode.join();
        self.workers.video_render.join();
        self.workers.demux.join();
        self.workers.sync_watchdog.join();
        self.workers.seek_watchdog.join();

        if let Some(sink) = &self.ctx.sink {
            sink.lock().unwrap().release();
        }
        self.ctx.events.close();
        *self.state.lock().unwrap() = PlaybackState::Stopped;
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.release();
    }
}
