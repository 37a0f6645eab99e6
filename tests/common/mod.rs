//! Scripted fake collaborators for driving the engine end to end.
//!
//! The fake demuxer synthesizes an interleaved clip, the fake decoders turn
//! packets straight into frames, the fake sink drains PCM in real time with
//! a controllable liveness counter, and the fake surface records every
//! presented PTS.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tern::audio::sink::{AudioSink, SinkError, SinkPlayState};
use tern::media::source::{
    AudioDecoder, AudioFrame, AudioStreamInfo, DemuxEvent, Demuxer, MediaPacket, SourceError,
    SourceParts, StreamKind, StreamsInfo, VideoDecoder, VideoFrame, VideoStreamInfo,
};
use tern::video::VideoSurface;
use tern::{EventCallback, PlayerEvent};

pub const SAMPLE_RATE: u32 = 48_000;
pub const AUDIO_FRAME_SEC: f64 = 0.020;
pub const KEYFRAME_SEC: f64 = 0.25;

/// Shape of the synthesized clip.
#[derive(Clone)]
pub struct FakeClip {
    pub duration_sec: f64,
    pub fps: f64,
    pub has_audio: bool,
    pub has_video: bool,
    /// Artificial per-read delay, to make rapid-seek races deterministic.
    pub read_delay: Duration,
    /// One-shot decode stall: (pts at which to stall, how long).
    pub video_stall: Option<(f64, Duration)>,
}

impl FakeClip {
    pub fn av(duration_sec: f64) -> Self {
        Self {
            duration_sec,
            fps: 30.0,
            has_audio: true,
            has_video: true,
            read_delay: Duration::ZERO,
            video_stall: None,
        }
    }

    pub fn video_only(duration_sec: f64) -> Self {
        Self {
            has_audio: false,
            ..Self::av(duration_sec)
        }
    }

    pub fn audio_only(duration_sec: f64) -> Self {
        Self {
            has_video: false,
            ..Self::av(duration_sec)
        }
    }
}

struct FakeDemuxer {
    clip: FakeClip,
    audio_pos: f64,
    video_pos: f64,
}

impl Demuxer for FakeDemuxer {
    fn read(&mut self) -> Result<DemuxEvent, SourceError> {
        if !self.clip.read_delay.is_zero() {
            thread::sleep(self.clip.read_delay);
        }
        let audio_next = if self.clip.has_audio && self.audio_pos < self.clip.duration_sec {
            self.audio_pos
        } else {
            f64::INFINITY
        };
        let video_next = if self.clip.has_video && self.video_pos < self.clip.duration_sec {
            self.video_pos
        } else {
            f64::INFINITY
        };
        if audio_next.is_infinite() && video_next.is_infinite() {
            return Ok(DemuxEvent::Eof);
        }
        if audio_next <= video_next {
            let pts = self.audio_pos;
            self.audio_pos += AUDIO_FRAME_SEC;
            Ok(DemuxEvent::Packet(MediaPacket {
                stream: StreamKind::Audio,
                data: Vec::new(),
                pts_ticks: Some((pts * 1000.0).round() as i64),
                dts_ticks: None,
                keyframe: true,
            }))
        } else {
            let pts = self.video_pos;
            self.video_pos += 1.0 / self.clip.fps;
            let keyframe = (pts / KEYFRAME_SEC).fract().abs() < 1e-6;
            Ok(DemuxEvent::Packet(MediaPacket {
                stream: StreamKind::Video,
                data: Vec::new(),
                pts_ticks: Some((pts * 1000.0).round() as i64),
                dts_ticks: None,
                keyframe,
            }))
        }
    }

    fn seek(&mut self, target_sec: f64, _backward: bool) -> Result<(), SourceError> {
        let snapped = (target_sec / KEYFRAME_SEC).floor().max(0.0) * KEYFRAME_SEC;
        self.audio_pos = snapped;
        self.video_pos = snapped;
        Ok(())
    }
}

struct FakeAudioDecoder {
    ratio: f64,
}

impl AudioDecoder for FakeAudioDecoder {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<AudioFrame>, SourceError> {
        let pts = packet.pts_ticks.map(|t| t as f64 / 1000.0).unwrap_or(f64::NAN);
        let samples = (AUDIO_FRAME_SEC * SAMPLE_RATE as f64 * self.ratio).round() as usize;
        Ok(vec![AudioFrame {
            pcm: vec![0u8; samples * 4],
            pts,
            duration: AUDIO_FRAME_SEC,
            sample_rate: SAMPLE_RATE,
            channels: 2,
        }])
    }

    fn drain(&mut self) -> Result<Vec<AudioFrame>, SourceError> {
        Ok(Vec::new())
    }

    fn flush(&mut self) {}

    fn set_resample_ratio(&mut self, ratio: f64) {
        self.ratio = ratio;
    }

    fn output_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn output_channels(&self) -> u16 {
        2
    }
}

struct FakeVideoDecoder {
    fps: f64,
    stall: Option<(f64, Duration)>,
    stalled: bool,
}

impl VideoDecoder for FakeVideoDecoder {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<VideoFrame>, SourceError> {
        let pts = packet.pts_ticks.map(|t| t as f64 / 1000.0).unwrap_or(f64::NAN);
        if let Some((at, sleep)) = self.stall {
            if !self.stalled && pts >= at {
                self.stalled = true;
                thread::sleep(sleep);
            }
        }
        Ok(vec![VideoFrame {
            data: vec![0u8; 16],
            width: 2,
            height: 2,
            pts,
            duration: 1.0 / self.fps,
        }])
    }

    fn drain(&mut self) -> Result<Vec<VideoFrame>, SourceError> {
        Ok(Vec::new())
    }

    fn flush(&mut self) {}
}

/// Build `SourceParts` for a synthesized clip.
pub fn make_parts(clip: FakeClip) -> SourceParts {
    let info = StreamsInfo {
        audio: clip.has_audio.then(|| AudioStreamInfo {
            sample_rate: SAMPLE_RATE,
            channels: 2,
            codec: "fake-pcm".into(),
        }),
        video: clip.has_video.then(|| VideoStreamInfo {
            width: 2,
            height: 2,
            fps: clip.fps,
            codec: "fake-rgba".into(),
        }),
        duration_sec: clip.duration_sec,
    };
    let audio_decoder: Option<Box<dyn AudioDecoder>> = clip
        .has_audio
        .then(|| Box::new(FakeAudioDecoder { ratio: 1.0 }) as Box<dyn AudioDecoder>);
    let video_decoder: Option<Box<dyn VideoDecoder>> = clip.has_video.then(|| {
        Box::new(FakeVideoDecoder {
            fps: clip.fps,
            stall: clip.video_stall,
            stalled: false,
        }) as Box<dyn VideoDecoder>
    });
    SourceParts {
        info,
        demuxer: Box::new(FakeDemuxer {
            clip,
            audio_pos: 0.0,
            video_pos: 0.0,
        }),
        audio_decoder,
        video_decoder,
    }
}

struct FakeSinkShared {
    ring_samples: Mutex<usize>,
    capacity_samples: usize,
    frames_played: AtomicU64,
    frozen: AtomicBool,
    refuse_start: AtomicBool,
    state: Mutex<SinkPlayState>,
    alive: AtomicBool,
}

/// Real-time draining sink with a scriptable liveness counter.
pub struct FakeSink {
    shared: Arc<FakeSinkShared>,
    drain: Option<thread::JoinHandle<()>>,
    released: bool,
}

impl FakeSink {
    pub fn new() -> Self {
        // 200 ms of S16 stereo.
        let capacity_samples = SAMPLE_RATE as usize * 2 / 5;
        let shared = Arc::new(FakeSinkShared {
            ring_samples: Mutex::new(0),
            capacity_samples,
            frames_played: AtomicU64::new(0),
            frozen: AtomicBool::new(false),
            refuse_start: AtomicBool::new(false),
            state: Mutex::new(SinkPlayState::Stopped),
            alive: AtomicBool::new(true),
        });
        let drain_shared = Arc::clone(&shared);
        let drain = thread::spawn(move || {
            let step = Duration::from_millis(5);
            let samples_per_step = (SAMPLE_RATE as usize * 2) / 200;
            while drain_shared.alive.load(Ordering::Relaxed) {
                thread::sleep(step);
                if *drain_shared.state.lock().unwrap() != SinkPlayState::Playing {
                    continue;
                }
                let drained = {
                    let mut ring = drain_shared.ring_samples.lock().unwrap();
                    let take = (*ring).min(samples_per_step);
                    *ring -= take;
                    take
                };
                // A frozen counter models the device still consuming while
                // the driver's position readback is stuck.
                if drained > 0 && !drain_shared.frozen.load(Ordering::Relaxed) {
                    drain_shared
                        .frames_played
                        .fetch_add((drained / 2) as u64, Ordering::Relaxed);
                }
            }
        });
        Self {
            shared,
            drain: Some(drain),
            released: false,
        }
    }

    /// Control handle that stays valid after the sink moves into the
    /// player.
    pub fn script(&self) -> SinkScript {
        SinkScript(Arc::clone(&self.shared))
    }
}

/// Test-side control over the sink's scripted behavior.
#[derive(Clone)]
pub struct SinkScript(Arc<FakeSinkShared>);

impl SinkScript {
    /// Freeze or thaw the liveness counter; audio keeps draining either
    /// way.
    pub fn set_frozen(&self, frozen: bool) {
        self.0.frozen.store(frozen, Ordering::Relaxed);
    }

    pub fn set_refuse_start(&self, refuse: bool) {
        self.0.refuse_start.store(refuse, Ordering::Relaxed);
    }

    pub fn frames_played(&self) -> u64 {
        self.0.frames_played.load(Ordering::Relaxed)
    }
}

impl AudioSink for FakeSink {
    fn write(&mut self, pcm: &[u8]) -> Result<usize, SinkError> {
        if self.released {
            return Err(SinkError::Closed);
        }
        let mut ring = self.shared.ring_samples.lock().unwrap();
        let free = self.shared.capacity_samples.saturating_sub(*ring);
        let samples = (pcm.len() / 2).min(free);
        *ring += samples;
        Ok(samples * 2)
    }

    fn start(&mut self) -> bool {
        if self.shared.refuse_start.load(Ordering::Relaxed) {
            return false;
        }
        *self.shared.state.lock().unwrap() = SinkPlayState::Playing;
        true
    }

    fn pause(&mut self) {
        *self.shared.state.lock().unwrap() = SinkPlayState::Paused;
    }

    fn stop(&mut self) {
        *self.shared.state.lock().unwrap() = SinkPlayState::Stopped;
        *self.shared.ring_samples.lock().unwrap() = 0;
    }

    fn flush(&mut self) {
        *self.shared.ring_samples.lock().unwrap() = 0;
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.shared.alive.store(false, Ordering::Relaxed);
        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
        }
    }

    fn frames_played(&self) -> u64 {
        self.shared.frames_played.load(Ordering::Relaxed)
    }

    fn latency_ms(&self) -> i64 {
        (self.shared.capacity_samples as i64 / 2) * 1000 / SAMPLE_RATE as i64
    }

    fn play_state(&self) -> SinkPlayState {
        *self.shared.state.lock().unwrap()
    }
}

impl Drop for FakeSink {
    fn drop(&mut self) {
        self.release();
    }
}

/// Surface that records every presented PTS.
#[derive(Clone)]
pub struct FakeSurface {
    presents: Arc<Mutex<Vec<f64>>>,
    fail: Arc<AtomicBool>,
}

impl FakeSurface {
    pub fn new() -> Self {
        Self {
            presents: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn presents_handle(&self) -> Arc<Mutex<Vec<f64>>> {
        Arc::clone(&self.presents)
    }

    pub fn fail_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail)
    }
}

impl VideoSurface for FakeSurface {
    fn present(&mut self, frame: &tern::VideoFrame) -> bool {
        if self.fail.load(Ordering::Relaxed) {
            return false;
        }
        self.presents.lock().unwrap().push(frame.pts);
        true
    }
}

/// Thread-safe event recorder handed to the player as its callback.
#[derive(Clone)]
pub struct EventLog {
    events: Arc<Mutex<Vec<PlayerEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn callback(&self) -> EventCallback {
        let events = Arc::clone(&self.events);
        Box::new(move |event| {
            events.lock().unwrap().push(event.clone());
        })
    }

    pub fn snapshot(&self) -> Vec<PlayerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn error_tags(&self) -> Vec<&'static str> {
        self.snapshot()
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::Error(err) => Some(err.tag()),
                _ => None,
            })
            .collect()
    }

    pub fn audio_states(&self) -> Vec<&'static str> {
        self.snapshot()
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::AudioState(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn first_frame_pts(&self) -> Vec<f64> {
        self.snapshot()
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::FirstFrameAfterSeek { pts } => Some(*pts),
                _ => None,
            })
            .collect()
    }

    pub fn completed(&self) -> bool {
        self.snapshot()
            .iter()
            .any(|e| matches!(e, PlayerEvent::Completed))
    }

    pub fn last_diagnostic(&self) -> Option<tern::DiagnosticSnapshot> {
        self.snapshot()
            .iter()
            .rev()
            .find_map(|e| match e {
                PlayerEvent::Diagnostic(d) => Some(d.clone()),
                _ => None,
            })
    }

    /// Poll until `pred` holds over the snapshot, or the timeout expires.
    pub fn wait_for<F>(&self, timeout: Duration, pred: F) -> bool
    where
        F: Fn(&EventLog) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
