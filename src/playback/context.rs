//! The shared player context.
//!
//! One context per player instance, created before the workers and passed to
//! each at spawn. It owns the gate, the clocks, the queues, the seek state
//! and the sink handle; there is no process-wide state and no back-pointers.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use crossbeam::channel;

use crate::audio::sink::AudioSink;
use crate::audio::state::{AudioState, AudioStateCell, AudioTrigger};
use crate::clock::{AudioClock, VideoClock};
use crate::core::config::PlayerConfig;
use crate::core::events::{EventHub, PlayerEvent};
use crate::core::time::{monotonic_us, secs_to_ms};
use crate::playback::seek::SeekState;
use crate::playback::state::RepeatMode;
use crate::queue::{AudioFrameQueue, PacketQueue, VideoFrameQueue};
use crate::sync::{AvSyncGate, MasterKind, MasterSelector, SelectorInputs};

/// Control messages for the demux thread.
#[derive(Debug, Clone, Copy)]
pub(crate) enum DemuxCommand {
    Seek { target_sec: f64 },
}

pub(crate) struct PlayerContext {
    pub cfg: PlayerConfig,
    pub events: EventHub,

    pub gate: AvSyncGate,
    pub audio_clock: AudioClock,
    pub video_clock: VideoClock,
    pub selector: MasterSelector,
    pub seek: SeekState,

    pub audio_packets: PacketQueue,
    pub video_packets: PacketQueue,
    pub audio_frames: AudioFrameQueue,
    pub video_frames: VideoFrameQueue,

    pub audio_state: AudioStateCell,
    pub sink: Option<Mutex<Box<dyn AudioSink>>>,
    pub demux_ctl: channel::Sender<DemuxCommand>,

    pub has_audio: bool,
    pub has_video: bool,

    pub abort: AtomicBool,
    pub paused: AtomicBool,
    pub shutting_down: AtomicBool,
    pub demux_eof: AtomicBool,
    pub audio_decode_eof: AtomicBool,
    pub audio_render_eof: AtomicBool,
    pub video_eof: AtomicBool,
    pub completed_emitted: AtomicBool,
    pub waiting_first_frame_after_seek: AtomicBool,
    /// Set by the watchdogs to make the video loop run a hard reset.
    pub force_video_reset: AtomicBool,

    speed_bits: AtomicU64,
    resample_correction_bits: AtomicU64,
    repeat: AtomicU8,
    pub last_position_ms: AtomicI64,
}

impl PlayerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: PlayerConfig,
        events: EventHub,
        sink: Option<Box<dyn AudioSink>>,
        demux_ctl: channel::Sender<DemuxCommand>,
        has_audio: bool,
        has_video: bool,
    ) -> Self {
        let packet_cap = cfg.packet_queue_capacity;
        let frame_cap = cfg.frame_queue_capacity;
        Self {
            events,
            gate: AvSyncGate::new(),
            audio_clock: AudioClock::new(),
            video_clock: VideoClock::new(),
            selector: MasterSelector::new(),
            seek: SeekState::new(),
            audio_packets: PacketQueue::new(packet_cap),
            video_packets: PacketQueue::new(packet_cap),
            audio_frames: AudioFrameQueue::new(frame_cap),
            video_frames: VideoFrameQueue::new(frame_cap),
            audio_state: AudioStateCell::new(AudioState::NoAudio),
            sink: sink.map(Mutex::new),
            demux_ctl,
            has_audio,
            has_video,
            abort: AtomicBool::new(false),
            paused: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
            demux_eof: AtomicBool::new(false),
            audio_decode_eof: AtomicBool::new(false),
            audio_render_eof: AtomicBool::new(false),
            video_eof: AtomicBool::new(false),
            completed_emitted: AtomicBool::new(false),
            waiting_first_frame_after_seek: AtomicBool::new(false),
            force_video_reset: AtomicBool::new(false),
            speed_bits: AtomicU64::new(1f64.to_bits()),
            resample_correction_bits: AtomicU64::new(1f64.to_bits()),
            repeat: AtomicU8::new(RepeatMode::Off as u8),
            last_position_ms: AtomicI64::new(0),
            cfg,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn speed(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    pub fn set_speed_value(&self, rate: f64) {
        self.speed_bits.store(rate.to_bits(), Ordering::Relaxed);
    }

    /// Resample ratio component coming from drift correction.
    pub fn resample_correction(&self) -> f64 {
        f64::from_bits(self.resample_correction_bits.load(Ordering::Relaxed))
    }

    pub fn set_resample_correction(&self, ratio: f64) {
        self.resample_correction_bits
            .store(ratio.to_bits(), Ordering::Relaxed);
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        RepeatMode::from_u8(self.repeat.load(Ordering::Relaxed))
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) {
        self.repeat.store(mode as u8, Ordering::Relaxed);
    }

    /// Apply a trigger to the audio state machine, emitting the transition
    /// event when it fires.
    pub fn audio_state_apply(&self, trigger: AudioTrigger) -> Option<AudioState> {
        let next = self.audio_state.apply(trigger)?;
        self.events.emit(PlayerEvent::AudioState(next));
        Some(next)
    }

    /// Value of the currently selected master clock.
    pub fn master_clock(&self) -> Option<f64> {
        match self.selector.current() {
            MasterKind::Audio => self.audio_clock.read(),
            MasterKind::Video => self.video_clock.read(),
            MasterKind::None => None,
        }
    }

    /// Fresh liveness sample for the master selector.
    pub fn selector_inputs(&self) -> SelectorInputs {
        let now = monotonic_us();
        let audio_clock = if self.has_audio
            && self.audio_state.get() == AudioState::Playing
            && !self
                .audio_clock
                .is_stalled(now, self.cfg.audio_stall_sec)
        {
            self.audio_clock.read()
        } else {
            None
        };
        let video_clock = if self
            .video_clock
            .is_stalled(now, self.cfg.video_stall_sec)
        {
            None
        } else {
            self.video_clock.read()
        };
        SelectorInputs {
            has_audio: self.has_audio,
            audio_clock,
            video_clock,
        }
    }

    /// Re-run master selection against current clock liveness.
    pub fn reselect_master(&self) -> MasterKind {
        self.selector.evaluate(&self.gate, self.selector_inputs())
    }

    /// Record the most recent authoritative position.
    pub fn note_position(&self, pts_sec: f64) {
        if pts_sec.is_finite() {
            self.last_position_ms
                .store(secs_to_ms(pts_sec), Ordering::Relaxed);
        }
    }

    pub fn last_position(&self) -> i64 {
        self.last_position_ms.load(Ordering::Relaxed)
    }

    /// Abort every queue and wake all workers. Part of release.
    pub fn abort_all(&self) {
        self.abort.store(true, Ordering::Relaxed);
        self.audio_packets.abort();
        self.video_packets.abort();
        self.audio_frames.abort();
        self.video_frames.abort();
    }

    /// Check for end of playback; emits `completed` once, or restarts the
    /// source when repeat is on.
    pub fn maybe_completed(&self) {
        if self.seek.in_progress() || self.is_aborted() {
            return;
        }
        let audio_done = !self.has_audio || self.audio_render_eof.load(Ordering::Relaxed);
        let video_done = !self.has_video || self.video_eof.load(Ordering::Relaxed);
        if !(audio_done && video_done) {
            return;
        }
        match self.repeat_mode() {
            RepeatMode::Off => {
                if !self.completed_emitted.swap(true, Ordering::AcqRel) {
                    self.events.emit(PlayerEvent::Completed);
                }
            }
            RepeatMode::One | RepeatMode::All => {
                crate::playback::seek::request_seek(self, 0, false);
            }
        }
    }

    /// Clear per-stream EOF latches (after seek).
    pub fn clear_eof(&self) {
        self.demux_eof.store(false, Ordering::Relaxed);
        self.audio_decode_eof.store(false, Ordering::Relaxed);
        self.audio_render_eof.store(false, Ordering::Relaxed);
        self.video_eof.store(false, Ordering::Relaxed);
        self.completed_emitted.store(false, Ordering::Relaxed);
    }
}
