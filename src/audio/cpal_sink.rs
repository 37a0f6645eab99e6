//! cpal-backed PCM sink.
//!
//! The cpal stream is not `Send`, so it lives on a keeper thread that
//! processes start/pause/stop commands; writes go through a shared ring the
//! device callback drains. The callback also advances the frames-played
//! counter, the liveness signal the engine watches.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel;
use log::{error, info, warn};

use crate::audio::sink::{AudioSink, SinkError, SinkPlayState};

const STATE_STOPPED: u8 = 0;
const STATE_PAUSED: u8 = 1;
const STATE_PLAYING: u8 = 2;

struct SinkShared {
    ring: Mutex<VecDeque<i16>>,
    capacity_samples: usize,
    frames_played: AtomicU64,
    state: AtomicU8,
    channels: u16,
}

enum SinkCmd {
    Start(channel::Sender<bool>),
    Pause,
    Shutdown,
}

/// PCM sink over the default cpal output device.
pub struct CpalSink {
    shared: Arc<SinkShared>,
    ctl: Option<channel::Sender<SinkCmd>>,
    keeper: Option<thread::JoinHandle<()>>,
    latency_ms: i64,
    released: bool,
}

impl CpalSink {
    /// Open the default output device for interleaved S16 input at
    /// `sample_rate`/`channels`, buffering up to `buffer_bytes`.
    pub fn open(sample_rate: u32, channels: u16, buffer_bytes: usize) -> Result<Self, SinkError> {
        let capacity_samples = (buffer_bytes / 2).max(channels as usize);
        let shared = Arc::new(SinkShared {
            ring: Mutex::new(VecDeque::with_capacity(capacity_samples)),
            capacity_samples,
            frames_played: AtomicU64::new(0),
            state: AtomicU8::new(STATE_STOPPED),
            channels,
        });

        let frames = capacity_samples as i64 / channels.max(1) as i64;
        let latency_ms = frames * 1000 / sample_rate.max(1) as i64;

        let (ctl_tx, ctl_rx) = channel::unbounded();
        let (ready_tx, ready_rx) = channel::bounded(1);
        let keeper_shared = Arc::clone(&shared);
        let keeper = thread::Builder::new()
            .name("tern-sink".into())
            .spawn(move || keeper_main(keeper_shared, sample_rate, channels, ctl_rx, ready_tx))
            .map_err(|e| SinkError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(msg)) => {
                let _ = keeper.join();
                return Err(SinkError::Device(msg));
            }
            Err(_) => {
                let _ = keeper.join();
                return Err(SinkError::Device("sink thread died during init".into()));
            }
        }

        info!(
            "cpal sink open: {sample_rate} Hz, {channels} ch, latency ~{latency_ms} ms"
        );

        Ok(Self {
            shared,
            ctl: Some(ctl_tx),
            keeper: Some(keeper),
            latency_ms,
            released: false,
        })
    }
}

fn keeper_main(
    shared: Arc<SinkShared>,
    sample_rate: u32,
    channels: u16,
    ctl: channel::Receiver<SinkCmd>,
    ready: channel::Sender<Result<(), String>>,
) {
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(d) => d,
        None => {
            let _ = ready.send(Err("no audio output device".into()));
            return;
        }
    };
    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let cb_shared = Arc::clone(&shared);
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let playing = cb_shared.state.load(Ordering::Relaxed) == STATE_PLAYING;
            if !playing {
                data.fill(0.0);
                return;
            }
            let mut ring = cb_shared.ring.lock().unwrap();
            let mut consumed = 0usize;
            for slot in data.iter_mut() {
                match ring.pop_front() {
                    Some(sample) => {
                        *slot = sample as f32 / 32768.0;
                        consumed += 1;
                    }
                    None => *slot = 0.0,
                }
            }
            drop(ring);
            if consumed > 0 {
                let frames = (consumed / cb_shared.channels.max(1) as usize) as u64;
                cb_shared.frames_played.fetch_add(frames, Ordering::Relaxed);
            }
        },
        |err| error!("cpal stream error: {err}"),
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    for cmd in ctl.iter() {
        match cmd {
            SinkCmd::Start(ack) => {
                let ok = stream.play().is_ok();
                if ok {
                    shared.state.store(STATE_PLAYING, Ordering::Relaxed);
                } else {
                    warn!("cpal stream refused to start");
                }
                let _ = ack.send(ok);
            }
            SinkCmd::Pause => {
                shared.state.store(STATE_PAUSED, Ordering::Relaxed);
                if let Err(e) = stream.pause() {
                    warn!("cpal pause failed: {e}");
                }
            }
            SinkCmd::Shutdown => break,
        }
    }
    drop(stream);
}

impl AudioSink for CpalSink {
    fn write(&mut self, pcm: &[u8]) -> Result<usize, SinkError> {
        if self.released {
            return Err(SinkError::Closed);
        }
        let mut ring = self.shared.ring.lock().unwrap();
        let free = self.shared.capacity_samples.saturating_sub(ring.len());
        let samples = (pcm.len() / 2).min(free);
        for chunk in pcm[..samples * 2].chunks_exact(2) {
            ring.push_back(i16::from_le_bytes([chunk[0], chunk[1]]));
        }
        Ok(samples * 2)
    }

    fn start(&mut self) -> bool {
        let Some(ctl) = &self.ctl else { return false };
        let (ack_tx, ack_rx) = channel::bounded(1);
        if ctl.send(SinkCmd::Start(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv().unwrap_or(false)
    }

    fn pause(&mut self) {
        if let Some(ctl) = &self.ctl {
            let _ = ctl.send(SinkCmd::Pause);
        }
    }

    fn stop(&mut self) {
        self.pause();
        self.flush();
        self.shared.state.store(STATE_STOPPED, Ordering::Relaxed);
    }

    fn flush(&mut self) {
        self.shared.ring.lock().unwrap().clear();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(ctl) = self.ctl.take() {
            let _ = ctl.send(SinkCmd::Shutdown);
        }
        if let Some(keeper) = self.keeper.take() {
            let _ = keeper.join();
        }
    }

    fn frames_played(&self) -> u64 {
        self.shared.frames_played.load(Ordering::Relaxed)
    }

    fn latency_ms(&self) -> i64 {
        self.latency_ms
    }

    fn play_state(&self) -> SinkPlayState {
        match self.shared.state.load(Ordering::Relaxed) {
            STATE_PLAYING => SinkPlayState::Playing,
            STATE_PAUSED => SinkPlayState::Paused,
            _ => SinkPlayState::Stopped,
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.release();
    }
}
