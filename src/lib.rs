//! Native media playback core with adaptive A/V synchronization.
//!
//! `tern` decodes a container of interleaved video and audio through a thin
//! FFmpeg shell and keeps the two streams in perceptual sync. The heart of
//! the crate is the synchronization engine: a pair of PTS-derived media
//! clocks, a lock-free authorization gate, a master selector with
//! hysteresis, a drift controller with staged recovery, an epoch-based seek
//! protocol, and watchdogs that guarantee playback never hangs: the worst
//! observable state is silent video or a frozen frame with a live audio
//! clock.
//!
//! Presentation and PCM output stay behind the [`video::VideoSurface`] and
//! [`audio::AudioSink`] traits; the crate ships a cpal sink and hosts bring
//! their own surface. Events reach the host through a callback registered
//! at construction; the engine holds no reference back into the host.

pub mod audio;
pub mod clock;
pub mod core;
pub mod media;
pub mod playback;
pub mod queue;
pub mod sync;
pub mod video;

pub use crate::audio::{AudioSink, AudioState, CpalSink, SinkError, SinkPlayState};
pub use crate::core::config::PlayerConfig;
pub use crate::core::error::PlayerError;
pub use crate::core::events::{DiagnosticSnapshot, EventCallback, PlayerEvent};
pub use crate::media::source::{
    AudioDecoder, AudioFrame, Demuxer, MediaPacket, SourceParts, StreamsInfo, VideoDecoder,
    VideoFrame,
};
pub use crate::playback::{PlaybackState, Player, RepeatMode};
pub use crate::video::VideoSurface;
