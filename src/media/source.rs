//! Collaborator contracts for demuxing and decoding.
//!
//! The sync engine does not care which library implements these. The crate
//! ships an FFmpeg implementation; tests drive the engine with scripted
//! fakes.

use crate::core::time::Pts;

/// Which elementary stream a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Video,
}

/// One undecoded compressed unit.
///
/// Timestamps stay in stream-timebase ticks until decode so no precision is
/// lost crossing the queue.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub stream: StreamKind,
    pub data: Vec<u8>,
    pub pts_ticks: Option<i64>,
    pub dts_ticks: Option<i64>,
    pub keyframe: bool,
}

/// What a demuxer read produced.
#[derive(Debug)]
pub enum DemuxEvent {
    Packet(MediaPacket),
    Eof,
}

/// Decoded audio: interleaved S16 stereo PCM.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pcm: Vec<u8>,
    pub pts: Pts,
    /// Media-time duration of the source frame in seconds.
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Decoded video: tightly packed RGBA8.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pts: Pts,
    /// Nominal frame duration in seconds (from the stream frame rate).
    pub duration: f64,
}

#[derive(Debug, Clone)]
pub struct AudioStreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub codec: String,
}

#[derive(Debug, Clone)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
}

/// Streams discovered in the container.
#[derive(Debug, Clone, Default)]
pub struct StreamsInfo {
    pub audio: Option<AudioStreamInfo>,
    pub video: Option<VideoStreamInfo>,
    pub duration_sec: f64,
}

/// Errors from the demux/decode shell.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("open failed: {0}")]
    Open(String),
    #[error("no playable streams")]
    NoStreams,
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("seek failed: {0}")]
    Seek(String),
}

/// Pull-based packet reader. Owned by the demux thread.
pub trait Demuxer: Send {
    fn read(&mut self) -> Result<DemuxEvent, SourceError>;

    /// Reposition to the nearest keyframe at or before `target_sec` when
    /// `backward` is set.
    fn seek(&mut self, target_sec: f64, backward: bool) -> Result<(), SourceError>;
}

/// Audio decoder + resampler. Owned by the audio decode thread.
pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<AudioFrame>, SourceError>;

    /// Drain buffered frames at end of stream.
    fn drain(&mut self) -> Result<Vec<AudioFrame>, SourceError>;

    /// Discard codec state after a seek.
    fn flush(&mut self);

    /// Scale the output sample count: > 1.0 stretches audio (more samples
    /// per input frame), < 1.0 shrinks it. Callers fold playback speed and
    /// drift correction into one ratio.
    fn set_resample_ratio(&mut self, ratio: f64);

    fn output_rate(&self) -> u32;
    fn output_channels(&self) -> u16;
}

/// Video decoder. Owned by the video render thread.
pub trait VideoDecoder: Send {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<VideoFrame>, SourceError>;
    fn drain(&mut self) -> Result<Vec<VideoFrame>, SourceError>;
    fn flush(&mut self);
}

/// Everything `open` hands to the player: stream facts plus the per-thread
/// collaborator handles.
pub struct SourceParts {
    pub info: StreamsInfo,
    pub demuxer: Box<dyn Demuxer>,
    pub audio_decoder: Option<Box<dyn AudioDecoder>>,
    pub video_decoder: Option<Box<dyn VideoDecoder>>,
}
