//! Bounded, abortable queues carrying compressed packets and decoded frames.

mod bounded;

pub use bounded::{BoundedQueue, PopResult, PushOutcome};

use crate::media::source::{AudioFrame, MediaPacket, VideoFrame};

/// Per-stream queue of undecoded compressed units.
pub type PacketQueue = BoundedQueue<MediaPacket>;

/// Queue of decoded audio frames awaiting the render loop.
pub type AudioFrameQueue = BoundedQueue<AudioFrame>;

/// Queue of decoded video frames awaiting the render loop.
pub type VideoFrameQueue = BoundedQueue<VideoFrame>;
