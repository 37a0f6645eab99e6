//! Audio path: sink contract, cpal implementation, state machine, workers.

pub mod cpal_sink;
pub(crate) mod decode;
pub(crate) mod render;
pub mod sink;
pub mod state;

pub use cpal_sink::CpalSink;
pub use sink::{AudioSink, SinkError, SinkPlayState};
pub use state::{AudioState, AudioTrigger};
