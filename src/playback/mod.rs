//! Player assembly: context, seek protocol, workers, watchdogs, control
//! surface.

pub(crate) mod context;
pub(crate) mod demux;
pub mod player;
pub mod seek;
pub mod state;
pub(crate) mod watchdog;

pub use player::Player;
pub use state::{PlaybackState, RepeatMode};
