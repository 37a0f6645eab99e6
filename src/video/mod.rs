//! Video path: surface contract and render loop.

pub(crate) mod render;
pub mod surface;

pub use surface::VideoSurface;
