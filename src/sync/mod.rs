//! The synchronization authority: gate, master selection, drift control.

pub mod drift;
pub mod gate;
pub mod master;

pub use drift::{DriftAction, DriftController, ResampleCorrection};
pub use gate::{AvSyncGate, MasterKind};
pub use master::{MasterSelector, SelectorInputs};
