//! Master clock selection.
//!
//! Audio is master only while it is demonstrably alive; otherwise video
//! drives. After the first valid choice the selection is locked so the
//! master cannot flip-flop during startup; it unlocks on seek, pause→play,
//! source change, or when the chosen master itself goes invalid. A switch is
//! soft: the outgoing master's value is recorded as the new comparison base
//! and no clock is reset.

use std::sync::Mutex;

use log::{error, info, warn};

use crate::sync::gate::{AvSyncGate, MasterKind};

/// Clock liveness as seen at one evaluation point.
///
/// `audio_clock` is `Some` only when the audio clock is valid, not stalled,
/// and the track is actually playing; `video_clock` is `Some` only when the
/// video clock is valid and not stalled. Encoding validity in the type keeps
/// "audio master with no usable audio clock" unrepresentable here.
#[derive(Debug, Clone, Copy)]
pub struct SelectorInputs {
    pub has_audio: bool,
    pub audio_clock: Option<f64>,
    pub video_clock: Option<f64>,
}

#[derive(Debug)]
struct SelectorState {
    master: MasterKind,
    locked: bool,
    sync_base: f64,
    recovering: bool,
}

/// Policy object choosing between the audio and video clocks.
pub struct MasterSelector {
    state: Mutex<SelectorState>,
}

impl MasterSelector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SelectorState {
                master: MasterKind::None,
                locked: false,
                sync_base: 0.0,
                recovering: false,
            }),
        }
    }

    pub fn current(&self) -> MasterKind {
        self.state.lock().unwrap().master
    }

    pub fn recovering(&self) -> bool {
        self.state.lock().unwrap().recovering
    }

    pub fn sync_base(&self) -> f64 {
        self.state.lock().unwrap().sync_base
    }

    /// Release the hysteresis lock (seek, pause→play, source change).
    pub fn unlock(&self, why: &str) {
        let mut s = self.state.lock().unwrap();
        if s.locked {
            s.locked = false;
            s.recovering = true;
            info!("master selection unlocked ({why})");
        }
    }

    /// Run the selection rules against fresh inputs and push the outcome
    /// into the gate. Returns the chosen master.
    pub fn evaluate(&self, gate: &AvSyncGate, inputs: SelectorInputs) -> MasterKind {
        let mut s = self.state.lock().unwrap();

        let desired = if !inputs.has_audio {
            MasterKind::Video
        } else if inputs.audio_clock.is_some() {
            MasterKind::Audio
        } else {
            MasterKind::Video
        };

        if s.locked {
            let current_invalid = match s.master {
                MasterKind::Audio => inputs.audio_clock.is_none(),
                MasterKind::Video => inputs.video_clock.is_none() && inputs.has_audio,
                MasterKind::None => true,
            };
            if !current_invalid {
                // Locked and healthy: keep the current master regardless of
                // what the rules would now prefer.
                self.apply_validity(gate, &mut s, inputs);
                return s.master;
            }
            warn!(
                "locked {} master became invalid, re-selecting",
                s.master.as_str()
            );
            s.locked = false;
            s.recovering = true;
        }

        if s.master != desired {
            let base = match s.master {
                MasterKind::Audio => inputs.audio_clock,
                MasterKind::Video => inputs.video_clock,
                MasterKind::None => None,
            };
            if let Some(base) = base {
                s.sync_base = base;
            }
            info!(
                "master switch {} -> {} (sync_base={:.3})",
                s.master.as_str(),
                desired.as_str(),
                s.sync_base
            );
            s.master = desired;
            gate.set_master(desired);
        }
        s.locked = true;
        s.recovering = false;

        self.apply_validity(gate, &mut s, inputs);
        s.master
    }

    fn apply_validity(&self, gate: &AvSyncGate, s: &mut SelectorState, inputs: SelectorInputs) {
        let usable = match s.master {
            MasterKind::Audio => inputs.audio_clock.is_some(),
            // Idle video is allowed before the first frame when there is no
            // audio to defer to.
            MasterKind::Video => inputs.video_clock.is_some() || !inputs.has_audio,
            MasterKind::None => false,
        };
        if usable {
            gate.set_valid();
        } else if gate.master_valid() {
            gate.invalidate("no usable master clock");
        }
    }

    /// Enforce the selection invariants against a fresh sample. In debug
    /// builds a violation aborts; in release the master is force-demoted to
    /// video and the gate invalidated. Returns true when a violation was
    /// found.
    pub fn check_invariants(&self, gate: &AvSyncGate, inputs: SelectorInputs) -> bool {
        let violated = {
            let s = self.state.lock().unwrap();
            s.master == MasterKind::Audio && inputs.audio_clock.is_none()
        };
        if violated {
            debug_assert!(false, "audio master without a usable audio clock");
            error!("audio master without a usable audio clock, demoting");
            self.force_demote(gate, "audio master invalid", inputs.video_clock.is_some());
        }
        violated
    }

    /// Immediately demote to video master (stall, device death). The gate
    /// stays open only if the video clock can carry scheduling.
    pub fn force_demote(&self, gate: &AvSyncGate, reason: &str, video_usable: bool) {
        let mut s = self.state.lock().unwrap();
        if s.master != MasterKind::Video {
            warn!("forced demotion to video master: {reason}");
        }
        s.master = MasterKind::Video;
        s.locked = true;
        s.recovering = true;
        gate.set_master(MasterKind::Video);
        if video_usable {
            gate.set_valid();
        } else {
            gate.invalidate(reason);
        }
    }
}

impl Default for MasterSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(has_audio: bool, audio: Option<f64>, video: Option<f64>) -> SelectorInputs {
        SelectorInputs {
            has_audio,
            audio_clock: audio,
            video_clock: video,
        }
    }

    #[test]
    fn test_no_audio_selects_video_permanently() {
        let gate = AvSyncGate::new();
        let sel = MasterSelector::new();
        assert_eq!(
            sel.evaluate(&gate, inputs(false, None, None)),
            MasterKind::Video
        );
        assert!(gate.is_open(), "idle video master is allowed before frames");
        sel.unlock("seek");
        assert_eq!(
            sel.evaluate(&gate, inputs(false, None, Some(1.0))),
            MasterKind::Video
        );
    }

    #[test]
    fn test_playing_audio_wins() {
        let gate = AvSyncGate::new();
        let sel = MasterSelector::new();
        let m = sel.evaluate(&gate, inputs(true, Some(0.5), Some(0.48)));
        assert_eq!(m, MasterKind::Audio);
        assert!(gate.is_open());
    }

    #[test]
    fn test_lock_prevents_flip_flop() {
        let gate = AvSyncGate::new();
        let sel = MasterSelector::new();
        sel.evaluate(&gate, inputs(true, Some(0.5), Some(0.5)));
        // Audio momentarily looks worse but is still valid: no switch.
        // A valid video clock alone must not steal mastership.
        let m = sel.evaluate(&gate, inputs(true, Some(0.5), Some(2.0)));
        assert_eq!(m, MasterKind::Audio);
    }

    #[test]
    fn test_invalid_master_unlocks_and_demotes() {
        let gate = AvSyncGate::new();
        let sel = MasterSelector::new();
        sel.evaluate(&gate, inputs(true, Some(0.5), Some(0.5)));
        let m = sel.evaluate(&gate, inputs(true, None, Some(0.6)));
        assert_eq!(m, MasterKind::Video);
        assert!(gate.is_open());
        assert!(!sel.recovering(), "re-selection completes recovery");
    }

    #[test]
    fn test_switch_records_sync_base_without_reset() {
        let gate = AvSyncGate::new();
        let sel = MasterSelector::new();
        sel.evaluate(&gate, inputs(true, Some(1.5), Some(1.45)));
        sel.evaluate(&gate, inputs(true, None, Some(1.6)));
        // The outgoing audio master had no value; base falls back to the
        // last recorded one. Now switch back after unlock with live values.
        sel.unlock("pause->play");
        sel.evaluate(&gate, inputs(true, Some(1.7), Some(1.65)));
        assert!((sel.sync_base() - 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_both_invalid_falls_back_to_video_closed_gate() {
        let gate = AvSyncGate::new();
        let sel = MasterSelector::new();
        let m = sel.evaluate(&gate, inputs(true, None, None));
        assert_eq!(m, MasterKind::Video);
        assert!(!gate.is_open(), "no usable clock must close the gate");
    }

    #[test]
    fn test_force_demote() {
        let gate = AvSyncGate::new();
        let sel = MasterSelector::new();
        sel.evaluate(&gate, inputs(true, Some(0.2), None));
        sel.force_demote(&gate, "audio device died", false);
        assert_eq!(sel.current(), MasterKind::Video);
        assert!(!gate.is_open());
        assert!(sel.recovering());
    }
}
