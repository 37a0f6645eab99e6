//! Demux worker.
//!
//! Reads compressed packets and fans them out to the per-stream packet
//! queues, tagged with the current seek epoch. Container seeks run here,
//! since the demuxer is owned by this thread, and a seek command arriving
//! while a packet is in hand drops that packet instead of pushing it under
//! the new epoch.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel;
use log::{debug, warn};

use crate::media::source::{DemuxEvent, Demuxer, StreamKind};
use crate::playback::context::{DemuxCommand, PlayerContext};
use crate::playback::seek;
use crate::queue::PushOutcome;

const EOF_POLL: Duration = Duration::from_millis(50);
const READ_ERROR_LIMIT: u32 = 16;

pub(crate) fn run(
    ctx: Arc<PlayerContext>,
    mut demuxer: Box<dyn Demuxer>,
    ctl: channel::Receiver<DemuxCommand>,
) {
    let mut read_errors = 0u32;

    debug!("demux worker up");
    loop {
        if ctx.is_aborted() {
            break;
        }

        // Latest queued seek wins.
        let mut seek_target = None;
        while let Ok(DemuxCommand::Seek { target_sec }) = ctl.try_recv() {
            seek_target = Some(target_sec);
        }
        if let Some(target) = seek_target {
            match demuxer.seek(target, true) {
                Ok(()) => debug!("container repositioned to {target:.3}s"),
                Err(e) => {
                    // A failed seek invalidates clocks but never stops
                    // playback; unwind the protocol and keep reading.
                    warn!("container seek failed: {e}");
                    seek::force_end_seek(&ctx);
                }
            }
        }

        match demuxer.read() {
            Ok(DemuxEvent::Packet(packet)) => {
                read_errors = 0;
                if !ctl.is_empty() {
                    // A seek landed between read and push; this packet
                    // belongs to the old position.
                    continue;
                }
                let epoch = ctx.seek.epoch();
                let outcome = match packet.stream {
                    StreamKind::Audio if ctx.has_audio => ctx.audio_packets.push(packet, epoch),
                    StreamKind::Video if ctx.has_video => ctx.video_packets.push(packet, epoch),
                    _ => continue,
                };
                if outcome == PushOutcome::Aborted {
                    break;
                }
            }
            Ok(DemuxEvent::Eof) => {
                if !ctx.demux_eof.swap(true, Ordering::AcqRel) {
                    debug!("demux reached end of container");
                }
                // Keep polling: a seek can restart the stream.
                std::thread::sleep(EOF_POLL);
            }
            Err(e) => {
                read_errors += 1;
                warn!("demux read failed ({read_errors}): {e}");
                if read_errors >= READ_ERROR_LIMIT {
                    ctx.demux_eof.store(true, Ordering::Relaxed);
                    std::thread::sleep(EOF_POLL);
                }
            }
        }
    }
    debug!("demux worker down");
}
