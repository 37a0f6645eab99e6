//! Seek protocol and shutdown behavior over scripted collaborators.

mod common;

use std::time::{Duration, Instant};

use common::{init_logging, make_parts, EventLog, FakeClip, FakeSink, FakeSurface};
use tern::{PlaybackState, Player, PlayerConfig};

#[test]
fn test_seek_lands_at_or_past_target() {
    init_logging();
    let log = EventLog::new();
    let surface = FakeSurface::new();
    let presents = surface.presents_handle();
    let sink = FakeSink::new();

    let mut player = Player::prepare_with(
        make_parts(FakeClip::av(10.0)),
        Some(Box::new(sink)),
        Box::new(surface),
        Some(log.callback()),
        PlayerConfig::default(),
    )
    .unwrap();

    player.play();
    std::thread::sleep(Duration::from_millis(300));

    let issued = Instant::now();
    player.seek(7500, false);
    assert!(
        log.wait_for(Duration::from_millis(500), |l| !l
            .first_frame_pts()
            .is_empty()),
        "no first frame within 500 ms of the seek"
    );
    let latency = issued.elapsed();

    let pts = log.first_frame_pts()[0];
    assert!(
        (7.5..=8.5).contains(&pts),
        "first frame after seek at {pts}, expected within [7.5, 8.5]"
    );
    assert!(latency < Duration::from_millis(500));

    // Epoch fencing: nothing from before the seek shows after it.
    std::thread::sleep(Duration::from_millis(200));
    let shown = presents.lock().unwrap().clone();
    let first_new = shown
        .iter()
        .position(|p| *p >= 7.5)
        .expect("the post-seek frame must be in the present log");
    assert!(
        shown[first_new..].iter().all(|p| *p >= 7.5),
        "stale frame presented after the seek: {:?}",
        &shown[first_new..]
    );

    player.release();
}

#[test]
fn test_rapid_seeks_coalesce_to_last_target() {
    init_logging();
    let log = EventLog::new();
    let surface = FakeSurface::new();
    let sink = FakeSink::new();

    let clip = FakeClip {
        read_delay: Duration::from_millis(2),
        ..FakeClip::av(10.0)
    };
    let mut player = Player::prepare_with(
        make_parts(clip),
        Some(Box::new(sink)),
        Box::new(surface),
        Some(log.callback()),
        PlayerConfig::default(),
    )
    .unwrap();

    player.play();
    std::thread::sleep(Duration::from_millis(200));

    player.seek(2000, false);
    player.seek(5000, false);
    player.seek(8000, false);

    assert!(
        log.wait_for(Duration::from_secs(2), |l| !l.first_frame_pts().is_empty()),
        "coalesced seek never finished"
    );
    // Let any stragglers land before counting.
    std::thread::sleep(Duration::from_millis(400));

    let events = log.first_frame_pts();
    assert_eq!(
        events.len(),
        1,
        "rapid seeks must coalesce to one first-frame event: {events:?}"
    );
    assert!(
        events[0] >= 8.0,
        "first frame must honor the newest target: {}",
        events[0]
    );

    player.release();
}

#[test]
fn test_exact_seek_reports_target_frame() {
    init_logging();
    let log = EventLog::new();
    let surface = FakeSurface::new();
    let sink = FakeSink::new();

    let mut player = Player::prepare_with(
        make_parts(FakeClip::av(10.0)),
        Some(Box::new(sink)),
        Box::new(surface),
        Some(log.callback()),
        PlayerConfig::default(),
    )
    .unwrap();

    player.play();
    std::thread::sleep(Duration::from_millis(200));

    // A target between keyframes: decode restarts at 6.25 s, presentation
    // must hold out until the requested position.
    player.seek(6400, true);
    assert!(log.wait_for(Duration::from_secs(1), |l| !l.first_frame_pts().is_empty()));
    let pts = log.first_frame_pts()[0];
    assert!(pts >= 6.4 - 1e-6, "exact seek presented early frame {pts}");

    player.release();
}

#[test]
fn test_release_is_final_and_idempotent() {
    init_logging();
    let log = EventLog::new();
    let surface = FakeSurface::new();
    let sink = FakeSink::new();

    let mut player = Player::prepare_with(
        make_parts(FakeClip::av(5.0)),
        Some(Box::new(sink)),
        Box::new(surface),
        Some(log.callback()),
        PlayerConfig::default(),
    )
    .unwrap();

    player.play();
    std::thread::sleep(Duration::from_millis(200));

    player.release();
    assert_eq!(player.playback_state(), PlaybackState::Stopped);

    let frozen_count = log.len();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(
        log.len(),
        frozen_count,
        "events emitted after release: {:?}",
        log.snapshot()
    );

    // Second release (and the drop that follows) must be no-ops.
    player.release();
}

#[test]
fn test_seek_while_paused_presents_first_frame() {
    init_logging();
    let log = EventLog::new();
    let surface = FakeSurface::new();
    let sink = FakeSink::new();

    let mut player = Player::prepare_with(
        make_parts(FakeClip::av(10.0)),
        Some(Box::new(sink)),
        Box::new(surface),
        Some(log.callback()),
        PlayerConfig::default(),
    )
    .unwrap();

    player.play();
    std::thread::sleep(Duration::from_millis(200));
    player.pause();

    player.seek(4000, false);
    assert!(
        log.wait_for(Duration::from_secs(1), |l| !l.first_frame_pts().is_empty()),
        "paused seek must still surface its first frame"
    );
    assert!(log.first_frame_pts()[0] >= 4.0);

    player.release();
}
