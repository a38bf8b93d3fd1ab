use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reelfeed_rs::AutoAdvanceTimer;

fn counted_timer(enabled: bool, delay_ms: u64, paused: bool) -> (AutoAdvanceTimer, Arc<AtomicU32>) {
    let fired = Arc::new(AtomicU32::new(0));
    let callback = {
        let fired = Arc::clone(&fired);
        Arc::new(move || {
            fired.fetch_add(1, Ordering::SeqCst);
        }) as Arc<dyn Fn() + Send + Sync>
    };
    let timer = AutoAdvanceTimer::start(enabled, Duration::from_millis(delay_ms), paused, callback);
    (timer, fired)
}

// Pausing freezes the remaining time; resuming continues from the frozen
// value, so the total unpaused time from start to fire equals the delay.
#[tokio::test(start_paused = true)]
async fn test_pause_preserves_elapsed_baseline() {
    let (timer, fired) = counted_timer(true, 1000, false);

    tokio::time::advance(Duration::from_millis(400)).await;
    timer.pause();
    assert_eq!(timer.remaining_ms(), 600);

    // a long pause changes nothing
    tokio::time::advance(Duration::from_millis(5000)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(timer.remaining_ms(), 600);

    timer.resume();
    // 400ms of unpaused time were already spent; 500ms more is not enough
    tokio::time::advance(Duration::from_millis(500)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(timer.remaining_ms(), 100);

    // ... and at 1000ms total unpaused time it fires
    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

// The callback fires exactly once; the countdown stays expired until reset.
#[tokio::test(start_paused = true)]
async fn test_fires_exactly_once_until_reset() {
    let (timer, fired) = counted_timer(true, 500, false);

    tokio::time::advance(Duration::from_millis(2000)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(timer.remaining_ms(), 0);

    timer.reset();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    tokio::time::advance(Duration::from_millis(500)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

// reset restarts the countdown without firing
#[tokio::test(start_paused = true)]
async fn test_reset_restarts_without_firing() {
    let (timer, fired) = counted_timer(true, 1000, false);

    tokio::time::advance(Duration::from_millis(900)).await;
    timer.reset();
    tokio::time::advance(Duration::from_millis(900)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

// A disabled timer never counts down
#[tokio::test(start_paused = true)]
async fn test_disabled_timer_never_fires() {
    let (timer, fired) = counted_timer(false, 500, false);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(timer.remaining_ms(), 500);

    // enabling starts a fresh countdown from now
    timer.set_enabled(true);
    tokio::time::advance(Duration::from_millis(400)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

// Starting paused holds the full delay until resumed
#[tokio::test(start_paused = true)]
async fn test_starts_paused_holds_full_delay() {
    let (timer, fired) = counted_timer(true, 800, true);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(timer.remaining_ms(), 800);

    timer.resume();
    tokio::time::advance(Duration::from_millis(800)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

// Changing the delay restarts the countdown fresh
#[tokio::test(start_paused = true)]
async fn test_set_delay_restarts_countdown() {
    let (timer, fired) = counted_timer(true, 1000, false);

    tokio::time::advance(Duration::from_millis(900)).await;
    timer.set_delay(Duration::from_millis(300));
    tokio::time::advance(Duration::from_millis(200)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

// The countdown channel follows the sampling ticks
#[tokio::test(start_paused = true)]
async fn test_watch_channel_tracks_countdown() {
    let (timer, _fired) = counted_timer(true, 1000, false);
    let rx = timer.watch_remaining();

    tokio::time::advance(Duration::from_millis(300)).await;
    let seen = *rx.borrow();
    assert!(seen <= 700, "expected countdown at or below 700ms, saw {seen}");

    timer.pause();
    tokio::time::advance(Duration::from_millis(1000)).await;
    assert_eq!(*rx.borrow(), 700);
}
