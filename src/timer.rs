use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, trace};

/// Countdown sampling cadence. Sampling at a short fixed interval and
/// re-deriving the remaining time from the start instant avoids the drift a
/// single-shot timer or a decrementing counter would accumulate.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

pub type AdvanceCallback = Arc<dyn Fn() + Send + Sync>;

struct TimerInner {
    enabled: bool,
    paused: bool,
    delay: Duration,
    /// Start of the current countdown. Remaining time is always re-derived
    /// from this, never stored as a counter.
    baseline: Instant,
    /// Remaining time captured at pause; resume rebaselines from it instead
    /// of restarting the countdown.
    frozen: Option<Duration>,
    fired: bool,
}

impl TimerInner {
    fn remaining(&self, now: Instant) -> Duration {
        if !self.enabled {
            return self.delay;
        }
        if let Some(frozen) = self.frozen {
            return frozen;
        }
        if self.fired {
            return Duration::ZERO;
        }
        self.delay.saturating_sub(now - self.baseline)
    }

    /// Fresh countdown from now. Used at start and whenever a dependency
    /// (enabled, delay) changes or `reset` is called.
    fn restart(&mut self, now: Instant) {
        self.baseline = now;
        self.fired = false;
        self.frozen = if self.paused { Some(self.delay) } else { None };
    }
}

/// Idle-advance countdown. Fires its callback exactly once per countdown,
/// freezes while paused, and resumes from the frozen remainder.
pub struct AutoAdvanceTimer {
    inner: Arc<Mutex<TimerInner>>,
    remaining_tx: watch::Sender<u64>,
    remaining_rx: watch::Receiver<u64>,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AutoAdvanceTimer {
    /// Builds the timer and starts its sampling task.
    pub fn start(enabled: bool, delay: Duration, paused: bool, on_advance: AdvanceCallback) -> Self {
        let now = Instant::now();
        let inner = Arc::new(Mutex::new(TimerInner {
            enabled,
            paused,
            delay,
            baseline: now,
            frozen: if paused { Some(delay) } else { None },
            fired: false,
        }));
        let (remaining_tx, remaining_rx) = watch::channel(delay.as_millis() as u64);
        let shutdown = Arc::new(Notify::new());

        let task = tokio::spawn(run_ticks(
            Arc::clone(&inner),
            remaining_tx.clone(),
            Arc::clone(&shutdown),
            on_advance,
        ));

        Self {
            inner,
            remaining_tx,
            remaining_rx,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Remaining unpaused time, derived live.
    pub fn remaining_ms(&self) -> u64 {
        let inner = lock(&self.inner);
        inner.remaining(Instant::now()).as_millis() as u64
    }

    /// Countdown channel for UI display, updated each sampling tick.
    pub fn watch_remaining(&self) -> watch::Receiver<u64> {
        self.remaining_rx.clone()
    }

    /// Restarts the countdown without firing.
    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        inner.restart(Instant::now());
        let _ = self.remaining_tx.send(inner.delay.as_millis() as u64);
        trace!("auto-advance timer reset");
    }

    /// Freezes the remaining time. No effect while already paused.
    pub fn pause(&self) {
        let mut inner = lock(&self.inner);
        if inner.paused {
            return;
        }
        let remaining = inner.remaining(Instant::now());
        inner.paused = true;
        inner.frozen = Some(remaining);
        debug!(remaining_ms = remaining.as_millis() as u64, "auto-advance paused");
    }

    /// Continues from the frozen remainder; the countdown is not restarted.
    pub fn resume(&self) {
        let mut inner = lock(&self.inner);
        if !inner.paused {
            return;
        }
        let now = Instant::now();
        let frozen = inner.frozen.take().unwrap_or(inner.delay);
        let elapsed = inner.delay.saturating_sub(frozen);
        inner.baseline = now.checked_sub(elapsed).unwrap_or(now);
        inner.paused = false;
        debug!(remaining_ms = frozen.as_millis() as u64, "auto-advance resumed");
    }

    pub fn set_paused(&self, paused: bool) {
        if paused {
            self.pause();
        } else {
            self.resume();
        }
    }

    /// Changing the delay restarts the countdown fresh.
    pub fn set_delay(&self, delay: Duration) {
        let mut inner = lock(&self.inner);
        inner.delay = delay;
        inner.restart(Instant::now());
    }

    /// Toggling enablement restarts the countdown fresh.
    pub fn set_enabled(&self, enabled: bool) {
        let mut inner = lock(&self.inner);
        inner.enabled = enabled;
        inner.restart(Instant::now());
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.inner).paused
    }

    /// Stops the sampling task. The timer cannot be restarted afterwards.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

impl Drop for AutoAdvanceTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_ticks(
    inner: Arc<Mutex<TimerInner>>,
    remaining_tx: watch::Sender<u64>,
    shutdown: Arc<Notify>,
    on_advance: AdvanceCallback,
) {
    let mut ticks = interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            biased;

            _ = shutdown.notified() => {
                trace!("auto-advance timer stopping");
                break;
            }

            _ = ticks.tick() => {
                let fire = {
                    let mut inner = lock(&inner);
                    let remaining = inner.remaining(Instant::now());
                    let _ = remaining_tx.send(remaining.as_millis() as u64);
                    if inner.enabled && !inner.paused && !inner.fired && remaining.is_zero() {
                        inner.fired = true;
                        true
                    } else {
                        false
                    }
                };
                if fire {
                    debug!("auto-advance countdown elapsed");
                    on_advance();
                }
            }
        }
    }
}
