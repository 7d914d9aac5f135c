//! A periodic background timer used to bound delivery latency
//!
//! This is the generic collaborator the subscription core schedules itself
//! on: create with an interval and a fire/stop callback pair, reset the
//! interval as traffic patterns change, stop when the owning subscription
//! closes. Callbacks never overlap, since only the timer's own thread ever
//! invokes them.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

struct Shared {
    interval: Mutex<Duration>,
    stopped: Mutex<bool>,
    cond: Condvar,
}

pub(crate) struct SignalTimer {
    shared: Arc<Shared>,
}

impl SignalTimer {
    /// Spawn the timer's dedicated thread.
    ///
    /// `on_fire` runs once per tick. `on_stop` runs exactly once, right
    /// before the thread exits, after [`SignalTimer::stop`] has been
    /// called.
    pub(crate) fn start<F, S>(
        interval: Duration,
        mut on_fire: F,
        on_stop: S,
    ) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
        S: FnOnce() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            interval: Mutex::new(interval),
            stopped: Mutex::new(false),
            cond: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name("signal-timer".to_owned())
            .spawn(move || {
                'ticks: loop {
                    let mut guard = thread_shared.stopped.lock().unwrap();
                    if *guard {
                        break 'ticks;
                    }
                    loop {
                        let interval = *thread_shared.interval.lock().unwrap();
                        let (new_guard, wait_result) =
                            thread_shared.cond.wait_timeout(guard, interval).unwrap();
                        guard = new_guard;
                        if *guard {
                            break 'ticks;
                        }
                        if wait_result.timed_out() {
                            break;
                        }
                        // Woken by a reset rather than a stop or a real
                        // timeout: loop again, picking up the new interval.
                    }
                    drop(guard);
                    on_fire();
                }
                on_stop();
            })?;

        Ok(Self { shared })
    }

    /// Change the firing interval. Wakes the timer immediately so the new
    /// interval takes effect right away rather than after the current tick
    /// finishes naturally.
    pub(crate) fn reset(&self, interval: Duration) {
        *self.shared.interval.lock().unwrap() = interval;
        self.shared.cond.notify_one();
    }

    /// Request the timer to stop, waking it immediately.
    pub(crate) fn stop(&self) {
        *self.shared.stopped.lock().unwrap() = true;
        self.shared.cond.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::SignalTimer;

    #[test]
    fn fires_repeatedly_at_the_configured_interval() {
        let fires = Arc::new(AtomicUsize::new(0));
        let fires_for_timer = Arc::clone(&fires);
        let timer = SignalTimer::start(
            Duration::from_millis(5),
            move || {
                fires_for_timer.fetch_add(1, Ordering::SeqCst);
            },
            || {},
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(60));
        timer.stop();

        assert!(fires.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn reset_to_a_short_interval_speeds_up_the_next_fire() {
        let fires = Arc::new(AtomicUsize::new(0));
        let fires_for_timer = Arc::clone(&fires);
        let timer = SignalTimer::start(
            Duration::from_secs(10),
            move || {
                fires_for_timer.fetch_add(1, Ordering::SeqCst);
            },
            || {},
        )
        .unwrap();

        timer.reset(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(40));
        timer.stop();

        assert!(fires.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn stop_runs_the_stop_callback_exactly_once() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let stopped_for_timer = Arc::clone(&stopped);
        let timer = SignalTimer::start(
            Duration::from_millis(5),
            || {},
            move || {
                stopped_for_timer.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        timer.stop();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}
