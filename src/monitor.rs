use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct MonitorState {
    notified: bool,
    stopped: bool,
}

/// Interruptible periodic wait. A `notify` cuts the current wait short, a `stop`
/// makes every subsequent wait return `false`.
pub struct Monitor {
    state: Mutex<MonitorState>,
    cv: Condvar,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState {
                notified: false,
                stopped: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Waits up to `timeout` or until notified. Returns `false` once stopped.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.stopped && !state.notified {
            let deadline = Instant::now() + timeout;
            while !state.stopped && !state.notified {
                if self.cv.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
        }
        state.notified = false;
        !state.stopped
    }

    pub fn notify(&self) {
        let mut state = self.state.lock();
        state.notified = true;
        self.cv.notify_all();
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.cv.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

struct MetronomeState {
    start: Option<Instant>,
    nticks: u64,
    stopped: bool,
}

/// Fixed-rate ticker. Ticks are anchored at the first wait, so a slow consumer
/// skips ticks instead of drifting.
pub struct Metronome {
    interval: Duration,
    state: Mutex<MetronomeState>,
    cv: Condvar,
}

impl Metronome {
    pub fn new(hz: u64) -> Self {
        Self::with_interval(Duration::from_nanos(1_000_000_000 / hz.max(1)))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(MetronomeState {
                start: None,
                nticks: 0,
                stopped: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn nticks(&self) -> u64 {
        self.state.lock().nticks
    }

    pub fn wait_for_tick(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let start = *state.start.get_or_insert(now);

        if state.nticks == 0 {
            // First tick fires immediately
            state.nticks = 1;
            return !state.stopped;
        }

        let interval = self.interval.as_nanos().max(1);
        let elapsed = now.duration_since(start).as_nanos();
        let due = elapsed / interval;
        if due >= state.nticks as u128 {
            // Missed ticks, catch up
            state.nticks = due as u64 + 1;
        } else {
            let offset = (interval * state.nticks as u128).min(u64::MAX as u128) as u64;
            let deadline = start + Duration::from_nanos(offset);
            while !state.stopped {
                if self.cv.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            state.nticks += 1;
        }

        !state.stopped
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn notify_cuts_wait_short() {
        let monitor = Arc::new(Monitor::new());
        let waiter = {
            let monitor = monitor.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let running = monitor.wait(Duration::from_secs(30));
                (running, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        monitor.notify();
        let (running, waited) = waiter.join().unwrap();
        assert!(running);
        assert!(waited < Duration::from_secs(10));
    }

    #[test]
    fn stopped_monitor_returns_false() {
        let monitor = Monitor::new();
        monitor.stop();
        assert!(!monitor.wait(Duration::from_secs(30)));
        assert!(monitor.is_stopped());
    }

    #[test]
    fn metronome_ticks_and_stops() {
        let metronome = Arc::new(Metronome::with_interval(Duration::from_millis(5)));
        assert!(metronome.wait_for_tick());
        assert!(metronome.wait_for_tick());
        assert!(metronome.nticks() >= 2);

        let slow = Arc::new(Metronome::with_interval(Duration::from_secs(60)));
        assert!(slow.wait_for_tick());
        let ticker = {
            let slow = slow.clone();
            thread::spawn(move || slow.wait_for_tick())
        };
        thread::sleep(Duration::from_millis(20));
        slow.stop();
        assert!(!ticker.join().unwrap());
    }
}
