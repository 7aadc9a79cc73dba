use parking_lot::Mutex;
use std::time::{Duration, Instant};

struct WorkersState {
    active_workers: u32,
    start_of_last: Instant,
    accumulated_duration: Duration,
    accumulated_time: Duration,
}

impl WorkersState {
    /// Folds the running episode (if any) into the accumulators.
    fn close_episode(&mut self, now: Instant) {
        if self.active_workers == 0 {
            return;
        }
        let duration = now.saturating_duration_since(self.start_of_last);
        self.accumulated_duration += duration;
        self.accumulated_time += duration * self.active_workers;
    }

    fn extrapolated(&self, now: Instant) -> (Duration, Duration) {
        if self.active_workers == 0 {
            return (self.accumulated_duration, self.accumulated_time);
        }
        let running = now.saturating_duration_since(self.start_of_last);
        (
            self.accumulated_duration + running,
            self.accumulated_time + running * self.active_workers,
        )
    }
}

/// Snapshot of [`StatWorkers`], in seconds.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct WorkersStats {
    pub accumulated_duration: f64,
    pub accumulated_time: f64,
    pub active_workers: u32,
}

/// Wall clock and worker-weighted time spent in worker gangs of one generation
/// since the last cycle end.
pub struct StatWorkers {
    state: Mutex<WorkersState>,
}

impl StatWorkers {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WorkersState {
                active_workers: 0,
                start_of_last: Instant::now(),
                accumulated_duration: Duration::ZERO,
                accumulated_time: Duration::ZERO,
            }),
        }
    }

    pub fn at_start(&self, active_workers: u32) {
        self.at_start_at(active_workers, Instant::now());
    }

    pub(crate) fn at_start_at(&self, active_workers: u32, now: Instant) {
        let mut state = self.state.lock();
        state.close_episode(now);
        state.active_workers = active_workers;
        state.start_of_last = now;
    }

    /// The gang changed size while running.
    pub fn at_resize(&self, active_workers: u32) {
        self.at_start(active_workers);
    }

    pub fn at_end(&self) {
        self.at_end_at(Instant::now());
    }

    pub(crate) fn at_end_at(&self, now: Instant) {
        let mut state = self.state.lock();
        state.close_episode(now);
        state.active_workers = 0;
        state.start_of_last = now;
    }

    pub fn active_workers(&self) -> u32 {
        self.state.lock().active_workers
    }

    /// Includes the running episode, if a gang is active.
    pub fn accumulated_duration(&self) -> f64 {
        self.state.lock().extrapolated(Instant::now()).0.as_secs_f64()
    }

    /// Includes the running episode, if a gang is active.
    pub fn accumulated_time(&self) -> f64 {
        self.state.lock().extrapolated(Instant::now()).1.as_secs_f64()
    }

    pub fn get_and_reset_duration(&self) -> f64 {
        let mut state = self.state.lock();
        std::mem::take(&mut state.accumulated_duration).as_secs_f64()
    }

    pub fn get_and_reset_time(&self) -> f64 {
        let mut state = self.state.lock();
        std::mem::take(&mut state.accumulated_time).as_secs_f64()
    }

    pub fn stats(&self) -> WorkersStats {
        self.stats_at(Instant::now())
    }

    pub(crate) fn stats_at(&self, now: Instant) -> WorkersStats {
        let state = self.state.lock();
        let (duration, time) = state.extrapolated(now);
        WorkersStats {
            accumulated_duration: duration.as_secs_f64(),
            accumulated_time: time.as_secs_f64(),
            active_workers: state.active_workers,
        }
    }
}

impl Default for StatWorkers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn time_is_weighted_by_workers() {
        let workers = StatWorkers::new();
        let t0 = Instant::now();
        workers.at_start_at(4, t0);
        workers.at_end_at(t0 + Duration::from_millis(500));

        let stats = workers.stats_at(t0 + Duration::from_secs(5));
        assert!(close(stats.accumulated_duration, 0.5));
        assert!(close(stats.accumulated_time, 2.0));
        assert_eq!(stats.active_workers, 0);

        assert!(close(workers.get_and_reset_duration(), 0.5));
        assert!(close(workers.get_and_reset_time(), 2.0));
        assert!(close(workers.stats().accumulated_time, 0.0));
    }

    #[test]
    fn peek_while_active_extrapolates() {
        let workers = StatWorkers::new();
        let t0 = Instant::now();
        workers.at_start_at(2, t0);
        let stats = workers.stats_at(t0 + Duration::from_secs(1));
        assert_eq!(stats.active_workers, 2);
        assert!(close(stats.accumulated_duration, 1.0));
        assert!(close(stats.accumulated_time, 2.0));
        // nothing was folded in yet
        assert!(close(workers.get_and_reset_duration(), 0.0));
    }

    #[test]
    fn resize_splits_the_episode() {
        let workers = StatWorkers::new();
        let t0 = Instant::now();
        workers.at_start_at(2, t0);
        workers.at_start_at(6, t0 + Duration::from_secs(1));
        workers.at_end_at(t0 + Duration::from_secs(2));
        let stats = workers.stats_at(t0 + Duration::from_secs(2));
        assert!(close(stats.accumulated_duration, 2.0));
        assert!(close(stats.accumulated_time, 8.0));
    }
}
