use parking_lot::Mutex;
use std::time::Instant;

use super::workers::StatWorkers;
use crate::seq::NumberSeq;

/// Completed cycles needed before a generation's timings are fully trusted.
pub const WARMUP_CYCLES: u64 = 3;

/// Consistent copy of one generation's cycle statistics, times in seconds.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct CycleStats {
    pub is_warm: bool,
    pub nwarmup_cycles: u64,
    pub is_time_trustable: bool,
    pub is_active: bool,
    pub time_since_last: f64,
    pub duration_since_start: f64,
    pub last_active_workers: f64,
    pub avg_cycle_interval: f64,
    pub avg_serial_time: f64,
    pub sd_serial_time: f64,
    pub avg_parallelizable_time: f64,
    pub sd_parallelizable_time: f64,
    pub avg_parallelizable_duration: f64,
    pub sd_parallelizable_duration: f64,
}

struct CycleState {
    nwarmup_cycles: u64,
    created: Instant,
    start_of_last: Option<Instant>,
    end_of_last: Option<Instant>,
    cycle_intervals: NumberSeq,
    serial_time: NumberSeq,
    parallelizable_time: NumberSeq,
    parallelizable_duration: NumberSeq,
    last_active_workers: f64,
}

impl CycleState {
    fn is_warm(&self) -> bool {
        self.nwarmup_cycles >= WARMUP_CYCLES
    }

    fn is_time_trustable(&self) -> bool {
        self.nwarmup_cycles > 0
    }

    fn is_active(&self) -> bool {
        match (self.start_of_last, self.end_of_last) {
            (Some(start), Some(end)) => start > end,
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn time_since_last(&self, now: Instant) -> f64 {
        // Before the first cycle, count from creation
        let since = self.end_of_last.unwrap_or(self.created);
        now.saturating_duration_since(since).as_secs_f64()
    }

    fn duration_since_start(&self, now: Instant) -> f64 {
        match self.start_of_last {
            Some(start) if self.is_active() => now.saturating_duration_since(start).as_secs_f64(),
            _ => 0.0,
        }
    }
}

/// Per-generation cycle bookkeeping. Written by the driver at cycle start and
/// end, read by the director through [`StatCycle::stats`].
pub struct StatCycle {
    state: Mutex<CycleState>,
}

impl StatCycle {
    pub fn new() -> Self {
        Self::created_at(Instant::now())
    }

    pub(crate) fn created_at(created: Instant) -> Self {
        Self {
            state: Mutex::new(CycleState {
                nwarmup_cycles: 0,
                created,
                start_of_last: None,
                end_of_last: None,
                cycle_intervals: NumberSeq::default(),
                serial_time: NumberSeq::default(),
                parallelizable_time: NumberSeq::default(),
                parallelizable_duration: NumberSeq::default(),
                last_active_workers: 0.0,
            }),
        }
    }

    pub fn at_start(&self) {
        self.at_start_at(Instant::now());
    }

    pub(crate) fn at_start_at(&self, now: Instant) {
        self.state.lock().start_of_last = Some(now);
    }

    /// Closes the cycle. The worker accumulators are consumed either way; the
    /// trained averages and the warm-up count only move when `record_stats`.
    pub fn at_end(&self, workers: &StatWorkers, record_stats: bool) {
        self.at_end_at(workers, record_stats, Instant::now());
    }

    pub(crate) fn at_end_at(&self, workers: &StatWorkers, record_stats: bool, now: Instant) {
        let mut state = self.state.lock();
        let previous_end = state.end_of_last.replace(now);
        let start = state.start_of_last.unwrap_or(now);

        let duration = now.saturating_duration_since(start).as_secs_f64();
        let workers_duration = workers.get_and_reset_duration();
        let workers_time = workers.get_and_reset_time();
        let serial_time = (duration - workers_duration).max(0.0);

        if workers_duration > 0.0 {
            state.last_active_workers = workers_time / workers_duration;
        }

        if !record_stats {
            return;
        }

        if state.nwarmup_cycles < WARMUP_CYCLES {
            state.nwarmup_cycles += 1;
        }
        state.serial_time.add(serial_time);
        state.parallelizable_time.add(workers_time);
        state.parallelizable_duration.add(workers_duration);
        if let Some(previous_end) = previous_end {
            let interval = now.saturating_duration_since(previous_end).as_secs_f64();
            state.cycle_intervals.add(interval);
        }
    }

    pub fn is_warm(&self) -> bool {
        self.state.lock().is_warm()
    }

    pub fn is_time_trustable(&self) -> bool {
        self.state.lock().is_time_trustable()
    }

    pub fn nwarmup_cycles(&self) -> u64 {
        self.state.lock().nwarmup_cycles
    }

    pub fn last_active_workers(&self) -> f64 {
        self.state.lock().last_active_workers
    }

    pub fn time_since_last(&self) -> f64 {
        self.state.lock().time_since_last(Instant::now())
    }

    pub fn stats(&self) -> CycleStats {
        self.stats_at(Instant::now())
    }

    pub(crate) fn stats_at(&self, now: Instant) -> CycleStats {
        let state = self.state.lock();
        CycleStats {
            is_warm: state.is_warm(),
            nwarmup_cycles: state.nwarmup_cycles,
            is_time_trustable: state.is_time_trustable(),
            is_active: state.is_active(),
            time_since_last: state.time_since_last(now),
            duration_since_start: state.duration_since_start(now),
            last_active_workers: state.last_active_workers,
            avg_cycle_interval: state.cycle_intervals.davg(),
            avg_serial_time: state.serial_time.davg(),
            sd_serial_time: state.serial_time.dsd(),
            avg_parallelizable_time: state.parallelizable_time.davg(),
            sd_parallelizable_time: state.parallelizable_time.dsd(),
            avg_parallelizable_duration: state.parallelizable_duration.davg(),
            sd_parallelizable_duration: state.parallelizable_duration.dsd(),
        }
    }
}

impl Default for StatCycle {
    fn default() -> Self {
        Self::new()
    }
}
