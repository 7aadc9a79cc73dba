//! Statistics collected by the pacer: lock-free samplers with time decayed
//! histories, per-generation cycle and worker bookkeeping, heap checkpoints and
//! the mutator allocation rate.

pub mod alloc_rate;
pub mod allocation_stats;
pub mod cycle;
pub mod heap;
pub mod history;
pub mod phase;
pub mod region;
pub mod sampler;
pub mod service;
pub mod workers;

use parking_lot::Mutex;
use std::{fmt::Write, sync::Arc};

use crate::utils::M;

pub use history::SamplerHistory;
pub use sampler::{SamplerData, StatCounter, StatSampler};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StatUnit {
    /// Nanoseconds.
    Time,
    Bytes,
    Threads,
    BytesPerSecond,
    OpsPerSecond,
}

impl StatUnit {
    pub fn format(self, value: u64) -> String {
        match self {
            StatUnit::Time => format!("{:.3} ms", value as f64 / 1_000_000.0),
            StatUnit::Bytes => format!("{} MB", value / M as u64),
            StatUnit::Threads => format!("{} threads", value),
            StatUnit::BytesPerSecond => format!("{} MB/s", value / M as u64),
            StatUnit::OpsPerSecond => format!("{} ops/s", value),
        }
    }
}

/// Owner of every sampler and counter. Each registered sampler gets a dense id
/// which indexes its history in the aggregation thread.
pub struct StatRegistry {
    nslots: usize,
    samplers: Mutex<Vec<Arc<StatSampler>>>,
    counters: Mutex<Vec<Arc<StatCounter>>>,
}

impl StatRegistry {
    pub fn new() -> Self {
        Self::with_slots(sampler::default_slots())
    }

    pub fn with_slots(nslots: usize) -> Self {
        Self {
            nslots: nslots.max(1),
            samplers: Mutex::new(Vec::new()),
            counters: Mutex::new(Vec::new()),
        }
    }

    pub fn sampler(
        &self,
        group: &'static str,
        name: impl Into<String>,
        unit: StatUnit,
    ) -> Arc<StatSampler> {
        let mut samplers = self.samplers.lock();
        let sampler = Arc::new(StatSampler::new(
            samplers.len(),
            group,
            name,
            unit,
            self.nslots,
        ));
        samplers.push(sampler.clone());
        sampler
    }

    pub fn counter(
        &self,
        group: &'static str,
        name: impl Into<String>,
        unit: StatUnit,
    ) -> Arc<StatCounter> {
        let sampler = self.sampler(group, name, unit);
        let counter = Arc::new(StatCounter::new(sampler, self.nslots));
        self.counters.lock().push(counter.clone());
        counter
    }

    pub fn samplers(&self) -> Vec<Arc<StatSampler>> {
        self.samplers.lock().clone()
    }

    /// Feeds counters into their samplers, then drains every sampler into `history`.
    pub fn sample_and_collect(&self, history: &mut Vec<SamplerHistory>) {
        let counters = self.counters.lock().clone();
        for counter in counters.iter() {
            counter.sample_and_reset();
        }

        let samplers = self.samplers();
        if history.len() < samplers.len() {
            history.resize_with(samplers.len(), SamplerHistory::default);
        }
        for sampler in samplers.iter() {
            history[sampler.id()].add(&sampler.collect_and_reset());
        }
    }

    pub fn print(&self, history: &[SamplerHistory]) -> String {
        let mut samplers = self.samplers();
        samplers.sort_by(|a, b| a.group().cmp(b.group()).then_with(|| a.name().cmp(b.name())));

        let mut out = String::new();
        let _ = writeln!(out, "=== Garbage Collection Statistics =====================================================================================================================");
        let _ = writeln!(
            out,
            "{:<50}{:>24}{:>24}{:>24}{:>24}",
            "", "Last 10s", "Last 10m", "Last 10h", "Total"
        );
        let _ = writeln!(
            out,
            "{:<50}{:>24}{:>24}{:>24}{:>24}",
            "", "Avg / Max", "Avg / Max", "Avg / Max", "Avg / Max"
        );
        for sampler in samplers {
            let h = match history.get(sampler.id()) {
                Some(h) => h,
                None => continue,
            };
            let unit = sampler.unit();
            let pair = |avg: u64, max: u64| format!("{} / {}", unit.format(avg), unit.format(max));
            let _ = writeln!(
                out,
                "  {:<48}{:>24}{:>24}{:>24}{:>24}",
                format!("{}: {}", sampler.group(), sampler.name()),
                pair(h.avg_10_seconds(), h.max_10_seconds()),
                pair(h.avg_10_minutes(), h.max_10_minutes()),
                pair(h.avg_10_hours(), h.max_10_hours()),
                pair(h.avg_total(), h.max_total()),
            );
        }
        let _ = writeln!(out, "=======================================================================================================================================================");
        out
    }
}

impl Default for StatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_assigns_dense_ids_and_collects() {
        let registry = StatRegistry::with_slots(2);
        let a = registry.sampler("Phase", "Pause Mark Start", StatUnit::Time);
        let c = registry.counter("Memory", "Allocation Rate", StatUnit::BytesPerSecond);
        assert_eq!(a.id(), 0);
        assert_eq!(c.sampler().id(), 1);

        a.record(1_000_000);
        c.inc(4 * M as u64);

        let mut history = Vec::new();
        registry.sample_and_collect(&mut history);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].lifetime().sum, 1_000_000);
        assert_eq!(history[1].lifetime().sum, 4 * M as u64);

        let table = registry.print(&history);
        assert!(table.contains("Phase: Pause Mark Start"));
        assert!(table.contains("4 MB/s"));
    }

    #[test]
    fn units_format() {
        assert_eq!(StatUnit::Time.format(1_500_000), "1.500 ms");
        assert_eq!(StatUnit::Bytes.format(3 * M as u64), "3 MB");
        assert_eq!(StatUnit::Threads.format(2), "2 threads");
    }
}
