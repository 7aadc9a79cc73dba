//! Adaptive pacing for a concurrent generational collector.
//!
//! The crate decides *when* to start minor and major collections and *how many*
//! workers each generation gets, from statistics gathered while the mutator
//! keeps running. The collector itself stays outside: it is driven through the
//! [`collector::Collector`] trait and observed through [`heap::Heap`].
//!
//! Threads:
//! - the director evaluates the heuristics on a fixed tick,
//! - the minor and major drivers run the collections they are sent,
//! - the statistics service aggregates samplers and prints them.
//!
//! [`engine::GcEngine`] owns all of them.
use std::time::Duration;

pub mod cause;
pub mod collector;
pub(crate) mod context;
pub mod director;
pub mod driver;
pub mod engine;
pub mod error;
pub mod generation;
pub mod heap;
pub mod monitor;
pub mod seq;
pub mod service_thread;
pub mod stat;
pub mod utils;


pub use cause::GcCause;
pub use engine::GcEngine;
pub use error::{ConfigError, CycleAborted, DriverError, EngineError};

/// Configuration for the pacer.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Seconds between timer triggered minor collections. `<= 0` disables the timer.
    pub collection_interval_minor: f64,
    /// Seconds between timer triggered major collections. `<= 0` disables the timer.
    pub collection_interval_major: f64,
    /// Only the timer rules may start a collection
    pub collection_interval_only: bool,
    /// Factor applied to the average allocation rate before adding its deviation
    pub allocation_spike_tolerance: f64,
    /// Let the director pick worker counts instead of always using the caps
    pub dynamic_worker_threads: bool,
    /// Allow major collections while there is still plenty of memory
    pub proactive: bool,
    pub young_gc_threads: u32,
    pub old_gc_threads: u32,
    /// Budget for young and old workers running at the same time
    pub conc_gc_threads: u32,
    /// Director evaluations per second
    pub decision_hz: u64,
    /// Expected allocation rate samples per second
    pub sample_hz: u64,
    /// How often the statistics table is printed
    pub statistics_interval: Duration,
    /// Allocation rate sampling granules are a multiple of this
    pub granule_size: usize,
    /// Enables verbose printing
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        let ncpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as u32;
        let threads = (ncpus / 4).max(1);
        Self {
            collection_interval_minor: 0.0,
            collection_interval_major: 0.0,
            collection_interval_only: false,
            allocation_spike_tolerance: 2.0,
            dynamic_worker_threads: true,
            proactive: true,
            young_gc_threads: threads,
            old_gc_threads: threads,
            conc_gc_threads: threads,
            decision_hz: 100,
            sample_hz: 10,
            statistics_interval: Duration::from_secs(10),
            granule_size: 2 * utils::M,
            verbose: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.allocation_spike_tolerance.is_finite() || self.allocation_spike_tolerance <= 0.0 {
            return Err(ConfigError::SpikeTolerance(self.allocation_spike_tolerance));
        }
        for (name, value) in [
            ("collection_interval_minor", self.collection_interval_minor),
            ("collection_interval_major", self.collection_interval_major),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::Interval { name, value });
            }
        }
        for (name, value) in [
            ("young_gc_threads", self.young_gc_threads),
            ("old_gc_threads", self.old_gc_threads),
            ("conc_gc_threads", self.conc_gc_threads),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroThreads(name));
            }
        }
        if self.decision_hz == 0 {
            return Err(ConfigError::ZeroFrequency("decision_hz"));
        }
        if self.sample_hz == 0 {
            return Err(ConfigError::ZeroFrequency("sample_hz"));
        }
        if self.statistics_interval.is_zero() {
            return Err(ConfigError::StatisticsInterval);
        }
        if !self.granule_size.is_power_of_two() {
            return Err(ConfigError::GranuleSize(self.granule_size));
        }
        Ok(())
    }

    /// Seconds between two allocation rate samples.
    pub fn sample_interval(&self) -> f64 {
        1.0 / self.sample_hz.max(1) as f64
    }
}
