use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};

use super::{SamplerHistory, StatRegistry};
use crate::{monitor::Metronome, service_thread::ConcurrentService};

/// Aggregation thread: drains every sampler once a second into its history and
/// prints the history table every `print_interval`.
pub struct StatService {
    registry: Arc<StatRegistry>,
    metronome: Metronome,
    history: Mutex<Vec<SamplerHistory>>,
    print_every: u64,
    verbose: bool,
}

impl StatService {
    pub const SAMPLE_HZ: u64 = 1;

    pub fn new(registry: Arc<StatRegistry>, print_interval: Duration, verbose: bool) -> Self {
        Self::with_metronome(
            registry,
            Metronome::new(Self::SAMPLE_HZ),
            print_interval,
            verbose,
        )
    }

    pub(crate) fn with_metronome(
        registry: Arc<StatRegistry>,
        metronome: Metronome,
        print_interval: Duration,
        verbose: bool,
    ) -> Self {
        let tick = metronome.interval().as_nanos().max(1);
        let print_every = (print_interval.as_nanos() / tick).max(1) as u64;
        Self {
            registry,
            metronome,
            history: Mutex::new(Vec::new()),
            print_every,
            verbose,
        }
    }

    /// One aggregation step. Returns `true` when the table was printed.
    pub fn sample_and_collect(&self, tick: u64) -> bool {
        let mut history = self.history.lock();
        self.registry.sample_and_collect(&mut history);

        if tick % self.print_every != 0 {
            return false;
        }
        let table = self.registry.print(&history);
        if self.verbose {
            log::info!(target: "gc::stats", "\n{}", table);
        } else {
            log::debug!(target: "gc::stats", "\n{}", table);
        }
        true
    }

    pub fn history(&self) -> Vec<SamplerHistory> {
        self.history.lock().clone()
    }
}

impl ConcurrentService for StatService {
    fn run_service(&self) {
        while self.metronome.wait_for_tick() {
            self.sample_and_collect(self.metronome.nticks());
        }
    }

    fn stop_service(&self) {
        self.metronome.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{service_thread::ServiceThread, stat::StatUnit};

    #[test]
    fn prints_every_interval() {
        let registry = Arc::new(StatRegistry::with_slots(1));
        let sampler = registry.sampler("Phase", "Pause", StatUnit::Time);
        let service = StatService::new(registry, Duration::from_secs(3), false);

        sampler.record(10);
        assert!(!service.sample_and_collect(1));
        assert!(!service.sample_and_collect(2));
        assert!(service.sample_and_collect(3));
        assert_eq!(service.history()[0].lifetime().sum, 10);
    }

    #[test]
    fn thread_drains_samplers() {
        let registry = Arc::new(StatRegistry::with_slots(1));
        let sampler = registry.sampler("Memory", "Used", StatUnit::Bytes);
        sampler.record(42);

        let service = Arc::new(StatService::with_metronome(
            registry,
            Metronome::with_interval(Duration::from_millis(5)),
            Duration::from_secs(10),
            false,
        ));
        let thread = ServiceThread::start("StatService", service.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        thread.stop();

        let history = service.history();
        assert_eq!(history[0].lifetime().sum, 42);
        assert_eq!(history[0].lifetime().nsamples, 1);
    }
}
