//! The director decides when collections start and how many workers they get.
//!
//! It wakes up `decision_hz` times per second, or earlier when the allocation
//! rate model or a driver notifies it, takes a [`DirectorStats`] snapshot and
//! runs the rules over it. A positive decision is posted to the matching
//! driver. Otherwise, while a young collection runs, its worker count may be
//! adjusted.

pub mod rules;
pub mod stats;
pub mod workers;

pub use stats::{DirectorHeapStats, DirectorStats};
pub use workers::{WorkerCounts, WorkerSelection};

use std::{sync::Arc, time::Duration};

use crate::{
    cause::GcCause,
    context::GcContext,
    driver::{DriverRequest, MajorDriver, MinorDriver},
    service_thread::ConcurrentService,
    Config,
};
use rules::*;
use workers::select_worker_threads;

/// Outcome of one evaluation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Decision {
    None,
    Minor(DriverRequest),
    Major(DriverRequest),
}

/// Worker counts the running collections should switch to.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct WorkerResize {
    pub young: Option<u32>,
    pub old: Option<u32>,
}

/// Young and old workers for a major collection that starts now.
pub fn initial_workers(
    config: &Config,
    stats: &DirectorStats,
    selection: WorkerSelection,
) -> WorkerCounts {
    if !config.dynamic_worker_threads {
        return WorkerCounts {
            young: config.young_gc_threads,
            old: config.old_gc_threads,
        };
    }

    let soft = rule_minor_allocation_rate_dynamic(
        config,
        stats,
        0.0,
        0.0,
        false,
        stats.heap.soft_max_capacity,
    );
    let hard =
        rule_minor_allocation_rate_dynamic(config, stats, 0.0, 0.0, true, stats.heap.max_capacity);
    let young_workers = soft.young_nworkers.max(hard.young_nworkers).max(1);
    select_worker_threads(config, stats, young_workers, selection)
}

pub fn make_major_gc_decision(config: &Config, stats: &DirectorStats, major_busy: bool) -> GcCause {
    if major_busy {
        return GcCause::NoGc;
    }

    if rule_major_timer(config, stats) {
        return GcCause::Timer;
    }

    if rule_major_warmup(config, stats) {
        return GcCause::Warmup;
    }

    if rule_major_proactive(config, stats) {
        return GcCause::Proactive;
    }

    GcCause::NoGc
}

pub fn make_minor_gc_decision(
    config: &Config,
    stats: &DirectorStats,
    minor_busy: bool,
    major_busy: bool,
) -> DriverRequest {
    if minor_busy {
        return DriverRequest::none();
    }

    if major_busy && !stats.old.resize.is_active {
        // The major collection is still in its young part
        return DriverRequest::none();
    }

    if rule_minor_timer(config, stats) {
        return DriverRequest::new(GcCause::Timer, config.young_gc_threads, 0);
    }

    let request = rule_minor_allocation_rate(config, stats);
    if !request.is_none() {
        return request;
    }

    if rule_minor_high_usage(config, stats) {
        return DriverRequest::new(GcCause::HighUsage, config.young_gc_threads, 0);
    }

    DriverRequest::none()
}

/// Which collection, if any, to start. Major collections are tried first as
/// they include a young collection.
pub fn decide(
    config: &Config,
    stats: &DirectorStats,
    minor_busy: bool,
    major_busy: bool,
) -> Decision {
    let major_cause = make_major_gc_decision(config, stats, major_busy);
    if major_cause != GcCause::NoGc {
        let workers = initial_workers(config, stats, WorkerSelection::StartMajor);
        return Decision::Major(DriverRequest::new(major_cause, workers.young, workers.old));
    }

    let request = make_minor_gc_decision(config, stats, minor_busy, major_busy);
    if request.is_none() {
        return Decision::None;
    }

    if !major_busy && rule_major_allocation_rate(stats) {
        // Merge minor GC into a major GC
        let workers = select_worker_threads(
            config,
            stats,
            request.young_nworkers,
            WorkerSelection::StartMajor,
        );
        return Decision::Major(DriverRequest::new(
            GcCause::AllocationRate,
            workers.young,
            workers.old,
        ));
    }

    Decision::Minor(request)
}

/// New worker counts for the running collections, if they need any.
pub fn decide_resize(config: &Config, stats: &DirectorStats) -> WorkerResize {
    let young_resize = stats.young.resize;
    let old_resize = stats.old.resize;

    if !config.dynamic_worker_threads || !young_resize.is_active {
        return WorkerResize::default();
    }

    let request = rule_minor_allocation_rate_dynamic(
        config,
        stats,
        young_resize.serial_gc_time_passed,
        young_resize.parallel_gc_time_passed,
        false,
        stats.heap.soft_max_capacity,
    );
    if request.is_none() {
        // No urgency
        return WorkerResize::default();
    }

    let current = young_resize.nworkers_current;
    let desired = request.young_nworkers.max(current);
    let young_workers = if desired > current {
        // Increase by more than the minimum, for margin and to resize less often
        let needed_increase = desired - current;
        (current + needed_increase * 2).min(config.young_gc_threads)
    } else {
        desired
    };

    let selection = if old_resize.is_active {
        WorkerSelection::MinorDuringOld
    } else {
        WorkerSelection::Normal
    };
    let counts = select_worker_threads(config, stats, young_workers, selection);

    WorkerResize {
        young: (counts.young != current).then(|| counts.young),
        old: (old_resize.is_active && counts.old != old_resize.nworkers_current)
            .then(|| counts.old),
    }
}

pub struct Director {
    context: Arc<GcContext>,
    minor: Arc<MinorDriver>,
    major: Arc<MajorDriver>,
}

impl Director {
    pub(crate) fn new(
        context: Arc<GcContext>,
        minor: Arc<MinorDriver>,
        major: Arc<MajorDriver>,
    ) -> Self {
        Self {
            context,
            minor,
            major,
        }
    }

    pub fn sample(&self) -> DirectorStats {
        DirectorStats::sample(&self.context)
    }

    /// Posts the decision to its driver. Returns whether a collection was requested.
    fn start_gc(&self, stats: &DirectorStats) -> bool {
        let decision = decide(
            &self.context.config,
            stats,
            self.minor.is_busy(),
            self.major.is_busy(),
        );
        let result = match decision {
            Decision::None => return false,
            Decision::Major(request) => self.major.collect(request),
            Decision::Minor(request) => self.minor.collect(request),
        };
        if let Err(error) = &result {
            log::debug!(target: "gc::director", "Dropped {:?}: {}", decision, error);
        }
        result.is_ok()
    }

    fn adjust_gc(&self, stats: &DirectorStats) {
        let resize = decide_resize(&self.context.config, stats);
        if let Some(old) = resize.old {
            self.context.old.request_resize_workers(old);
        }
        if let Some(young) = resize.young {
            self.context.young.request_resize_workers(young);
        }
    }

    /// One evaluation: sample, then start or adjust.
    pub fn evaluate(&self) -> bool {
        let stats = self.sample();
        if self.start_gc(&stats) {
            return true;
        }
        self.adjust_gc(&stats);
        false
    }

    fn decision_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.context.config.decision_hz.max(1))
    }
}

impl ConcurrentService for Director {
    fn run_service(&self) {
        let interval = self.decision_interval();
        // Main loop
        while self.context.director.wait(interval) {
            self.evaluate();
        }
    }

    fn stop_service(&self) {
        self.context.director.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::testing::context, service_thread::ServiceThread, utils::M};
    use std::sync::atomic::Ordering;

    fn heap(stats: &mut DirectorStats, capacity: usize, used: usize) {
        stats.heap.soft_max_capacity = capacity;
        stats.heap.capacity = capacity;
        stats.heap.max_capacity = capacity;
        stats.heap.used = used;
    }

    fn warm(stats: &mut DirectorStats) {
        for generation in [&mut stats.young, &mut stats.old] {
            generation.cycle.is_warm = true;
            generation.cycle.is_time_trustable = true;
            generation.cycle.nwarmup_cycles = 3;
        }
    }

    #[test]
    fn major_rules_win_over_minor_rules() {
        let config = Config {
            collection_interval_minor: 1.0,
            collection_interval_major: 1.0,
            young_gc_threads: 2,
            old_gc_threads: 2,
            ..Config::default()
        };
        let mut stats = DirectorStats::default();
        heap(&mut stats, 1000 * M, 0);
        stats.young.cycle.time_since_last = 2.0;
        stats.old.cycle.time_since_last = 2.0;

        match decide(&config, &stats, false, false) {
            Decision::Major(request) => {
                assert_eq!(request.cause, GcCause::Timer);
                assert!(request.young_nworkers >= 1 && request.old_nworkers >= 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        // busy major suppresses the major rules, not the minor ones once old runs
        stats.old.resize.is_active = true;
        assert_eq!(
            decide(&config, &stats, false, true),
            Decision::Minor(DriverRequest::new(GcCause::Timer, 2, 0))
        );
    }

    #[test]
    fn busy_drivers_suppress_decisions() {
        let config = Config {
            collection_interval_minor: 1.0,
            ..Config::default()
        };
        let mut stats = DirectorStats::default();
        heap(&mut stats, 1000 * M, 0);
        stats.young.cycle.time_since_last = 2.0;

        assert!(matches!(decide(&config, &stats, false, false), Decision::Minor(_)));
        assert_eq!(decide(&config, &stats, true, false), Decision::None);
        // major still in its young part
        assert_eq!(decide(&config, &stats, false, true), Decision::None);
        assert_eq!(make_major_gc_decision(&config, &stats, true), GcCause::NoGc);
    }

    #[test]
    fn warmup_starts_major() {
        let config = Config::default();
        let mut stats = DirectorStats::default();
        heap(&mut stats, 1000 * M, 150 * M);
        assert_eq!(make_major_gc_decision(&config, &stats, false), GcCause::Warmup);
        let interval_only = Config {
            collection_interval_only: true,
            ..config
        };
        assert_eq!(
            make_major_gc_decision(&interval_only, &stats, false),
            GcCause::NoGc
        );
    }

    #[test]
    fn high_usage_starts_minor() {
        let config = Config {
            young_gc_threads: 3,
            ..Config::default()
        };
        let mut stats = DirectorStats::default();
        warm(&mut stats);
        stats.old.heap.used_at_relocate_end = 960 * M;
        heap(&mut stats, 1000 * M, 980 * M);
        assert_eq!(
            make_minor_gc_decision(&config, &stats, false, false),
            DriverRequest::new(GcCause::HighUsage, 3, 0)
        );
    }

    #[test]
    fn minor_is_upgraded_when_old_garbage_dominates() {
        let config = Config {
            collection_interval_minor: 1.0,
            young_gc_threads: 4,
            old_gc_threads: 4,
            conc_gc_threads: 4,
            proactive: false,
            ..Config::default()
        };
        let mut stats = DirectorStats::default();
        warm(&mut stats);
        heap(&mut stats, 1000 * M, 500 * M);
        stats.young.cycle.time_since_last = 2.0;
        stats.young.cycle.avg_parallelizable_time = 1.0;
        stats.young.heap.reclaimed_avg = 10 * M;
        stats.young.total_collections = 10;
        stats.old.cycle.avg_parallelizable_time = 1.0;
        stats.old.used = 400 * M;
        stats.old.heap.reclaimed_avg = 300 * M;
        stats.old.total_collections_at_start = 2;

        match decide(&config, &stats, false, false) {
            Decision::Major(request) => {
                assert_eq!(request.cause, GcCause::AllocationRate);
                assert_eq!(request.young_nworkers, 4);
                assert!(request.old_nworkers >= 1 && request.old_nworkers <= 4);
            }
            other => panic!("unexpected {:?}", other),
        }

        // not while a major collection is already running
        stats.old.resize.is_active = true;
        assert_eq!(
            decide(&config, &stats, false, true),
            Decision::Minor(DriverRequest::new(GcCause::Timer, 4, 0))
        );
    }

    #[test]
    fn resize_adds_workers_when_falling_behind() {
        let config = Config {
            young_gc_threads: 8,
            old_gc_threads: 2,
            conc_gc_threads: 8,
            ..Config::default()
        };
        let mut stats = DirectorStats::default();
        assert_eq!(decide_resize(&config, &stats), WorkerResize::default());

        warm(&mut stats);
        heap(&mut stats, 1000 * M, 990 * M);
        stats.mutator_alloc_rate.avg = 100.0 * M as f64;
        stats.young.cycle.avg_parallelizable_time = 8.0;
        stats.young.resize = crate::generation::WorkerResizeStats {
            is_active: true,
            serial_gc_time_passed: 0.0,
            parallel_gc_time_passed: 1.0,
            nworkers_current: 2,
        };

        let resize = decide_resize(&config, &stats);
        assert_eq!(resize.young, Some(8));
        assert_eq!(resize.old, None);

        let no_dynamic = Config {
            dynamic_worker_threads: false,
            ..config
        };
        assert_eq!(decide_resize(&no_dynamic, &stats), WorkerResize::default());
    }

    #[test]
    fn dropped_request_does_not_count_as_started() {
        let (heap, _, context) = context(Config::default());
        heap.set_used(200 * M);
        let minor = Arc::new(MinorDriver::new(context.clone()));
        let major = Arc::new(MajorDriver::new(context.clone(), minor.clone()));
        let director = Director::new(context, minor.clone(), major.clone());

        assert!(matches!(
            decide(&director.context.config, &director.sample(), false, false),
            Decision::Major(_)
        ));
        minor.port().shutdown();
        major.port().shutdown();
        assert!(!director.evaluate());
    }

    #[test]
    fn director_thread_starts_warmup_collection() {
        let config = Config {
            decision_hz: 1000,
            ..Config::default()
        };
        let (heap, collector, context) = context(config);
        heap.set_used(200 * M);

        let minor = Arc::new(MinorDriver::new(context.clone()));
        let major = Arc::new(MajorDriver::new(context.clone(), minor.clone()));
        let director = Arc::new(Director::new(context.clone(), minor.clone(), major.clone()));
        let minor_thread = ServiceThread::start("MinorDriver", minor).unwrap();
        let major_thread = ServiceThread::start("MajorDriver", major).unwrap();
        let director_thread = ServiceThread::start("Director", director).unwrap();

        let mut waited = 0;
        while collector.old.load(Ordering::Relaxed) == 0 && waited < 500 {
            std::thread::sleep(Duration::from_millis(10));
            waited += 1;
        }

        director_thread.stop();
        major_thread.stop();
        minor_thread.stop();
        assert!(collector.old.load(Ordering::Relaxed) >= 1);
    }
}
