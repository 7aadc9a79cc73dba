use parking_lot::MutexGuard;
use std::sync::{atomic::Ordering, Arc};

use super::{collect_generation, request_workers, DriverPort, DriverRequest, MinorDriver};
use crate::{
    cause::GcCause,
    context::GcContext,
    error::{CycleAborted, DriverError},
    generation::GenerationId,
    service_thread::ConcurrentService,
    stat::phase::StatPhase,
};

/// Runs major collections: the young generation through the minor driver,
/// then the old generation on this thread.
pub struct MajorDriver {
    context: Arc<GcContext>,
    minor: Arc<MinorDriver>,
    port: DriverPort,
    phase: StatPhase,
}

impl MajorDriver {
    pub(crate) fn new(context: Arc<GcContext>, minor: Arc<MinorDriver>) -> Self {
        let phase = StatPhase::new(&context.registry, "Major Collection");
        Self {
            context,
            minor,
            port: DriverPort::new(),
            phase,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.port.is_busy()
    }

    pub fn port(&self) -> &DriverPort {
        &self.port
    }

    pub fn gc_cause(&self) -> GcCause {
        self.context.major_cause.load(Ordering::Relaxed)
    }

    /// Posts `request`. Blocks for requests that must observe the collection.
    ///
    /// # Panics
    ///
    /// On a cause major collections do not support.
    pub fn collect(&self, request: DriverRequest) -> Result<(), DriverError> {
        match request.cause {
            GcCause::SystemGc
            | GcCause::DiagnosticCommand
            | GcCause::HeapDump
            | GcCause::HeapInspection
            | GcCause::WhiteboxFullGc
            | GcCause::MetadataClearSoftRefs => {
                // Start synchronous GC
                self.port.send_sync(request)
            }
            GcCause::Timer
            | GcCause::Warmup
            | GcCause::AllocationRate
            | GcCause::AllocationStall
            | GcCause::Proactive
            | GcCause::HighUsage
            | GcCause::CodeCacheThreshold
            | GcCause::MetadataThreshold => {
                // Start asynchronous GC
                self.port.send_async(request)
            }
            cause => {
                log::error!(target: "gc::driver", "Unsupported GC cause ({})", cause);
                panic!("Unsupported GC cause ({})", cause);
            }
        }
    }

    fn collect_young(&self, request: DriverRequest) -> Result<(), CycleAborted> {
        let young_nworkers = request.young_nworkers;
        if request.cause.should_preclean_young() {
            // Promote everything to the old generation first
            self.send_young(GcCause::MajorYoungPreclean, young_nworkers)?;
            self.context.abort.check()?;
        }
        // Collect young and gather roots into the old generation
        self.send_young(GcCause::MajorYoung, young_nworkers)
    }

    fn send_young(&self, cause: GcCause, young_nworkers: u32) -> Result<(), CycleAborted> {
        self.minor
            .collect(DriverRequest::new(cause, young_nworkers, 0))
            .map_err(|_| CycleAborted)
    }

    fn collect_old(&self, gc_id: u64, request: DriverRequest) -> Result<(), CycleAborted> {
        let context = &self.context;
        let nworkers = if context.config.dynamic_worker_threads {
            request_workers(request.old_nworkers, context.config.old_gc_threads)
        } else {
            context.config.old_gc_threads
        };
        context
            .old
            .set_total_collections_at_start(context.young.total_collections());
        collect_generation(
            context,
            &context.old,
            gc_id,
            request.cause,
            None,
            request.cause.should_clear_soft_references(),
            nworkers,
            |cycle| context.collector.collect_old(cycle),
        )
    }

    fn gc(&self, request: DriverRequest) -> Result<(), CycleAborted> {
        let gc_id = self.context.gc_id.next();
        let _timer = self.phase.start(gc_id, GenerationId::Old);

        self.collect_young(request)?;
        self.context.abort.check()?;
        self.collect_old(gc_id, request)
    }

    fn handle_alloc_stalls(&self, cleared_all_soft_refs: bool) {
        self.context
            .heap
            .handle_alloc_stalling_for_old(cleared_all_soft_refs);
    }
}

impl ConcurrentService for MajorDriver {
    fn run_service(&self) {
        while let Some(request) = self.port.receive() {
            let cleared_all_soft_refs = {
                let mut locker = self.context.driver_lock.lock();
                if self.context.abort.should_abort() {
                    false
                } else {
                    self.context
                        .major_cause
                        .store(request.cause, Ordering::Relaxed);
                    // Minor cycles interleave with both parts of a major one;
                    // the young part is sent to the minor driver
                    let result = MutexGuard::unlocked(&mut locker, || self.gc(request));
                    self.context
                        .major_cause
                        .store(GcCause::NoGc, Ordering::Relaxed);
                    if result.is_err() {
                        log::debug!(target: "gc::driver", "Major collection ({}) aborted", request.cause);
                    }
                    result.is_ok() && request.cause.should_clear_soft_references()
                }
            };

            // Notify GC completed
            self.port.ack();

            self.handle_alloc_stalls(cleared_all_soft_refs);

            // Good point to consider back-to-back GC
            self.context.director.notify();
        }
    }

    fn stop_service(&self) {
        self.port.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::testing::context, generation::YoungType, service_thread::ServiceThread, Config,
    };

    fn start(
        config: Config,
    ) -> (
        Arc<crate::heap::testing::FakeHeap>,
        Arc<crate::context::testing::FakeCollector>,
        Arc<GcContext>,
        Arc<MajorDriver>,
        ServiceThread,
        ServiceThread,
    ) {
        let (heap, collector, context) = context(config);
        let minor = Arc::new(MinorDriver::new(context.clone()));
        let major = Arc::new(MajorDriver::new(context.clone(), minor.clone()));
        let minor_thread = ServiceThread::start("MinorDriver", minor).unwrap();
        let major_thread = ServiceThread::start("MajorDriver", major.clone()).unwrap();
        (heap, collector, context, major, minor_thread, major_thread)
    }

    #[test]
    fn system_gc_precleans_and_collects_old() {
        let (_, collector, context, major, minor_thread, major_thread) = start(Config::default());
        major
            .collect(DriverRequest::new(GcCause::SystemGc, 2, 2))
            .unwrap();

        let young = collector.young.lock().clone();
        assert_eq!(
            young,
            vec![
                (YoungType::MajorFullPreclean, GcCause::MajorYoungPreclean, true),
                (YoungType::MajorFullRoots, GcCause::MajorYoung, true),
            ]
        );
        assert_eq!(collector.old.load(Ordering::Relaxed), 1);
        assert_eq!(context.old.stat_cycle().nwarmup_cycles(), 1);
        assert_eq!(context.young.total_collections(), 2);
        assert_eq!(context.old.total_collections_at_start(), 2);
        assert_eq!(major.gc_cause(), GcCause::NoGc);

        minor_thread.stop();
        major_thread.stop();
    }

    #[test]
    fn heuristic_major_skips_preclean() {
        let (_, collector, _, major, minor_thread, major_thread) = start(Config::default());
        // async: wait until the driver is done with it
        major
            .collect(DriverRequest::new(GcCause::Proactive, 1, 1))
            .unwrap();
        while major.is_busy() {
            std::thread::yield_now();
        }
        let young = collector.young.lock().clone();
        assert_eq!(
            young,
            vec![(YoungType::MajorPartialRoots, GcCause::MajorYoung, false)]
        );
        minor_thread.stop();
        major_thread.stop();
    }

    #[test]
    fn aborted_old_collection_does_not_train_stats() {
        let (heap, collector, context, major, minor_thread, major_thread) =
            start(Config::default());
        collector
            .fail_old
            .store(true, std::sync::atomic::Ordering::Relaxed);
        major
            .collect(DriverRequest::new(GcCause::DiagnosticCommand, 1, 1))
            .unwrap();
        assert_eq!(context.old.stat_cycle().nwarmup_cycles(), 0);
        // the young part completed normally
        assert_eq!(context.young.stat_cycle().nwarmup_cycles(), 2);
        // not rolled back
        assert_eq!(context.old.total_collections_at_start(), 2);

        minor_thread.stop();
        major_thread.stop();
        assert!(heap.old_stall_handled.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn minor_collection_runs_during_old_collection() {
        let (heap, collector, context) = context(Config::default());
        let minor = Arc::new(MinorDriver::new(context.clone()));
        let major = Arc::new(MajorDriver::new(context.clone(), minor.clone()));
        let minor_thread = ServiceThread::start("MinorDriver", minor.clone()).unwrap();
        let major_thread = ServiceThread::start("MajorDriver", major.clone()).unwrap();

        collector.block_old.store(true, Ordering::Relaxed);
        major
            .collect(DriverRequest::new(GcCause::Proactive, 1, 1))
            .unwrap();
        while collector.old_entered.load(Ordering::Relaxed) == 0 {
            std::thread::yield_now();
        }

        minor
            .collect(DriverRequest::new(GcCause::Timer, 1, 0))
            .unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let ran_minor = || {
            collector
                .young
                .lock()
                .iter()
                .any(|(young_type, cause, _)| {
                    *young_type == YoungType::Minor && *cause == GcCause::Timer
                })
        };
        while !ran_minor() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(ran_minor());
        // the old collection is still parked
        assert!(major.is_busy());
        assert_eq!(collector.old.load(Ordering::Relaxed), 0);

        collector.block_old.store(false, Ordering::Relaxed);
        while major.is_busy() {
            std::thread::yield_now();
        }
        assert_eq!(collector.old.load(Ordering::Relaxed), 1);
        assert_eq!(context.young.total_collections(), 2);

        minor_thread.stop();
        major_thread.stop();
        assert!(heap.old_stall_handled.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    #[should_panic(expected = "Unsupported GC cause")]
    fn unsupported_cause_panics() {
        let (_, _, context) = context(Config::default());
        let minor = Arc::new(MinorDriver::new(context.clone()));
        let major = MajorDriver::new(context, minor);
        let _ = major.collect(DriverRequest::new(GcCause::WhiteboxYoungGc, 1, 1));
    }
}
