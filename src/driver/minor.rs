use std::sync::{atomic::Ordering, Arc};

use super::{collect_generation, request_workers, DriverPort, DriverRequest};
use crate::{
    cause::GcCause,
    context::GcContext,
    error::DriverError,
    generation::{GenerationId, YoungType},
    service_thread::ConcurrentService,
    stat::phase::StatPhase,
};

/// Runs young collections: stand alone minor collections and the young part
/// of major collections.
pub struct MinorDriver {
    context: Arc<GcContext>,
    port: DriverPort,
    phase: StatPhase,
}

impl MinorDriver {
    pub(crate) fn new(context: Arc<GcContext>) -> Self {
        let phase = StatPhase::new(&context.registry, "Minor Collection");
        Self {
            context,
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
        self.context.minor_cause.load(Ordering::Relaxed)
    }

    /// Posts `request`. Blocks for requests that must observe the collection.
    ///
    /// # Panics
    ///
    /// On a cause minor collections do not support.
    pub fn collect(&self, request: DriverRequest) -> Result<(), DriverError> {
        match request.cause {
            GcCause::WhiteboxYoungGc | GcCause::MajorYoung | GcCause::MajorYoungPreclean => {
                // Start synchronous GC
                self.port.send_sync(request)
            }
            GcCause::Timer
            | GcCause::AllocationRate
            | GcCause::AllocationStall
            | GcCause::HighUsage => {
                // Start asynchronous GC
                self.port.send_async(request)
            }
            cause => {
                log::error!(target: "gc::driver", "Unsupported GC cause ({})", cause);
                panic!("Unsupported GC cause ({})", cause);
            }
        }
    }

    fn young_type(&self, cause: GcCause) -> YoungType {
        match cause {
            GcCause::MajorYoungPreclean => YoungType::MajorFullPreclean,
            GcCause::MajorYoung => {
                let major = self.context.major_cause.load(Ordering::Relaxed);
                if major.should_preclean_young() {
                    YoungType::MajorFullRoots
                } else {
                    YoungType::MajorPartialRoots
                }
            }
            _ => YoungType::Minor,
        }
    }

    fn gc(&self, request: DriverRequest) {
        let context = &self.context;
        let young_type = self.young_type(request.cause);
        let clear_soft_references = young_type != YoungType::Minor
            && context
                .major_cause
                .load(Ordering::Relaxed)
                .should_clear_soft_references();
        let nworkers = if context.config.dynamic_worker_threads {
            request_workers(request.young_nworkers, context.config.young_gc_threads)
        } else {
            context.config.young_gc_threads
        };

        let gc_id = context.gc_id.next();
        context.minor_cause.store(request.cause, Ordering::Relaxed);
        {
            let _timer = self.phase.start(gc_id, GenerationId::Young);
            let young = &context.young;
            let result = collect_generation(
                context,
                young,
                gc_id,
                request.cause,
                Some(young_type),
                clear_soft_references,
                nworkers,
                |cycle| context.collector.collect_young(young_type, cycle),
            );
            if result.is_err() {
                log::debug!(
                    target: "gc::driver",
                    "GC({}) Y: {} collection aborted",
                    gc_id,
                    young_type.name()
                );
            }
        }
        context.minor_cause.store(GcCause::NoGc, Ordering::Relaxed);
    }

    fn handle_alloc_stalls(&self) {
        self.context.heap.handle_alloc_stalling_for_young();
    }
}

impl ConcurrentService for MinorDriver {
    fn run_service(&self) {
        while let Some(request) = self.port.receive() {
            {
                let _locker = self.context.driver_lock.lock();
                if self.context.abort.should_abort() {
                    log::debug!(target: "gc::driver", "Minor driver skipping {} after abort", request.cause);
                } else {
                    self.gc(request);
                }
            }

            // Notify GC completed
            self.port.ack();

            self.handle_alloc_stalls();

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
    use crate::{context::testing::context, service_thread::ServiceThread, Config};
    use std::time::Duration;

    #[test]
    fn minor_request_runs_a_minor_collection() {
        let (heap, collector, context) = context(Config::default());
        let driver = Arc::new(MinorDriver::new(context.clone()));
        let thread = ServiceThread::start("MinorDriver", driver.clone()).unwrap();

        driver
            .collect(DriverRequest::new(GcCause::WhiteboxYoungGc, 1, 0))
            .unwrap();
        let young = collector.young.lock().clone();
        assert_eq!(young, vec![(YoungType::Minor, GcCause::WhiteboxYoungGc, false)]);
        assert_eq!(context.young.stat_cycle().nwarmup_cycles(), 1);
        assert_eq!(driver.gc_cause(), GcCause::NoGc);

        // stall hook runs after the ack, give it a moment
        let mut waited = 0;
        while heap.young_stall_handled.load(Ordering::Relaxed) == 0 && waited < 100 {
            std::thread::sleep(Duration::from_millis(10));
            waited += 1;
        }
        assert_eq!(heap.young_stall_handled.load(Ordering::Relaxed), 1);
        thread.stop();
    }

    #[test]
    fn async_requests_return_immediately() {
        let (_, collector, context) = context(Config::default());
        let driver = Arc::new(MinorDriver::new(context));
        assert_eq!(driver.collect(DriverRequest::new(GcCause::Timer, 1, 0)), Ok(()));
        assert!(driver.is_busy());
        assert!(collector.young.lock().is_empty());
    }

    #[test]
    #[should_panic(expected = "Unsupported GC cause")]
    fn unsupported_cause_panics() {
        let (_, _, context) = context(Config::default());
        let driver = MinorDriver::new(context);
        let _ = driver.collect(DriverRequest::new(GcCause::SystemGc, 1, 0));
    }

    #[test]
    fn major_young_types() {
        let (_, _, context) = context(Config::default());
        let driver = MinorDriver::new(context.clone());
        assert_eq!(driver.young_type(GcCause::Timer), YoungType::Minor);
        assert_eq!(
            driver.young_type(GcCause::MajorYoungPreclean),
            YoungType::MajorFullPreclean
        );
        context
            .major_cause
            .store(GcCause::Proactive, Ordering::Relaxed);
        assert_eq!(
            driver.young_type(GcCause::MajorYoung),
            YoungType::MajorPartialRoots
        );
        context
            .major_cause
            .store(GcCause::SystemGc, Ordering::Relaxed);
        assert_eq!(
            driver.young_type(GcCause::MajorYoung),
            YoungType::MajorFullRoots
        );
    }
}
