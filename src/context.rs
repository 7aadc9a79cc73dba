use atomic::Atomic;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::{
    cause::GcCause,
    collector::{Abort, Collector},
    generation::{Generation, GenerationId},
    heap::Heap,
    monitor::Monitor,
    stat::{alloc_rate::StatMutatorAllocRate, phase::GcId, StatCounter, StatRegistry, StatUnit},
    Config,
};

/// State shared by the director, both drivers and the engine. Built once by
/// [`crate::engine::GcEngine`].
pub(crate) struct GcContext {
    pub config: Config,
    pub heap: Arc<dyn Heap>,
    pub collector: Arc<dyn Collector>,
    pub registry: Arc<StatRegistry>,
    pub young: Generation,
    pub old: Generation,
    pub alloc_rate: StatMutatorAllocRate,
    pub allocated: Arc<StatCounter>,
    /// Wakes the director early.
    pub director: Arc<Monitor>,
    pub abort: Abort,
    /// Serializes cause publication and the abort check at cycle start.
    /// The major driver drops it while collecting, so minor cycles may run
    /// inside an old collection.
    pub driver_lock: Mutex<()>,
    pub gc_id: GcId,
    pub minor_cause: Atomic<GcCause>,
    pub major_cause: Atomic<GcCause>,
}

impl GcContext {
    pub fn new(config: Config, heap: Arc<dyn Heap>, collector: Arc<dyn Collector>) -> Self {
        Self::with_registry(config, heap, collector, Arc::new(StatRegistry::new()))
    }

    pub fn with_registry(
        config: Config,
        heap: Arc<dyn Heap>,
        collector: Arc<dyn Collector>,
        registry: Arc<StatRegistry>,
    ) -> Self {
        let director = Arc::new(Monitor::new());
        let alloc_rate = StatMutatorAllocRate::new(
            heap.clone(),
            director.clone(),
            config.granule_size,
            config.sample_hz,
        );
        let allocated = registry.counter("Memory", "Allocation Rate", StatUnit::BytesPerSecond);
        Self {
            young: Generation::new(GenerationId::Young, &registry),
            old: Generation::new(GenerationId::Old, &registry),
            config,
            heap,
            collector,
            registry,
            alloc_rate,
            allocated,
            director,
            abort: Abort::new(),
            driver_lock: Mutex::new(()),
            gc_id: GcId::new(),
            minor_cause: Atomic::new(GcCause::NoGc),
            major_cause: Atomic::new(GcCause::NoGc),
        }
    }

    pub fn generation(&self, id: GenerationId) -> &Generation {
        match id {
            GenerationId::Young => &self.young,
            GenerationId::Old => &self.old,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::{
        collector::Cycle, error::CycleAborted, generation::YoungType, heap::testing::FakeHeap,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Collector recording what it was asked to do.
    #[derive(Default)]
    pub struct FakeCollector {
        pub young: Mutex<Vec<(YoungType, crate::GcCause, bool)>>,
        pub old: AtomicUsize,
        pub old_entered: AtomicUsize,
        pub fail_old: AtomicBool,
        /// Old collections spin until aborted.
        pub block_old: AtomicBool,
    }

    impl Collector for FakeCollector {
        fn collect_young(
            &self,
            young_type: YoungType,
            cycle: &Cycle<'_>,
        ) -> Result<(), CycleAborted> {
            cycle.abort_point()?;
            self.young
                .lock()
                .push((young_type, cycle.cause(), cycle.clear_soft_references()));
            cycle.at_mark_start();
            cycle.run_workers(|_| ());
            cycle.at_mark_end(0);
            cycle.abort_point()?;
            cycle.at_relocate_start();
            cycle.at_relocate_end(0);
            Ok(())
        }

        fn collect_old(&self, cycle: &Cycle<'_>) -> Result<(), CycleAborted> {
            self.old_entered.fetch_add(1, Ordering::Relaxed);
            while self.block_old.load(Ordering::Relaxed) && !cycle.should_abort() {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            cycle.abort_point()?;
            if self.fail_old.load(Ordering::Relaxed) {
                return Err(CycleAborted);
            }
            self.old.fetch_add(1, Ordering::Relaxed);
            cycle.run_workers(|_| ());
            Ok(())
        }
    }

    pub fn context(config: Config) -> (Arc<FakeHeap>, Arc<FakeCollector>, Arc<GcContext>) {
        let heap = Arc::new(FakeHeap::new(1024 * crate::utils::M));
        let collector = Arc::new(FakeCollector::default());
        let context = Arc::new(GcContext::with_registry(
            config,
            heap.clone(),
            collector.clone(),
            Arc::new(StatRegistry::with_slots(1)),
        ));
        (heap, collector, context)
    }
}
