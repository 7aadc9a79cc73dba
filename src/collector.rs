//! The seam between the pacer and the collector doing the actual work.
//!
//! A driver hands the collector a [`Cycle`] and blocks until `collect_young`
//! or `collect_old` returns. The collector reports heap checkpoints and worker
//! gangs through the cycle and polls [`Cycle::abort_point`] between phases.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    cause::GcCause,
    error::CycleAborted,
    generation::{Generation, GenerationId, YoungType},
    heap::Heap,
    stat::{
        heap::HeapUsage,
        phase::{StatPhase, StatTimer},
        StatRegistry,
    },
};

pub trait Collector: Send + Sync {
    /// Runs the mark and relocate phases of the young generation.
    fn collect_young(&self, young_type: YoungType, cycle: &Cycle<'_>) -> Result<(), CycleAborted>;

    /// Runs the mark and relocate phases of the old generation.
    fn collect_old(&self, cycle: &Cycle<'_>) -> Result<(), CycleAborted>;
}

/// Abort flag checked at every phase boundary.
pub struct Abort {
    flag: AtomicBool,
}

impl Abort {
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn should_abort(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<(), CycleAborted> {
        if self.should_abort() {
            Err(CycleAborted)
        } else {
            Ok(())
        }
    }
}

impl Default for Abort {
    fn default() -> Self {
        Self::new()
    }
}

/// One generation's collection as seen by the collector.
pub struct Cycle<'a> {
    gc_id: u64,
    cause: GcCause,
    young_type: Option<YoungType>,
    clear_soft_references: bool,
    generation: &'a Generation,
    heap: &'a dyn Heap,
    abort: &'a Abort,
    registry: &'a StatRegistry,
}

impl<'a> Cycle<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        gc_id: u64,
        cause: GcCause,
        young_type: Option<YoungType>,
        clear_soft_references: bool,
        generation: &'a Generation,
        heap: &'a dyn Heap,
        abort: &'a Abort,
        registry: &'a StatRegistry,
    ) -> Self {
        Self {
            gc_id,
            cause,
            young_type,
            clear_soft_references,
            generation,
            heap,
            abort,
            registry,
        }
    }

    pub fn gc_id(&self) -> u64 {
        self.gc_id
    }

    pub fn cause(&self) -> GcCause {
        self.cause
    }

    pub fn generation_id(&self) -> GenerationId {
        self.generation.id()
    }

    /// `None` for old collections.
    pub fn young_type(&self) -> Option<YoungType> {
        self.young_type
    }

    pub fn clear_soft_references(&self) -> bool {
        self.clear_soft_references
    }

    pub fn should_abort(&self) -> bool {
        self.abort.should_abort()
    }

    pub fn abort_point(&self) -> Result<(), CycleAborted> {
        self.abort.check()
    }

    /// Worker count the director currently wants for this generation.
    pub fn requested_workers(&self) -> u32 {
        self.generation.requested_workers().max(1)
    }

    /// Runs a worker gang episode sized by [`Cycle::requested_workers`].
    pub fn run_workers<R>(&self, task: impl FnOnce(u32) -> R) -> R {
        let nworkers = self.requested_workers();
        self.generation.stat_workers().at_start(nworkers);
        let result = task(nworkers);
        self.generation.stat_workers().at_end();
        result
    }

    /// Called by a running gang at a safe point. Returns the new size when the
    /// director asked for a different one.
    pub fn resize_workers(&self) -> Option<u32> {
        let requested = self.requested_workers();
        let workers = self.generation.stat_workers();
        let active = workers.active_workers();
        if active == 0 || active == requested {
            return None;
        }
        log::debug!(
            target: "gc::driver",
            "GC({}) {}: Resizing workers {} -> {}",
            self.gc_id,
            self.generation.id().tag(),
            active,
            requested
        );
        workers.at_resize(requested);
        Some(requested)
    }

    pub fn registry(&self) -> &StatRegistry {
        self.registry
    }

    /// Times a collector phase.
    pub fn timer<'p>(&self, phase: &'p StatPhase) -> StatTimer<'p> {
        phase.start(self.gc_id, self.generation.id())
    }

    pub fn heap_usage(&self, reclaimed: usize) -> HeapUsage {
        HeapUsage {
            capacity: self.heap.capacity(),
            soft_max_capacity: self.heap.soft_max_capacity(),
            used: self.heap.used(),
            used_generation: self.heap.used_in_generation(self.generation.id()),
            reclaimed,
            allocation_stalls: 0,
        }
    }

    pub fn at_mark_start(&self) {
        self.generation.stat_heap().at_mark_start(&self.heap_usage(0));
    }

    pub fn at_mark_end(&self, live: usize) {
        self.generation
            .stat_heap()
            .at_mark_end(&self.heap_usage(0), live);
    }

    pub fn at_relocate_start(&self) {
        self.generation
            .stat_heap()
            .at_relocate_start(&self.heap_usage(0));
    }

    pub fn at_relocate_end(&self, reclaimed: usize) {
        let record_stats = !self.should_abort();
        self.generation
            .stat_heap()
            .at_relocate_end(&self.heap_usage(reclaimed), record_stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::testing::FakeHeap;
    use crate::utils::M;

    #[test]
    fn abort_points_fail_once_aborted() {
        let abort = Abort::new();
        assert!(abort.check().is_ok());
        abort.abort();
        assert_eq!(abort.check(), Err(CycleAborted));
    }

    #[test]
    fn cycle_reports_checkpoints_and_workers() {
        let registry = StatRegistry::with_slots(1);
        let young = Generation::new(GenerationId::Young, &registry);
        let heap = FakeHeap::new(100 * M);
        heap.set_used(60 * M);
        heap.used_young
            .store(40 * M, std::sync::atomic::Ordering::Relaxed);
        let abort = Abort::new();
        young.set_requested_workers(3);

        let cycle = Cycle::new(
            1,
            GcCause::Timer,
            Some(YoungType::Minor),
            false,
            &young,
            &heap,
            &abort,
            &registry,
        );
        cycle.at_mark_start();
        let seen = cycle.run_workers(|n| {
            assert_eq!(young.stat_workers().active_workers(), 3);
            young.request_resize_workers(5);
            assert_eq!(cycle.resize_workers(), Some(5));
            assert_eq!(cycle.resize_workers(), None);
            n
        });
        assert_eq!(seen, 3);
        assert_eq!(young.stat_workers().active_workers(), 0);

        cycle.at_mark_end(10 * M);
        assert_eq!(young.stat_heap().at_mark_end_checkpoint().garbage, 30 * M);
        cycle.at_relocate_end(25 * M);
        assert_eq!(young.stat_heap().stats().reclaimed_avg, 25 * M);
    }
}
