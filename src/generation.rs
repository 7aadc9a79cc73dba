use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::stat::{
    cycle::{CycleStats, StatCycle},
    heap::{HeapStats, StatHeap},
    phase::StatPhase,
    workers::{StatWorkers, WorkersStats},
    StatRegistry,
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GenerationId {
    Young,
    Old,
}

impl GenerationId {
    pub const fn name(self) -> &'static str {
        match self {
            GenerationId::Young => "Young",
            GenerationId::Old => "Old",
        }
    }

    /// Log line prefix.
    pub const fn tag(self) -> &'static str {
        match self {
            GenerationId::Young => "Y",
            GenerationId::Old => "O",
        }
    }
}

/// Flavour of a young collection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum YoungType {
    /// Stand alone minor collection.
    Minor,
    /// Promotes every young object ahead of a major collection.
    MajorFullPreclean,
    /// Young part of a major collection that also marks old roots fully.
    MajorFullRoots,
    /// Young part of a major collection.
    MajorPartialRoots,
}

impl YoungType {
    pub const fn name(self) -> &'static str {
        match self {
            YoungType::Minor => "Minor",
            YoungType::MajorFullPreclean => "Major Full Preclean",
            YoungType::MajorFullRoots => "Major Full Roots",
            YoungType::MajorPartialRoots => "Major Partial Roots",
        }
    }
}

/// Worker gang numbers the director uses to resize a running collection.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct WorkerResizeStats {
    pub is_active: bool,
    pub serial_gc_time_passed: f64,
    pub parallel_gc_time_passed: f64,
    pub nworkers_current: u32,
}

/// Everything the director samples from one generation, taken under the
/// generation's own locks.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct GenerationStats {
    pub used: usize,
    pub total_collections: u64,
    pub total_collections_at_start: u64,
    pub cycle: CycleStats,
    pub workers: WorkersStats,
    pub heap: HeapStats,
    pub resize: WorkerResizeStats,
}

/// Statistics and worker bookkeeping of one generation. Created once, shared
/// by the drivers (writers) and the director (reader).
pub struct Generation {
    id: GenerationId,
    cycle: StatCycle,
    workers: StatWorkers,
    heap: StatHeap,
    phase: StatPhase,
    total_collections: AtomicU64,
    total_collections_at_start: AtomicU64,
    requested_workers: AtomicU32,
}

impl Generation {
    pub fn new(id: GenerationId, registry: &StatRegistry) -> Self {
        let phase = match id {
            GenerationId::Young => StatPhase::new(registry, "Young Generation"),
            GenerationId::Old => StatPhase::new(registry, "Old Generation"),
        };
        Self {
            id,
            cycle: StatCycle::new(),
            workers: StatWorkers::new(),
            heap: StatHeap::new(),
            phase,
            total_collections: AtomicU64::new(0),
            total_collections_at_start: AtomicU64::new(0),
            requested_workers: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> GenerationId {
        self.id
    }
    pub fn stat_cycle(&self) -> &StatCycle {
        &self.cycle
    }
    pub fn stat_workers(&self) -> &StatWorkers {
        &self.workers
    }
    pub fn stat_heap(&self) -> &StatHeap {
        &self.heap
    }
    pub fn phase(&self) -> &StatPhase {
        &self.phase
    }

    /// Collections of this generation started so far.
    pub fn total_collections(&self) -> u64 {
        self.total_collections.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_total_collections(&self) {
        self.total_collections.fetch_add(1, Ordering::Relaxed);
    }

    /// Young collection count seen when the last collection of this generation started.
    pub fn total_collections_at_start(&self) -> u64 {
        self.total_collections_at_start.load(Ordering::Relaxed)
    }

    pub(crate) fn set_total_collections_at_start(&self, total: u64) {
        self.total_collections_at_start
            .store(total, Ordering::Relaxed);
    }

    pub fn requested_workers(&self) -> u32 {
        self.requested_workers.load(Ordering::Relaxed)
    }

    /// Asks the running collection to continue with `nworkers` workers.
    pub fn request_resize_workers(&self, nworkers: u32) {
        let previous = self.requested_workers.swap(nworkers, Ordering::Relaxed);
        if previous != nworkers {
            log::debug!(
                target: "gc::director",
                "{} workers resize requested: {} -> {}",
                self.id.name(),
                previous,
                nworkers
            );
        }
    }

    pub(crate) fn set_requested_workers(&self, nworkers: u32) {
        self.requested_workers.store(nworkers, Ordering::Relaxed);
    }

    pub fn resize_stats(&self) -> WorkerResizeStats {
        resize_stats(&self.cycle.stats(), &self.workers.stats())
    }

    pub fn stats(&self, used: usize) -> GenerationStats {
        let cycle = self.cycle.stats();
        let workers = self.workers.stats();
        GenerationStats {
            used,
            total_collections: self.total_collections(),
            total_collections_at_start: self.total_collections_at_start(),
            cycle,
            workers,
            heap: self.heap.stats(),
            resize: resize_stats(&cycle, &workers),
        }
    }
}

fn resize_stats(cycle: &CycleStats, workers: &WorkersStats) -> WorkerResizeStats {
    WorkerResizeStats {
        is_active: cycle.is_active,
        serial_gc_time_passed: (cycle.duration_since_start - workers.accumulated_duration).max(0.0),
        parallel_gc_time_passed: workers.accumulated_time,
        nworkers_current: workers.active_workers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_stats_of_running_cycle() {
        let registry = StatRegistry::with_slots(1);
        let young = Generation::new(GenerationId::Young, &registry);
        assert!(!young.resize_stats().is_active);

        young.stat_cycle().at_start();
        young.stat_workers().at_start(3);
        let resize = young.resize_stats();
        assert!(resize.is_active);
        assert_eq!(resize.nworkers_current, 3);
        assert!(resize.serial_gc_time_passed >= 0.0);

        young.stat_workers().at_end();
        young.stat_cycle().at_end(young.stat_workers(), true);
        assert!(!young.stats(0).resize.is_active);
        assert!(young.stats(0).cycle.is_time_trustable);
    }

    #[test]
    fn resize_requests_are_published() {
        let registry = StatRegistry::with_slots(1);
        let old = Generation::new(GenerationId::Old, &registry);
        old.set_requested_workers(2);
        old.request_resize_workers(5);
        assert_eq!(old.requested_workers(), 5);
        assert_eq!(old.phase().name(), "Old Generation");
    }
}
