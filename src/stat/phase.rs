use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use super::{StatRegistry, StatSampler, StatUnit};
use crate::{generation::GenerationId, utils::millis};

/// Source of GC ids. Every driver cycle takes the next one.
pub struct GcId {
    next: AtomicU64,
}

impl GcId {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Ids handed out so far.
    pub fn count(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for GcId {
    fn default() -> Self {
        Self::new()
    }
}

/// A named, timed part of a collection.
pub struct StatPhase {
    name: &'static str,
    sampler: Arc<StatSampler>,
}

impl StatPhase {
    pub fn new(registry: &StatRegistry, name: &'static str) -> Self {
        Self {
            name,
            sampler: registry.sampler("Phase", name, StatUnit::Time),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn sampler(&self) -> &Arc<StatSampler> {
        &self.sampler
    }

    pub fn start(&self, gc_id: u64, generation: GenerationId) -> StatTimer<'_> {
        log::debug!(
            target: "gc::phases",
            "GC({}) {}: {} (start)",
            gc_id,
            generation.tag(),
            self.name
        );
        StatTimer {
            phase: self,
            gc_id,
            generation,
            start: Instant::now(),
        }
    }
}

/// Records the time spent in a phase when dropped.
pub struct StatTimer<'a> {
    phase: &'a StatPhase,
    gc_id: u64,
    generation: GenerationId,
    start: Instant,
}

impl StatTimer<'_> {
    pub fn phase(&self) -> &StatPhase {
        self.phase
    }
}

impl Drop for StatTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        self.phase
            .sampler
            .record(elapsed.as_nanos().min(u64::MAX as u128) as u64);
        log::info!(
            target: "gc::phases",
            "GC({}) {}: {} {:.3}ms",
            self.gc_id,
            self.generation.tag(),
            self.phase.name,
            millis(elapsed)
        );
    }
}
