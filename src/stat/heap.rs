use parking_lot::Mutex;
use std::fmt;

use crate::{
    seq::NumberSeq,
    utils::{formatted_size, percent_of},
};

/// Heap numbers reported by the collector at a checkpoint.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct HeapUsage {
    pub capacity: usize,
    pub soft_max_capacity: usize,
    pub used: usize,
    pub used_generation: usize,
    /// Bytes returned to the page allocator since the collection started.
    pub reclaimed: usize,
    pub allocation_stalls: usize,
}

/// One frozen row of the heap table.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct HeapCheckpoint {
    pub capacity: usize,
    pub soft_max_capacity: usize,
    pub used: usize,
    pub used_generation: usize,
    pub free: usize,
    pub live: usize,
    pub garbage: usize,
    pub reclaimed: usize,
    pub allocation_stalls: usize,
}

impl HeapCheckpoint {
    fn from_usage(usage: &HeapUsage, live: usize) -> Self {
        Self {
            capacity: usage.capacity,
            soft_max_capacity: usage.soft_max_capacity,
            used: usage.used,
            used_generation: usage.used_generation,
            free: usage.capacity.saturating_sub(usage.used),
            live,
            garbage: usage.used_generation.saturating_sub(live),
            reclaimed: usage.reclaimed,
            allocation_stalls: usage.allocation_stalls,
        }
    }
}

/// What the director reads from a generation's heap statistics.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct HeapStats {
    pub live_at_mark_end: usize,
    pub used_at_relocate_end: usize,
    pub reclaimed_avg: usize,
}

#[derive(Clone, Default)]
struct HeapState {
    at_collection_start: HeapCheckpoint,
    at_mark_start: HeapCheckpoint,
    at_mark_end: HeapCheckpoint,
    at_relocate_start: HeapCheckpoint,
    at_relocate_end: HeapCheckpoint,
    reclaimed_bytes: NumberSeq,
}

/// Heap occupancy of one generation at the checkpoints of its last collection.
pub struct StatHeap {
    state: Mutex<HeapState>,
}

impl StatHeap {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeapState::default()),
        }
    }

    pub fn at_collection_start(&self, usage: &HeapUsage) {
        self.state.lock().at_collection_start = HeapCheckpoint::from_usage(usage, 0);
    }

    pub fn at_mark_start(&self, usage: &HeapUsage) {
        self.state.lock().at_mark_start = HeapCheckpoint::from_usage(usage, 0);
    }

    pub fn at_mark_end(&self, usage: &HeapUsage, live: usize) {
        self.state.lock().at_mark_end = HeapCheckpoint::from_usage(usage, live);
    }

    pub fn at_relocate_start(&self, usage: &HeapUsage) {
        let mut state = self.state.lock();
        let live = state.at_mark_end.live;
        state.at_relocate_start = HeapCheckpoint::from_usage(usage, live);
    }

    pub fn at_relocate_end(&self, usage: &HeapUsage, record_stats: bool) {
        let mut state = self.state.lock();
        let live = state.at_mark_end.live;
        state.at_relocate_end = HeapCheckpoint::from_usage(usage, live);
        if record_stats {
            state.reclaimed_bytes.add(usage.reclaimed as f64);
        }
    }

    pub fn at_collection_start_checkpoint(&self) -> HeapCheckpoint {
        self.state.lock().at_collection_start
    }
    pub fn at_mark_start_checkpoint(&self) -> HeapCheckpoint {
        self.state.lock().at_mark_start
    }
    pub fn at_mark_end_checkpoint(&self) -> HeapCheckpoint {
        self.state.lock().at_mark_end
    }
    pub fn at_relocate_start_checkpoint(&self) -> HeapCheckpoint {
        self.state.lock().at_relocate_start
    }
    pub fn at_relocate_end_checkpoint(&self) -> HeapCheckpoint {
        self.state.lock().at_relocate_end
    }

    pub fn stats(&self) -> HeapStats {
        let state = self.state.lock();
        HeapStats {
            live_at_mark_end: state.at_mark_end.live,
            used_at_relocate_end: state.at_relocate_end.used,
            reclaimed_avg: state.reclaimed_bytes.davg().max(0.0) as usize,
        }
    }

    /// Copy of every checkpoint, for printing.
    pub fn table(&self) -> HeapTable {
        let state = self.state.lock();
        HeapTable {
            rows: [
                ("Mark Start", state.at_mark_start),
                ("Mark End", state.at_mark_end),
                ("Relocate Start", state.at_relocate_start),
                ("Relocate End", state.at_relocate_end),
            ],
        }
    }
}

impl Default for StatHeap {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HeapTable {
    rows: [(&'static str, HeapCheckpoint); 4],
}

impl fmt::Display for HeapTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<16}{:>16}{:>16}{:>16}{:>16}{:>16}",
            "", "Capacity", "Used", "Free", "Live", "Reclaimed"
        )?;
        for (name, row) in self.rows.iter() {
            writeln!(
                f,
                "{:<16}{:>16}{:>16}{:>16}{:>16}{:>16}",
                name,
                format!(
                    "{}({:.0}%)",
                    formatted_size(row.capacity),
                    percent_of(row.capacity, row.soft_max_capacity)
                ),
                format!(
                    "{}({:.0}%)",
                    formatted_size(row.used),
                    percent_of(row.used, row.capacity)
                ),
                formatted_size(row.free).to_string(),
                formatted_size(row.live).to_string(),
                formatted_size(row.reclaimed).to_string(),
            )?;
        }
        Ok(())
    }
}
