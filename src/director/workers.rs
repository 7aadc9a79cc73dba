//! Worker count selection for young and old collections.

use super::stats::DirectorStats;
use crate::{utils::clamp_u32, Config};

/// Allocation rate deviation, relative to its average, above which the rate is
/// considered unsteady.
pub const UNSTEADY_SD_PERCENT: f64 = 0.15;

/// Shortest time a collection is assumed to be able to finish in.
const MIN_GC_DEADLINE: f64 = 0.001;

/// How `select_worker_threads` treats the concurrent thread budget.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WorkerSelection {
    /// Only one generation is being collected, no budget applies.
    Normal,
    /// A major collection starts, old workers are fitted around the young ones.
    StartMajor,
    /// A young collection runs while the old one is active, both are fitted.
    MinorDuringOld,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WorkerCounts {
    pub young: u32,
    pub old: u32,
}

/// Workers needed to finish `parallelizable_gc_time` of work before the deadline.
pub fn estimated_gc_workers(
    serial_gc_time: f64,
    parallelizable_gc_time: f64,
    time_until_deadline: f64,
) -> f64 {
    let parallelizable_time_until_deadline = (time_until_deadline - serial_gc_time).max(MIN_GC_DEADLINE);
    parallelizable_gc_time / parallelizable_time_until_deadline
}

/// Rounds a fractional worker estimate up into `[1, max_workers]`.
pub fn discrete_gc_workers(gc_workers: f64, max_workers: u32) -> u32 {
    let max_workers = max_workers.max(1);
    if gc_workers.is_nan() {
        // Nothing sensible to go on
        return max_workers;
    }
    gc_workers.ceil().clamp(1.0, max_workers as f64) as u32
}

pub fn discrete_young_gc_workers(config: &Config, gc_workers: f64) -> u32 {
    discrete_gc_workers(gc_workers, config.young_gc_threads)
}

/// Young workers for a collection starting now, with hysteresis against
/// lowering the count when the next cycle would need it raised again.
pub fn select_young_gc_workers(
    config: &Config,
    stats: &DirectorStats,
    serial_gc_time: f64,
    parallelizable_gc_time: f64,
    alloc_rate_sd_percent: f64,
    time_until_oom: f64,
) -> f64 {
    // Use all workers until we're warm
    if !stats.old.cycle.is_warm {
        return config.young_gc_threads as f64;
    }

    let avoid_oom_gc_workers =
        estimated_gc_workers(serial_gc_time, parallelizable_gc_time, time_until_oom);
    let last_gc_workers = stats.young.cycle.last_active_workers;

    if alloc_rate_sd_percent >= UNSTEADY_SD_PERCENT {
        // Allocation rate is unsteady, be generous
        let half_gc_workers = config.young_gc_threads as f64 / 2.0;
        return avoid_oom_gc_workers
            .max(last_gc_workers)
            .max(half_gc_workers);
    }

    let actual_gc_workers = discrete_young_gc_workers(config, avoid_oom_gc_workers) as f64;
    if actual_gc_workers < last_gc_workers {
        // Before lowering the count, check whether the next cycle would raise
        // it right back up. If so, keep what the next cycle needs.
        let gc_duration_delta =
            parallelizable_gc_time / actual_gc_workers - parallelizable_gc_time / last_gc_workers;
        let additional_time_for_allocations = stats.young.cycle.time_since_last
            - gc_duration_delta
            - config.sample_interval();
        let next_time_until_oom = time_until_oom + additional_time_for_allocations;
        let next_avoid_oom_gc_workers =
            estimated_gc_workers(serial_gc_time, parallelizable_gc_time, next_time_until_oom);

        // Add 0.5 to increase friction and avoid lowering too eagerly
        let next_gc_workers = next_avoid_oom_gc_workers + 0.5;
        return next_gc_workers.max(actual_gc_workers).min(last_gc_workers);
    }

    avoid_oom_gc_workers
}

fn gc_time(serial: f64, parallelizable: f64) -> f64 {
    serial + parallelizable
}

fn bytes_freed_per_gc_time(reclaimed: usize, gc_time: f64) -> f64 {
    if gc_time > 0.0 {
        reclaimed as f64 / gc_time
    } else {
        0.0
    }
}

/// Old workers per young worker, proportional to how efficiently each
/// generation frees memory.
pub fn calculate_young_to_old_worker_ratio(config: &Config, stats: &DirectorStats) -> f64 {
    if !stats.old.cycle.is_time_trustable {
        return 1.0;
    }

    let young = &stats.young;
    let old = &stats.old;
    let young_gc_time = gc_time(young.cycle.avg_serial_time, young.cycle.avg_parallelizable_time);
    let old_gc_time = gc_time(old.cycle.avg_serial_time, old.cycle.avg_parallelizable_time);
    let young_efficiency = bytes_freed_per_gc_time(young.heap.reclaimed_avg, young_gc_time);
    let old_efficiency = bytes_freed_per_gc_time(old.heap.reclaimed_avg, old_gc_time);

    if young_efficiency == 0.0 {
        if old_efficiency == 0.0 {
            return 1.0;
        }
        // Old is infinitely more efficient
        return config.old_gc_threads as f64;
    }

    let ratio = old_efficiency / young_efficiency;
    log::debug!(
        target: "gc::director",
        "Young to old worker ratio: {:.3}, young: {:.1}MB/s, old: {:.1}MB/s",
        ratio,
        young_efficiency / crate::utils::M as f64,
        old_efficiency / crate::utils::M as f64
    );
    ratio
}

/// Picks young and old worker counts. `young_workers` is the young count the
/// caller wants; the old count follows from the efficiency ratio.
pub fn select_worker_threads(
    config: &Config,
    stats: &DirectorStats,
    young_workers: u32,
    selection: WorkerSelection,
) -> WorkerCounts {
    let young_cap = config.young_gc_threads;
    let old_cap = config.old_gc_threads;
    let conc_cap = config.conc_gc_threads;

    if stats.heap.is_alloc_stalling {
        // Boost both generations, something is waiting for memory
        return WorkerCounts {
            young: young_cap,
            old: old_cap,
        };
    }

    let active_young = stats.young.resize.nworkers_current;
    let active_old = stats.old.resize.nworkers_current;
    if active_young + active_old > conc_cap {
        // Still running with boosted counts, keep them. An idle generation
        // reports 0 and gets the minimum.
        return WorkerCounts {
            young: clamp_u32(active_young, 1, young_cap),
            old: clamp_u32(active_old, 1, old_cap),
        };
    }

    let ratio = calculate_young_to_old_worker_ratio(config, stats);
    let mut young = clamp_u32(young_workers, 1, young_cap);
    // Saturates to zero on NaN
    let mut old = clamp_u32((young as f64 * ratio) as u32, 1, old_cap);

    if selection != WorkerSelection::Normal && young + old > conc_cap {
        let old_ratio = ratio / (1.0 + ratio);
        let young_ratio = 1.0 - old_ratio;
        let young_clamped = clamp_u32((conc_cap as f64 * young_ratio) as u32, 1, young_cap);
        let old_clamped = clamp_u32(conc_cap.saturating_sub(young_clamped), 1, old_cap);

        if selection == WorkerSelection::StartMajor {
            old = old_clamped;
        } else {
            young = young_clamped;
            old = old_clamped;
        }
    }

    WorkerCounts { young, old }
}
