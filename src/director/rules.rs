//! The director's rules. Every rule is a pure function of the configuration and
//! one [`DirectorStats`] snapshot, so they can be evaluated and tested without
//! any thread running.

use super::{
    stats::DirectorStats,
    workers::{discrete_young_gc_workers, select_young_gc_workers},
};
use crate::{
    cause::GcCause,
    driver::DriverRequest,
    generation::GenerationStats,
    heap::free_below,
    utils::{percent_of, M},
    Config,
};

/// z-score of the one in a thousand upper bound.
pub const ONE_IN_1000: f64 = 3.290527;

/// Free memory share, of soft max capacity, at which a minor collection is forced.
pub const HIGH_USAGE_FREE_PERCENT: f64 = 5.0;

/// Fraction of the OOM horizon inside which the dynamic rule starts a collection.
pub const DYNAMIC_START_MARGIN: f64 = 0.05;

/// Throughput a proactive collection may cost the application, on average.
pub const ACCEPTABLE_THROUGHPUT_DROP: f64 = 0.01;

/// Share of the CPU a running collection is assumed to take from the application.
const ASSUMED_THROUGHPUT_DROP_DURING_GC: f64 = 0.50;

/// Proactive collections are considered once the heap grew this much (of soft
/// max capacity) since the last old collection...
const PROACTIVE_USED_GROWTH_PERCENT: f64 = 0.10;
/// ...or once this many seconds passed.
const PROACTIVE_TIME_THRESHOLD: f64 = 5.0 * 60.0;

fn mb(bytes: usize) -> usize {
    bytes / M
}

fn rule_timer(generation: &str, interval: f64, time_since_last: f64) -> bool {
    if interval <= 0.0 {
        // Rule disabled
        return false;
    }

    // Perform GC if timer has expired
    let time_until_gc = interval - time_since_last;
    log::debug!(
        target: "gc::director",
        "Rule {}: Timer, Interval: {:.3}s, TimeUntilGC: {:.3}s",
        generation,
        interval,
        time_until_gc
    );
    time_until_gc <= 0.0
}

pub fn rule_minor_timer(config: &Config, stats: &DirectorStats) -> bool {
    rule_timer(
        "Minor",
        config.collection_interval_minor,
        stats.young.cycle.time_since_last,
    )
}

pub fn rule_major_timer(config: &Config, stats: &DirectorStats) -> bool {
    rule_timer(
        "Major",
        config.collection_interval_major,
        stats.old.cycle.time_since_last,
    )
}

/// Serial and parallelizable time of a generation's next collection, each the
/// average plus the one in a thousand margin.
fn gc_times(generation: &GenerationStats) -> (f64, f64) {
    let cycle = &generation.cycle;
    (
        cycle.avg_serial_time + cycle.sd_serial_time * ONE_IN_1000,
        cycle.avg_parallelizable_time + cycle.sd_parallelizable_time * ONE_IN_1000,
    )
}

/// Allocation rate rule for a fixed number of young workers.
pub fn rule_minor_allocation_rate_static(config: &Config, stats: &DirectorStats) -> bool {
    // Calculate amount of free memory available. Note that we take the
    // relocation headroom into account to avoid in-place relocation.
    let free = free_below(
        stats.heap.soft_max_capacity,
        stats.heap.used,
        stats.heap.relocation_headroom,
    );

    // Calculate time until OOM given the max allocation rate and the amount
    // of free memory. The allocation rate is a moving average and we multiply
    // that with an allocation spike tolerance factor to guard against unforeseen
    // phase changes in the allocate rate. We then add ~3.3 sigma to account for
    // the allocation rate variance, which means the probability is 1 in 1000
    // that a sample is outside of the confidence interval.
    let rate = &stats.mutator_alloc_rate;
    let max_alloc_rate =
        rate.predict.max(rate.avg) * config.allocation_spike_tolerance + rate.sd * ONE_IN_1000;
    // Plus 1.0B/s to avoid division by zero
    let time_until_oom = free as f64 / (max_alloc_rate + 1.0);

    let (serial_gc_time, parallelizable_gc_time) = gc_times(&stats.young);
    let gc_duration = serial_gc_time + parallelizable_gc_time / config.young_gc_threads as f64;

    // Calculate time until GC given the time until OOM and GC duration. We also
    // subtract the sample interval, so that we don't overshoot the target time
    // and end up starting the GC too late in the next interval.
    let time_until_gc = time_until_oom - gc_duration - config.sample_interval();

    log::debug!(
        target: "gc::director",
        "Rule Minor: Allocation Rate (Static GC Workers), MaxAllocRate: {:.1}MB/s, Free: {}MB, GCDuration: {:.3}s, TimeUntilGC: {:.3}s",
        max_alloc_rate / M as f64,
        mb(free),
        gc_duration,
        time_until_gc
    );

    time_until_gc <= 0.0
}

/// Allocation rate rule that also picks the number of young workers.
///
/// `serial_gc_time_passed` and `parallel_gc_time_passed` are the times a
/// running collection has already spent, zero when evaluating a new one.
pub fn rule_minor_allocation_rate_dynamic(
    config: &Config,
    stats: &DirectorStats,
    serial_gc_time_passed: f64,
    parallel_gc_time_passed: f64,
    conservative_alloc_rate: bool,
    capacity: usize,
) -> DriverRequest {
    let free = free_below(capacity, stats.heap.used, stats.heap.relocation_headroom);

    let rate = &stats.mutator_alloc_rate;
    let alloc_rate_sd_percent = rate.sd / (rate.avg + 1.0);
    // Plus 1.0B/s to avoid division by zero
    let alloc_rate = if conservative_alloc_rate {
        rate.predict.max(rate.avg) * config.allocation_spike_tolerance
            + rate.sd * ONE_IN_1000
            + 1.0
    } else {
        rate.avg + 1.0
    };

    // Widen the estimate when the rate is noisy
    let time_until_oom = (free as f64 / alloc_rate) / (1.0 + alloc_rate_sd_percent);

    let (serial_gc_time, parallelizable_gc_time) = gc_times(&stats.young);
    let serial_gc_time = (serial_gc_time - serial_gc_time_passed).abs();
    let parallelizable_gc_time = (parallelizable_gc_time - parallel_gc_time_passed).abs();

    let gc_workers = select_young_gc_workers(
        config,
        stats,
        serial_gc_time,
        parallelizable_gc_time,
        alloc_rate_sd_percent,
        time_until_oom,
    );
    let actual_gc_workers = discrete_young_gc_workers(config, gc_workers);
    let gc_duration = serial_gc_time + parallelizable_gc_time / actual_gc_workers as f64;
    let time_until_gc = time_until_oom - gc_duration - config.sample_interval();

    log::debug!(
        target: "gc::director",
        "Rule Minor: Allocation Rate (Dynamic GC Workers), MaxAllocRate: {:.1}MB/s (+/-{:.1}%), Free: {}MB, GCCPUTime: {:.3}, GCDuration: {:.3}s, TimeUntilOOM: {:.3}s, TimeUntilGC: {:.3}s, GCWorkers: {}",
        alloc_rate / M as f64,
        alloc_rate_sd_percent * 100.0,
        mb(free),
        serial_gc_time + parallelizable_gc_time,
        gc_duration,
        time_until_oom,
        time_until_gc,
        actual_gc_workers
    );

    let cause = if time_until_gc <= time_until_oom * DYNAMIC_START_MARGIN {
        GcCause::AllocationRate
    } else {
        GcCause::NoGc
    };
    DriverRequest::new(cause, actual_gc_workers, 0)
}

pub fn rule_minor_allocation_rate(config: &Config, stats: &DirectorStats) -> DriverRequest {
    if config.collection_interval_only {
        // Rule disabled
        return DriverRequest::none();
    }

    if stats.heap.is_alloc_stalling_for_old {
        // Don't collect young if we have threads stalled waiting for an old collection
        return DriverRequest::none();
    }

    if !stats.young.cycle.is_time_trustable {
        // Rule disabled
        return DriverRequest::none();
    }

    if config.dynamic_worker_threads {
        let soft = rule_minor_allocation_rate_dynamic(
            config,
            stats,
            0.0,
            0.0,
            false,
            stats.heap.soft_max_capacity,
        );
        if !soft.is_none() {
            return soft;
        }
        rule_minor_allocation_rate_dynamic(config, stats, 0.0, 0.0, true, stats.heap.max_capacity)
    } else if rule_minor_allocation_rate_static(config, stats) {
        DriverRequest::new(GcCause::AllocationRate, config.young_gc_threads, 0)
    } else {
        DriverRequest::none()
    }
}

pub fn rule_minor_high_usage(config: &Config, stats: &DirectorStats) -> bool {
    if config.collection_interval_only {
        // Rule disabled
        return false;
    }

    // Perform GC if the amount of free memory is 5% or less. This is a
    // preventive measure in the case where the application has a very low
    // allocation rate, such that the allocation rate rule doesn't trigger,
    // but the amount of free memory is still slowly decreasing.
    let soft_max_capacity = stats.heap.soft_max_capacity;
    let free = free_below(
        soft_max_capacity,
        stats.heap.used,
        stats.heap.relocation_headroom,
    );
    let free_percent = percent_of(free, soft_max_capacity);

    log::debug!(
        target: "gc::director",
        "Rule Minor: High Usage, Free: {}MB({:.1}%)",
        mb(free),
        free_percent
    );

    free_percent <= HIGH_USAGE_FREE_PERCENT
}

pub fn rule_major_warmup(config: &Config, stats: &DirectorStats) -> bool {
    if config.collection_interval_only {
        // Rule disabled
        return false;
    }

    if stats.old.cycle.is_warm {
        // Rule disabled
        return false;
    }

    // Perform GC if heap usage passes 10/20/30% and no other GC has been
    // performed yet. This allows us to get some early samples of the GC
    // duration, which is needed by the other rules.
    let soft_max_capacity = stats.heap.soft_max_capacity;
    let used = stats.heap.used;
    let used_threshold_percent = (stats.old.cycle.nwarmup_cycles + 1) as f64 * 0.1;
    let used_threshold = (soft_max_capacity as f64 * used_threshold_percent) as usize;

    log::debug!(
        target: "gc::director",
        "Rule Major: Warmup {:.0}%, Used: {}MB, UsedThreshold: {}MB",
        used_threshold_percent * 100.0,
        mb(used),
        mb(used_threshold)
    );

    used >= used_threshold
}

pub fn rule_major_proactive(config: &Config, stats: &DirectorStats) -> bool {
    if config.collection_interval_only || !config.proactive {
        // Rule disabled
        return false;
    }

    if !stats.old.cycle.is_warm {
        // Rule disabled
        return false;
    }

    // Only consider doing a proactive GC if the heap usage has grown by at
    // least 10% of the max capacity since the previous GC, or more than 5
    // minutes has passed since the previous GC. This helps avoid superfluous
    // GCs when running applications with very low allocation rate.
    let used_after_last_gc = stats.old.heap.used_at_relocate_end;
    let used_increase_threshold =
        (stats.heap.soft_max_capacity as f64 * PROACTIVE_USED_GROWTH_PERCENT) as usize;
    let used_threshold = used_after_last_gc + used_increase_threshold;
    let used = stats.heap.used;
    let time_since_last_gc = stats.old.cycle.time_since_last;
    let time_since_last_gc_threshold = PROACTIVE_TIME_THRESHOLD;
    if used < used_threshold && time_since_last_gc < time_since_last_gc_threshold {
        // Don't even consider doing a proactive GC
        log::debug!(
            target: "gc::director",
            "Rule Major: Proactive, UsedUntilEnabled: {}MB, TimeUntilEnabled: {:.3}s",
            mb(used_threshold - used),
            time_since_last_gc_threshold - time_since_last_gc
        );
        return false;
    }

    let (old_serial, old_parallelizable) = gc_times(&stats.old);
    let (young_serial, young_parallelizable) = gc_times(&stats.young);
    let gc_duration = old_serial
        + old_parallelizable / config.old_gc_threads as f64
        + young_serial
        + young_parallelizable / config.young_gc_threads as f64;
    let acceptable_gc_interval =
        gc_duration * (ASSUMED_THROUGHPUT_DROP_DURING_GC / ACCEPTABLE_THROUGHPUT_DROP - 1.0);
    let time_until_gc = acceptable_gc_interval - time_since_last_gc;

    log::debug!(
        target: "gc::director",
        "Rule Major: Proactive, AcceptableGCInterval: {:.3}s, TimeSinceLastGC: {:.3}s, TimeUntilGC: {:.3}s",
        acceptable_gc_interval,
        time_since_last_gc,
        time_until_gc
    );

    time_until_gc <= 0.0
}

fn gc_time(generation: &GenerationStats) -> f64 {
    generation.cycle.avg_serial_time + generation.cycle.avg_parallelizable_time
}

/// Extra time each young collection spends because the old generation's
/// garbage is not being reclaimed.
pub fn calculate_extra_young_gc_time(stats: &DirectorStats) -> f64 {
    if !stats.old.cycle.is_time_trustable {
        return 0.0;
    }

    let old_garbage = stats
        .old
        .used
        .saturating_sub(stats.old.heap.live_at_mark_end) as f64;
    let young_gc_time = gc_time(&stats.young);
    let reclaimed_per_young_gc = stats.young.heap.reclaimed_avg as f64;

    // Current young time per byte freed, and what it would be if the old
    // garbage were reclaimable by young collections too. Plus one byte to
    // avoid division by zero.
    let current_young_gc_time_per_bytes_freed = young_gc_time / (reclaimed_per_young_gc + 1.0);
    let potential_young_gc_time_per_bytes_freed =
        young_gc_time / (reclaimed_per_young_gc + old_garbage + 1.0);

    let extra_young_gc_time_per_bytes_freed =
        current_young_gc_time_per_bytes_freed - potential_young_gc_time_per_bytes_freed;
    extra_young_gc_time_per_bytes_freed * (reclaimed_per_young_gc + old_garbage)
}

/// Whether the next young collection should be upgraded into a major one,
/// because its cost is amortized over the young collections that follow.
pub fn rule_major_allocation_rate(stats: &DirectorStats) -> bool {
    if !stats.old.cycle.is_time_trustable {
        // Rule disabled
        return false;
    }

    let old_gc_time = gc_time(&stats.old);
    let extra_young_gc_time = calculate_extra_young_gc_time(stats);

    // Number of young collections ahead to amortize an old collection over.
    // Taken as the number of young collections since the last old one started.
    let lookahead = stats
        .young
        .total_collections
        .saturating_sub(stats.old.total_collections_at_start);

    let extra_young_gc_time_for_lookahead = extra_young_gc_time * lookahead as f64;

    log::debug!(
        target: "gc::director",
        "Rule Major: Allocation Rate, ExtraYoungGCTime: {:.3}s, OldGCTime: {:.3}s, Lookahead: {}, ExtraYoungGCTimeForLookahead: {:.3}s",
        extra_young_gc_time,
        old_gc_time,
        lookahead,
        extra_young_gc_time_for_lookahead
    );

    // If the extra young collection overhead over the lookahead window is
    // larger than the cost of one old collection, upgrade.
    extra_young_gc_time_for_lookahead > old_gc_time
}
