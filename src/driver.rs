//! Drivers run the collections the director (or the application) asks for.
//!
//! Each driver owns a thread parked on its [`DriverPort`]. For every request
//! it takes the driver lock, brackets the generation's statistics around the
//! collector call, acknowledges the port, lets stalled allocations retry and
//! wakes the director so a back to back cycle can start right away.

pub mod major;
pub mod minor;
pub mod port;

pub use major::MajorDriver;
pub use minor::MinorDriver;
pub use port::{DriverPort, DriverRequest};

use crate::{
    cause::GcCause,
    collector::Cycle,
    context::GcContext,
    error::CycleAborted,
    generation::{Generation, YoungType},
    utils::{clamp_u32, formatted_size, percent_of},
};

/// Runs one collection of `generation`. The cycle statistics are always closed;
/// the trained averages only learn from collections that were not aborted.
#[allow(clippy::too_many_arguments)]
pub(crate) fn collect_generation(
    context: &GcContext,
    generation: &Generation,
    gc_id: u64,
    cause: GcCause,
    young_type: Option<YoungType>,
    clear_soft_references: bool,
    nworkers: u32,
    collect: impl FnOnce(&Cycle<'_>) -> Result<(), CycleAborted>,
) -> Result<(), CycleAborted> {
    let cycle = Cycle::new(
        gc_id,
        cause,
        young_type,
        clear_soft_references,
        generation,
        context.heap.as_ref(),
        &context.abort,
        &context.registry,
    );

    generation.increment_total_collections();
    generation.set_requested_workers(nworkers);
    let before = cycle.heap_usage(0);
    generation.stat_heap().at_collection_start(&before);
    generation.stat_cycle().at_start();

    let result = {
        let _timer = cycle.timer(generation.phase());
        collect(&cycle)
    };

    let record_stats = result.is_ok() && !context.abort.should_abort();
    if generation.stat_workers().active_workers() != 0 {
        // Collector bailed out of a gang
        generation.stat_workers().at_end();
    }
    generation
        .stat_cycle()
        .at_end(generation.stat_workers(), record_stats);

    let after = cycle.heap_usage(0);
    if record_stats {
        log::info!(
            target: "gc",
            "GC({}) {}: {} ({}) {}({:.0}%)->{}({:.0}%)",
            gc_id,
            generation.id().tag(),
            generation.phase().name(),
            cause,
            formatted_size(before.used),
            percent_of(before.used, before.capacity),
            formatted_size(after.used),
            percent_of(after.used, after.capacity)
        );
    } else {
        log::info!(
            target: "gc",
            "GC({}) {}: {} ({}) Aborted",
            gc_id,
            generation.id().tag(),
            generation.phase().name(),
            cause
        );
    }
    result
}

/// Worker count a request asks for, within `[1, cap]`. Zero means "use the cap".
pub(crate) fn request_workers(requested: u32, cap: u32) -> u32 {
    if requested == 0 {
        cap.max(1)
    } else {
        clamp_u32(requested, 1, cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::testing::context, Config};

    #[test]
    fn request_workers_are_clamped() {
        assert_eq!(request_workers(0, 4), 4);
        assert_eq!(request_workers(9, 4), 4);
        assert_eq!(request_workers(2, 4), 2);
        assert_eq!(request_workers(0, 0), 1);
    }

    #[test]
    fn aborted_collection_is_not_recorded() {
        let (_, _, context) = context(Config::default());
        let young = &context.young;

        let ok = collect_generation(
            &context,
            young,
            0,
            GcCause::Timer,
            Some(YoungType::Minor),
            false,
            2,
            |cycle| {
                cycle.run_workers(|_| ());
                Ok(())
            },
        );
        assert!(ok.is_ok());
        assert_eq!(young.stat_cycle().nwarmup_cycles(), 1);
        assert_eq!(young.total_collections(), 1);

        let aborted = collect_generation(
            &context,
            young,
            1,
            GcCause::Timer,
            Some(YoungType::Minor),
            false,
            2,
            |cycle| {
                cycle.run_workers(|_| ());
                Err(CycleAborted)
            },
        );
        assert_eq!(aborted, Err(CycleAborted));
        assert_eq!(young.stat_cycle().nwarmup_cycles(), 1);
        assert_eq!(young.total_collections(), 2);
        assert!(!young.stat_cycle().stats().is_active);
    }
}
