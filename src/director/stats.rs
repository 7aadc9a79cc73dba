use crate::{
    context::GcContext,
    generation::{GenerationId, GenerationStats},
    stat::alloc_rate::MutatorAllocRateStats,
};

/// Heap numbers seen by one director evaluation.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct DirectorHeapStats {
    pub soft_max_capacity: usize,
    pub capacity: usize,
    pub max_capacity: usize,
    pub used: usize,
    pub relocation_headroom: usize,
    pub is_alloc_stalling: bool,
    pub is_alloc_stalling_for_old: bool,
}

/// Everything one evaluation of the rules looks at.
///
/// Each part is copied under its own lock. The parts are not taken at the same
/// instant, which is fine because no rule combines two of them and expects
/// them to agree.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct DirectorStats {
    pub mutator_alloc_rate: MutatorAllocRateStats,
    pub heap: DirectorHeapStats,
    pub young: GenerationStats,
    pub old: GenerationStats,
}

impl DirectorStats {
    pub(crate) fn sample(context: &GcContext) -> Self {
        let heap = context.heap.as_ref();
        // Sample the allocation rate first, the rules are more sensitive to it
        // being recent than the rest
        let mutator_alloc_rate = context.alloc_rate.stats();
        Self {
            mutator_alloc_rate,
            heap: DirectorHeapStats {
                soft_max_capacity: heap.soft_max_capacity(),
                capacity: heap.capacity(),
                max_capacity: heap.max_capacity(),
                used: heap.used(),
                relocation_headroom: heap.relocation_headroom(),
                is_alloc_stalling: heap.is_alloc_stalling(),
                is_alloc_stalling_for_old: heap.is_alloc_stalling_for_old(),
            },
            young: context
                .young
                .stats(heap.used_in_generation(GenerationId::Young)),
            old: context.old.stats(heap.used_in_generation(GenerationId::Old)),
        }
    }
}
