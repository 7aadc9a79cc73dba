use crate::generation::GenerationId;

/// View of the heap the pacer needs. Implemented by the page allocator / heap of
/// the collector being driven.
///
/// Every method may be called concurrently from the director, the drivers and
/// mutator threads, so implementations must be cheap and non-blocking.
pub trait Heap: Send + Sync {
    /// Adjustable heap ceiling the heuristics try to stay under.
    fn soft_max_capacity(&self) -> usize;

    /// Currently committed capacity.
    fn capacity(&self) -> usize;

    /// Hard ceiling. Defaults to the committed capacity.
    fn max_capacity(&self) -> usize {
        self.capacity()
    }

    fn used(&self) -> usize;

    fn used_in_generation(&self, generation: GenerationId) -> usize;

    /// Some mutator is waiting for memory.
    fn is_alloc_stalling(&self) -> bool;

    /// Some mutator is waiting for memory only an old collection can free.
    fn is_alloc_stalling_for_old(&self) -> bool;

    /// Memory kept free for relocation, never counted as free by the rules.
    fn relocation_headroom(&self) -> usize;

    /// Called after a young collection so stalled allocations can be retried.
    fn handle_alloc_stalling_for_young(&self) {}

    /// Called after a major collection so stalled allocations can be retried or failed.
    fn handle_alloc_stalling_for_old(&self, _cleared_all_soft_refs: bool) {}
}

/// Free memory below `capacity` with the relocation headroom taken out.
pub fn free_below(capacity: usize, used: usize, headroom: usize) -> usize {
    let free_including_headroom = capacity - capacity.min(used);
    free_including_headroom - free_including_headroom.min(headroom)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_excludes_headroom_and_never_underflows() {
        assert_eq!(free_below(100, 40, 10), 50);
        assert_eq!(free_below(100, 95, 10), 0);
        assert_eq!(free_below(100, 200, 10), 0);
        assert_eq!(free_below(0, 0, 0), 0);
    }
}
