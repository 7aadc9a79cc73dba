use crossbeam_queue::ArrayQueue;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

use super::allocation_stats::FreeListCensus;

/// Free-list census of one heap region. Content is guarded by the entry's own
/// lock; the entry itself is shared through [`RegionStatsPool`].
pub struct RegionStats {
    index: usize,
    census: Mutex<FreeListCensus>,
}

impl RegionStats {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn lock(&self) -> MutexGuard<'_, FreeListCensus> {
        self.census.lock()
    }
}

/// Fixed set of [`RegionStats`] recycled through a lock-free free list.
///
/// Acquiring and releasing never takes a lock; only mutation of an entry's
/// census does, and that lock is private to the entry.
pub struct RegionStatsPool {
    entries: Vec<Arc<RegionStats>>,
    free: ArrayQueue<usize>,
}

impl RegionStatsPool {
    pub fn new(capacity: usize, sizes: &[usize]) -> Self {
        let capacity = capacity.max(1);
        let free = ArrayQueue::new(capacity);
        let entries = (0..capacity)
            .map(|index| {
                // The queue was sized for every entry
                let _ = free.push(index);
                Arc::new(RegionStats {
                    index,
                    census: Mutex::new(FreeListCensus::new(sizes, false)),
                })
            })
            .collect();
        Self { entries, free }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// `None` when every entry is in use.
    pub fn acquire(&self) -> Option<Arc<RegionStats>> {
        let index = self.free.pop()?;
        self.entries.get(index).cloned()
    }

    pub fn release(&self, stats: Arc<RegionStats>) {
        stats.lock().reset();
        if self.free.push(stats.index).is_err() {
            log::warn!(target: "gc::freelist", "region stats {} released twice", stats.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn pool_hands_out_each_entry_once() {
        let pool = RegionStatsPool::new(3, &[16, 32]);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        let indices: HashSet<usize> = [a.index(), b.index(), c.index()].into_iter().collect();
        assert_eq!(indices.len(), 3);

        pool.release(b);
        assert_eq!(pool.available(), 1);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn released_entries_come_back_clean() {
        let pool = RegionStatsPool::new(1, &[16]);
        let stats = pool.acquire().unwrap();
        stats.lock().class_mut(0).unwrap().count = 12;
        stats.lock().end_sweep();
        pool.release(stats);

        let again = pool.acquire().unwrap();
        let census = again.lock();
        assert_eq!(census.class(0).unwrap().count, 0);
        assert_eq!(census.sweep_count(), 0);
    }

    #[test]
    fn concurrent_acquire_release() {
        let pool = Arc::new(RegionStatsPool::new(4, &[8]));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Some(stats) = pool.acquire() {
                            stats.lock().class_mut(0).unwrap().count += 1;
                            pool.release(stats);
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(pool.available(), 4);
    }
}
