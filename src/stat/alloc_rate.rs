use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use crate::{heap::Heap, monitor::Monitor, seq::TruncatedSeq, utils::align_up, utils::M};

/// Soft max capacity is split into this many sampling granules.
pub const SAMPLING_HEAP_GRANULES: usize = 128;

/// Mutator allocation rate in bytes per second.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct MutatorAllocRateStats {
    pub avg: f64,
    pub predict: f64,
    pub sd: f64,
}

struct RateState {
    last_sample_time: Instant,
    samples_time: TruncatedSeq,
    samples_bytes: TruncatedSeq,
    rate: TruncatedSeq,
}

/// Allocation rate model fed from mutator allocation paths.
///
/// Bytes are accumulated in a shared counter; whoever pushes it over the
/// sampling granule tries to take a sample. Losing the try-lock means another
/// thread is already sampling and is not an error.
pub struct StatMutatorAllocRate {
    state: Mutex<RateState>,
    sampling_granule: AtomicUsize,
    allocated_since_sample: AtomicUsize,
    granule_size: usize,
    heap: Arc<dyn Heap>,
    director: Arc<Monitor>,
}

impl StatMutatorAllocRate {
    pub fn new(
        heap: Arc<dyn Heap>,
        director: Arc<Monitor>,
        granule_size: usize,
        sample_hz: u64,
    ) -> Self {
        let len = sample_hz.max(1) as usize;
        let this = Self {
            state: Mutex::new(RateState {
                last_sample_time: Instant::now(),
                samples_time: TruncatedSeq::new(len),
                samples_bytes: TruncatedSeq::new(len),
                rate: TruncatedSeq::new(len),
            }),
            sampling_granule: AtomicUsize::new(0),
            allocated_since_sample: AtomicUsize::new(0),
            granule_size,
            heap,
            director,
        };
        this.update_sampling_granule();
        this
    }

    fn update_sampling_granule(&self) {
        let soft_max_capacity = self.heap.soft_max_capacity();
        let granule = align_up(soft_max_capacity / SAMPLING_HEAP_GRANULES, self.granule_size);
        self.sampling_granule
            .store(granule.max(self.granule_size), Ordering::Relaxed);
    }

    pub fn sampling_granule(&self) -> usize {
        self.sampling_granule.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> MutatorAllocRateStats {
        let state = self.state.lock();
        MutatorAllocRateStats {
            avg: state.rate.avg(),
            predict: state.rate.predict_next(),
            sd: state.rate.sd(),
        }
    }

    /// Returns `true` when this call took a sample.
    pub fn sample_allocation(&self, allocation_bytes: usize) -> bool {
        self.sample_allocation_at(allocation_bytes, Instant::now())
    }

    pub(crate) fn sample_allocation_at(&self, allocation_bytes: usize, now: Instant) -> bool {
        let allocated = self
            .allocated_since_sample
            .fetch_add(allocation_bytes, Ordering::Relaxed)
            + allocation_bytes;
        if allocated < self.sampling_granule() {
            return false;
        }

        let mut state = match self.state.try_lock() {
            Some(state) => state,
            // Someone beat us to it
            None => return false,
        };

        let allocated_sample = self.allocated_since_sample.load(Ordering::Relaxed);
        if allocated_sample < self.sampling_granule() {
            // Someone beat us to it
            return false;
        }

        let elapsed = now.saturating_duration_since(state.last_sample_time);
        if elapsed.is_zero() {
            // Avoid sampling nonsense allocation rates
            return false;
        }

        self.allocated_since_sample
            .fetch_sub(allocated_sample, Ordering::Relaxed);

        state.samples_time.add(elapsed.as_secs_f64());
        state.samples_bytes.add(allocated_sample as f64);

        let bytes_per_second = state.samples_bytes.sum() / state.samples_time.sum();
        state.rate.add(bytes_per_second);

        self.update_sampling_granule();
        state.last_sample_time = now;

        log::debug!(
            target: "gc::alloc",
            "Mutator Allocation Rate: {:.1}MB/s Predicted: {:.1}MB/s, Avg: {:.1}(+/-{:.1})MB/s",
            bytes_per_second / M as f64,
            state.rate.predict_next() / M as f64,
            state.rate.avg() / M as f64,
            state.rate.sd() / M as f64
        );

        drop(state);
        self.director.notify();
        true
    }
}
