use crossbeam_utils::CachePadded;
use std::{
    cell::Cell,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use super::StatUnit;

/// Aggregate of the samples recorded during one interval.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct SamplerData {
    pub nsamples: u64,
    pub sum: u64,
    pub max: u64,
}

impl SamplerData {
    pub fn add(&mut self, other: &SamplerData) {
        self.nsamples += other.nsamples;
        self.sum += other.sum;
        self.max = self.max.max(other.max);
    }

    pub fn avg(&self) -> u64 {
        if self.nsamples > 0 {
            self.sum / self.nsamples
        } else {
            0
        }
    }
}

static NEXT_THREAD_SLOT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_SLOT: Cell<Option<usize>> = Cell::new(None);
}

fn thread_slot() -> usize {
    THREAD_SLOT.with(|slot| match slot.get() {
        Some(id) => id,
        None => {
            let id = NEXT_THREAD_SLOT.fetch_add(1, Ordering::Relaxed);
            slot.set(Some(id));
            id
        }
    })
}

/// Index of the per-CPU slot the calling thread should update.
#[inline]
pub(crate) fn current_slot(nslots: usize) -> usize {
    #[cfg(target_os = "linux")]
    {
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu >= 0 {
            return cpu as usize % nslots;
        }
    }
    thread_slot() % nslots
}

pub(crate) fn default_slots() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Default)]
struct SamplerSlot {
    nsamples: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

/// Lock-free sample sink. Any thread may `record`; one aggregator thread drains
/// it with `collect_and_reset` once per interval.
pub struct StatSampler {
    id: usize,
    group: &'static str,
    name: String,
    unit: StatUnit,
    slots: Box<[CachePadded<SamplerSlot>]>,
}

impl StatSampler {
    pub(crate) fn new(
        id: usize,
        group: &'static str,
        name: impl Into<String>,
        unit: StatUnit,
        nslots: usize,
    ) -> Self {
        Self {
            id,
            group,
            name: name.into(),
            unit,
            slots: (0..nslots.max(1))
                .map(|_| CachePadded::new(SamplerSlot::default()))
                .collect(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }
    pub fn group(&self) -> &'static str {
        self.group
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn unit(&self) -> StatUnit {
        self.unit
    }

    pub fn record(&self, value: u64) {
        let slot = &self.slots[current_slot(self.slots.len())];
        slot.nsamples.fetch_add(1, Ordering::Relaxed);
        slot.sum.fetch_add(value, Ordering::Relaxed);

        let mut max = slot.max.load(Ordering::Relaxed);
        loop {
            if max >= value {
                // Not max
                break;
            }
            match slot
                .max
                .compare_exchange_weak(max, value, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(prev) => max = prev,
            }
        }
    }

    pub fn collect_and_reset(&self) -> SamplerData {
        let mut all = SamplerData::default();
        for slot in self.slots.iter() {
            all.add(&SamplerData {
                nsamples: slot.nsamples.swap(0, Ordering::Relaxed),
                sum: slot.sum.swap(0, Ordering::Relaxed),
                max: slot.max.swap(0, Ordering::Relaxed),
            });
        }
        all
    }
}

/// Per-CPU event counter. Each interval its total is recorded into the paired
/// sampler, which then tracks the rate.
pub struct StatCounter {
    sampler: Arc<StatSampler>,
    slots: Box<[CachePadded<AtomicU64>]>,
}

impl StatCounter {
    pub(crate) fn new(sampler: Arc<StatSampler>, nslots: usize) -> Self {
        Self {
            sampler,
            slots: (0..nslots.max(1))
                .map(|_| CachePadded::new(AtomicU64::new(0)))
                .collect(),
        }
    }

    pub fn sampler(&self) -> &Arc<StatSampler> {
        &self.sampler
    }

    pub fn inc(&self, increment: u64) {
        self.slots[current_slot(self.slots.len())].fetch_add(increment, Ordering::Relaxed);
    }

    pub fn sample_and_reset(&self) -> u64 {
        let counter: u64 = self
            .slots
            .iter()
            .map(|slot| slot.swap(0, Ordering::Relaxed))
            .sum();
        self.sampler.record(counter);
        counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn collect_drains_everything_recorded() {
        let sampler = StatSampler::new(0, "Test", "Sampler", StatUnit::Time, 4);
        for v in [5, 1, 9, 3] {
            sampler.record(v);
        }
        let data = sampler.collect_and_reset();
        assert_eq!(
            data,
            SamplerData {
                nsamples: 4,
                sum: 18,
                max: 9
            }
        );
        assert_eq!(data.avg(), 4);
        assert_eq!(sampler.collect_and_reset(), SamplerData::default());
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let sampler = Arc::new(StatSampler::new(0, "Test", "Sampler", StatUnit::Bytes, 8));
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let sampler = sampler.clone();
                thread::spawn(move || {
                    for i in 0..1000u64 {
                        sampler.record(t * 1000 + i);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let data = sampler.collect_and_reset();
        assert_eq!(data.nsamples, 8000);
        assert_eq!(data.sum, (0..8000u64).sum::<u64>());
        assert_eq!(data.max, 7999);
    }

    #[test]
    fn counter_feeds_its_sampler() {
        let sampler = Arc::new(StatSampler::new(0, "Test", "Rate", StatUnit::OpsPerSecond, 2));
        let counter = StatCounter::new(sampler.clone(), 2);
        counter.inc(3);
        counter.inc(4);
        assert_eq!(counter.sample_and_reset(), 7);
        assert_eq!(counter.sample_and_reset(), 0);
        let data = sampler.collect_and_reset();
        assert_eq!(data.nsamples, 2);
        assert_eq!(data.sum, 7);
        assert_eq!(data.max, 7);
    }

    #[test]
    fn empty_average_is_zero() {
        assert_eq!(SamplerData::default().avg(), 0);
    }
}
