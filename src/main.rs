//! Drives the pacer with a simulated heap and collector.
//!
//! A mutator thread allocates at a varying rate; the simulated collector
//! promotes a share of the young generation and frees the rest, taking time
//! proportional to the live data divided by its worker count.
//!
//! `RUST_LOG=gc=debug,gc::director=debug cargo run --bin pacer-sim`
use parking_lot::{Condvar, Mutex};
use pacer::{
    collector::{Collector, Cycle},
    generation::{GenerationId, YoungType},
    heap::Heap,
    utils::{formatted_size, M},
    Config, CycleAborted, GcCause, GcEngine,
};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

struct SimHeap {
    capacity: usize,
    used_young: AtomicUsize,
    used_old: AtomicUsize,
    stalling: AtomicBool,
    stall_lock: Mutex<()>,
    stall_cv: Condvar,
}

impl SimHeap {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used_young: AtomicUsize::new(0),
            used_old: AtomicUsize::new(0),
            stalling: AtomicBool::new(false),
            stall_lock: Mutex::new(()),
            stall_cv: Condvar::new(),
        }
    }

    fn try_allocate(&self, bytes: usize) -> bool {
        if self.used() + bytes > self.capacity {
            return false;
        }
        self.used_young.fetch_add(bytes, Ordering::Relaxed);
        true
    }

    fn wait_for_memory(&self) {
        self.stalling.store(true, Ordering::Relaxed);
        let mut guard = self.stall_lock.lock();
        self.stall_cv
            .wait_for(&mut guard, Duration::from_millis(10));
    }

    fn wake_stalled(&self) {
        self.stalling.store(false, Ordering::Relaxed);
        let _guard = self.stall_lock.lock();
        self.stall_cv.notify_all();
    }
}

impl Heap for SimHeap {
    fn soft_max_capacity(&self) -> usize {
        self.capacity
    }
    fn capacity(&self) -> usize {
        self.capacity
    }
    fn used(&self) -> usize {
        self.used_young.load(Ordering::Relaxed) + self.used_old.load(Ordering::Relaxed)
    }
    fn used_in_generation(&self, generation: GenerationId) -> usize {
        match generation {
            GenerationId::Young => self.used_young.load(Ordering::Relaxed),
            GenerationId::Old => self.used_old.load(Ordering::Relaxed),
        }
    }
    fn is_alloc_stalling(&self) -> bool {
        self.stalling.load(Ordering::Relaxed)
    }
    fn is_alloc_stalling_for_old(&self) -> bool {
        self.is_alloc_stalling() && self.used_old.load(Ordering::Relaxed) > self.capacity / 2
    }
    fn relocation_headroom(&self) -> usize {
        self.capacity / 64
    }
    fn handle_alloc_stalling_for_young(&self) {
        self.wake_stalled();
    }
    fn handle_alloc_stalling_for_old(&self, _cleared_all_soft_refs: bool) {
        self.wake_stalled();
    }
}

struct SimCollector {
    heap: Arc<SimHeap>,
    /// Seconds of single threaded work per live megabyte.
    cost_per_mb: f64,
    young_survival: f64,
    old_survival: f64,
}

impl SimCollector {
    fn work(&self, cycle: &Cycle<'_>, live: usize) -> Result<(), CycleAborted> {
        let total = self.cost_per_mb * (live / M) as f64;
        let mut done = 0.0;
        cycle.run_workers(|mut nworkers| {
            while done < total {
                cycle.abort_point()?;
                if let Some(resized) = cycle.resize_workers() {
                    nworkers = resized;
                }
                let slice = 0.002;
                std::thread::sleep(Duration::from_secs_f64(slice));
                done += slice * nworkers as f64;
            }
            Ok(())
        })
    }
}

impl Collector for SimCollector {
    fn collect_young(&self, young_type: YoungType, cycle: &Cycle<'_>) -> Result<(), CycleAborted> {
        cycle.at_mark_start();
        let young = self.heap.used_young.load(Ordering::Relaxed);
        let survival = match young_type {
            YoungType::MajorFullPreclean => 1.0,
            _ => self.young_survival,
        };
        let live = (young as f64 * survival) as usize;
        self.work(cycle, live)?;
        cycle.at_mark_end(live);

        cycle.abort_point()?;
        cycle.at_relocate_start();
        // Survivors are promoted
        self.heap.used_young.fetch_sub(young, Ordering::Relaxed);
        self.heap.used_old.fetch_add(live, Ordering::Relaxed);
        cycle.at_relocate_end(young - live);
        Ok(())
    }

    fn collect_old(&self, cycle: &Cycle<'_>) -> Result<(), CycleAborted> {
        cycle.at_mark_start();
        let old = self.heap.used_old.load(Ordering::Relaxed);
        let live = (old as f64 * self.old_survival) as usize;
        self.work(cycle, live)?;
        cycle.at_mark_end(live);

        cycle.abort_point()?;
        cycle.at_relocate_start();
        let reclaimed = old - live;
        self.heap.used_old.fetch_sub(reclaimed, Ordering::Relaxed);
        cycle.at_relocate_end(reclaimed);
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("gc=info")).init();

    let seconds: u64 = env_or("PACER_SIM_SECONDS", 10);
    let heap_mb: usize = env_or("PACER_SIM_HEAP_MB", 512);

    let heap = Arc::new(SimHeap::new(heap_mb * M));
    let collector = Arc::new(SimCollector {
        heap: heap.clone(),
        cost_per_mb: 0.004,
        young_survival: 0.1,
        old_survival: 0.6,
    });

    let config = Config {
        statistics_interval: Duration::from_secs(2),
        verbose: true,
        ..Config::default()
    };
    let engine = GcEngine::new(config, heap.clone(), collector)?;
    engine.start()?;

    let start = Instant::now();
    let chunk = 256 * 1024;
    let mut allocated = 0usize;
    let mut stalls = 0usize;
    while start.elapsed() < Duration::from_secs(seconds) {
        // Allocation rate swings between ~50 and ~250 MB/s
        let phase = (start.elapsed().as_secs_f64() / 3.0).sin().abs();
        let per_ms = ((50.0 + 200.0 * phase) * M as f64 / 1000.0) as usize;
        let mut burst = 0;
        while burst < per_ms {
            if heap.try_allocate(chunk) {
                engine.sample_allocation(chunk);
                burst += chunk;
                allocated += chunk;
            } else {
                stalls += 1;
                if engine.gc_cause() == GcCause::NoGc {
                    engine.collect(GcCause::AllocationStall)?;
                }
                heap.wait_for_memory();
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    engine.collect(GcCause::SystemGc)?;
    log::info!(
        target: "gc",
        "Allocated {} in {}s, {} stalls, {} used at exit",
        formatted_size(allocated),
        seconds,
        stalls,
        formatted_size(heap.used())
    );
    engine.stop();
    Ok(())
}
