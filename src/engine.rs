use parking_lot::Mutex;
use std::sync::{atomic::Ordering, Arc};

use crate::{
    cause::GcCause,
    collector::Collector,
    context::GcContext,
    director::{Director, DirectorStats},
    driver::{DriverRequest, MajorDriver, MinorDriver},
    error::EngineError,
    generation::{Generation, GenerationId},
    heap::Heap,
    service_thread::ServiceThread,
    stat::{service::StatService, StatRegistry},
    Config,
};

enum EngineState {
    Created,
    Running(Vec<ServiceThread>),
    Stopped,
}

/// Owns the director, both drivers and the statistics service.
///
/// There is exactly one of each per engine; they reach each other through the
/// engine's shared context rather than through globals.
pub struct GcEngine {
    context: Arc<GcContext>,
    minor: Arc<MinorDriver>,
    major: Arc<MajorDriver>,
    director: Arc<Director>,
    stat: Arc<StatService>,
    state: Mutex<EngineState>,
}

impl GcEngine {
    pub fn new(
        config: Config,
        heap: Arc<dyn Heap>,
        collector: Arc<dyn Collector>,
    ) -> Result<Self, EngineError> {
        Self::with_registry(config, heap, collector, Arc::new(StatRegistry::new()))
    }

    pub fn with_registry(
        config: Config,
        heap: Arc<dyn Heap>,
        collector: Arc<dyn Collector>,
        registry: Arc<StatRegistry>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let stat = Arc::new(StatService::new(
            registry.clone(),
            config.statistics_interval,
            config.verbose,
        ));
        let context = Arc::new(GcContext::with_registry(config, heap, collector, registry));
        let minor = Arc::new(MinorDriver::new(context.clone()));
        let major = Arc::new(MajorDriver::new(context.clone(), minor.clone()));
        let director = Arc::new(Director::new(
            context.clone(),
            minor.clone(),
            major.clone(),
        ));

        Ok(Self {
            context,
            minor,
            major,
            director,
            stat,
            state: Mutex::new(EngineState::Created),
        })
    }

    /// Spawns every service thread. An engine is started at most once.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if !matches!(*state, EngineState::Created) {
            return Err(EngineError::AlreadyStarted);
        }

        let mut threads = Vec::with_capacity(4);
        // Drivers first so the director never posts to a port nobody drains
        threads.push(ServiceThread::start("MinorDriver", self.minor.clone())?);
        threads.push(ServiceThread::start("MajorDriver", self.major.clone())?);
        threads.push(ServiceThread::start("StatService", self.stat.clone())?);
        threads.push(ServiceThread::start("Director", self.director.clone())?);

        log::info!(
            target: "gc::init",
            "Pacer started: young workers {}, old workers {}, concurrent budget {}, dynamic {}",
            self.context.config.young_gc_threads,
            self.context.config.old_gc_threads,
            self.context.config.conc_gc_threads,
            self.context.config.dynamic_worker_threads
        );
        *state = EngineState::Running(threads);
        Ok(())
    }

    /// Aborts running collections, stops every thread and joins it. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        let threads = match std::mem::replace(&mut *state, EngineState::Stopped) {
            EngineState::Running(threads) => threads,
            _ => return,
        };

        self.context.abort.abort();
        // Director first so it stops posting, then the minor driver, which
        // releases a major collection waiting for its young part
        for name in ["Director", "StatService", "MinorDriver", "MajorDriver"] {
            if let Some(thread) = threads.iter().find(|thread| thread.name() == name) {
                thread.stop();
            }
        }
        log::info!(target: "gc::init", "Pacer stopped");
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), EngineState::Running(_))
    }

    /// Requests a collection on behalf of the application or tooling.
    ///
    /// Blocks until the collection completes for causes that need to observe
    /// it, returns right away otherwise.
    pub fn collect(&self, cause: GcCause) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        if cause.is_user_requested() {
            log::info!(target: "gc", "Collection requested: {}", cause);
        }
        // Zero workers means the configured caps
        let request = DriverRequest::new(cause, 0, 0);
        match cause {
            GcCause::NoGc | GcCause::MajorYoung | GcCause::MajorYoungPreclean => {
                Err(EngineError::UnsupportedCause(cause))
            }
            GcCause::WhiteboxYoungGc => Ok(self.minor.collect(request)?),
            _ => Ok(self.major.collect(request)?),
        }
    }

    /// Records a mutator allocation of `bytes`.
    pub fn sample_allocation(&self, bytes: usize) {
        self.context.allocated.inc(bytes as u64);
        self.context.alloc_rate.sample_allocation(bytes);
    }

    /// Cause of the collection in progress, the major one taking precedence.
    pub fn gc_cause(&self) -> GcCause {
        let major = self.context.major_cause.load(Ordering::Relaxed);
        if major != GcCause::NoGc {
            major
        } else {
            self.context.minor_cause.load(Ordering::Relaxed)
        }
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    pub fn registry(&self) -> &Arc<StatRegistry> {
        &self.context.registry
    }

    pub fn generation(&self, id: GenerationId) -> &Generation {
        self.context.generation(id)
    }

    pub fn minor_driver(&self) -> &MinorDriver {
        &self.minor
    }

    pub fn major_driver(&self) -> &MajorDriver {
        &self.major
    }

    /// What the director would see right now.
    pub fn director_stats(&self) -> DirectorStats {
        self.director.sample()
    }

    pub fn stat_service(&self) -> &StatService {
        &self.stat
    }
}

impl Drop for GcEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
