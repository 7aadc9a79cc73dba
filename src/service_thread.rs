use parking_lot::Mutex;
use std::{sync::Arc, thread::JoinHandle};

use crate::error::EngineError;

/// Body of a long running GC thread.
///
/// `run_service` owns the loop and returns once `stop_service` has been called
/// (from any thread).
pub trait ConcurrentService: Send + Sync + 'static {
    fn run_service(&self);
    fn stop_service(&self);
}

/// Owns the OS thread of one [`ConcurrentService`]: start, loop, stop-and-join.
pub struct ServiceThread {
    name: &'static str,
    service: Arc<dyn ConcurrentService>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceThread {
    pub fn start(
        name: &'static str,
        service: Arc<dyn ConcurrentService>,
    ) -> Result<Self, EngineError> {
        let runner = service.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || runner.run_service())
            .map_err(|source| EngineError::Spawn { name, source })?;
        log::trace!(target: "gc", "Started {} thread", name);
        Ok(Self {
            name,
            service,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Asks the service to stop and joins it. Idempotent.
    pub fn stop(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            self.service.stop_service();
            if handle.join().is_err() {
                log::error!(target: "gc", "{} thread panicked", self.name);
            }
            log::trace!(target: "gc", "Stopped {} thread", self.name);
        }
    }
}

impl Drop for ServiceThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Monitor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        monitor: Monitor,
        loops: AtomicUsize,
    }

    impl ConcurrentService for Counting {
        fn run_service(&self) {
            while self.monitor.wait(Duration::from_millis(1)) {
                self.loops.fetch_add(1, Ordering::Relaxed);
            }
        }
        fn stop_service(&self) {
            self.monitor.stop();
        }
    }

    #[test]
    fn stop_joins_the_loop() {
        let service = Arc::new(Counting {
            monitor: Monitor::new(),
            loops: AtomicUsize::new(0),
        });
        let thread = ServiceThread::start("Counting", service.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        thread.stop();
        let loops = service.loops.load(Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(loops, service.loops.load(Ordering::Relaxed));
        // second stop is a no-op
        thread.stop();
        assert_eq!(thread.name(), "Counting");
    }
}
