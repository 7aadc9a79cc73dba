use parking_lot::{Condvar, Mutex};
use std::{collections::VecDeque, sync::Arc};

use crate::{cause::GcCause, error::DriverError};

/// What the director (or the application) asks a driver to do.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DriverRequest {
    pub cause: GcCause,
    pub young_nworkers: u32,
    pub old_nworkers: u32,
}

impl DriverRequest {
    pub const fn new(cause: GcCause, young_nworkers: u32, old_nworkers: u32) -> Self {
        Self {
            cause,
            young_nworkers,
            old_nworkers,
        }
    }

    pub const fn none() -> Self {
        Self::new(GcCause::NoGc, 0, 0)
    }

    pub fn is_none(&self) -> bool {
        self.cause == GcCause::NoGc
    }
}

impl Default for DriverRequest {
    fn default() -> Self {
        Self::none()
    }
}

/// Completion handle of one synchronous send.
struct SyncEntry {
    request: DriverRequest,
    seqnum: u64,
    result: Mutex<Option<Result<(), DriverError>>>,
    cv: Condvar,
}

impl SyncEntry {
    fn satisfy(&self, result: Result<(), DriverError>) {
        let mut slot = self.result.lock();
        *slot = Some(result);
        self.cv.notify_all();
    }

    fn wait(&self) -> Result<(), DriverError> {
        let mut slot = self.result.lock();
        loop {
            if let Some(result) = *slot {
                return result;
            }
            self.cv.wait(&mut slot);
        }
    }
}

struct PortState {
    /// Request being worked on, between `receive` and `ack`.
    active: Option<DriverRequest>,
    /// Latest asynchronous request not yet received. Later sends overwrite it.
    pending: Option<DriverRequest>,
    queue: VecDeque<Arc<SyncEntry>>,
    seqnum: u64,
    shutdown: bool,
}

/// Single slot mailbox in front of a driver.
///
/// Asynchronous sends never block and never queue: a newer one replaces an
/// older one that has not been received yet. Synchronous sends block until a
/// cycle that started after the send has been acknowledged.
pub struct DriverPort {
    state: Mutex<PortState>,
    cv: Condvar,
}

impl DriverPort {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PortState {
                active: None,
                pending: None,
                queue: VecDeque::new(),
                seqnum: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// A request is posted or being worked on.
    pub fn is_busy(&self) -> bool {
        let state = self.state.lock();
        state.active.is_some() || state.pending.is_some() || !state.queue.is_empty()
    }

    /// Replaces any pending async request. Fails once the port is shut down.
    pub fn send_async(&self, request: DriverRequest) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(DriverError::Shutdown);
        }
        state.pending = Some(request);
        self.cv.notify_all();
        Ok(())
    }

    pub fn send_sync(&self, request: DriverRequest) -> Result<(), DriverError> {
        let entry = {
            let mut state = self.state.lock();
            if state.shutdown {
                return Err(DriverError::Shutdown);
            }
            let entry = Arc::new(SyncEntry {
                request,
                seqnum: state.seqnum,
                result: Mutex::new(None),
                cv: Condvar::new(),
            });
            state.queue.push_back(entry.clone());
            self.cv.notify_all();
            entry
        };
        entry.wait()
    }

    /// Blocks until there is something to do. `None` once shut down.
    pub fn receive(&self) -> Option<DriverRequest> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(active) = state.active {
                // Not acknowledged yet, hand out the same request again
                return Some(active);
            }
            let next = match state.pending.take() {
                Some(request) => Some(request),
                None => state.queue.front().map(|entry| entry.request),
            };
            if let Some(request) = next {
                state.seqnum += 1;
                state.active = Some(request);
                return Some(request);
            }
            self.cv.wait(&mut state);
        }
    }

    /// Completes the active request and releases every synchronous sender of
    /// an equal request that was queued before the cycle started.
    pub fn ack(&self) {
        let mut state = self.state.lock();
        let active = match state.active.take() {
            Some(active) => active,
            // Nothing to ack
            None => return,
        };
        let seqnum = state.seqnum;
        let mut satisfied = Vec::new();
        state.queue.retain(|entry| {
            if entry.request == active && entry.seqnum < seqnum {
                satisfied.push(entry.clone());
                false
            } else {
                true
            }
        });
        drop(state);
        for entry in satisfied {
            entry.satisfy(Ok(()));
        }
    }

    /// Wakes the driver so it can exit and fails every waiting sender.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        state.pending = None;
        let waiting: Vec<_> = state.queue.drain(..).collect();
        self.cv.notify_all();
        drop(state);
        for entry in waiting {
            entry.satisfy(Err(DriverError::Shutdown));
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}

impl Default for DriverPort {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
        time::Duration,
    };

    fn request(cause: GcCause) -> DriverRequest {
        DriverRequest::new(cause, 1, 1)
    }

    #[test]
    fn async_sends_do_not_queue() {
        let port = DriverPort::new();
        port.send_async(request(GcCause::Timer)).unwrap();
        port.send_async(request(GcCause::HighUsage)).unwrap();
        assert!(port.is_busy());
        assert_eq!(port.receive(), Some(request(GcCause::HighUsage)));
        port.ack();
        assert!(!port.is_busy());
    }

    #[test]
    fn receive_repeats_until_acked() {
        let port = DriverPort::new();
        port.send_async(request(GcCause::Timer)).unwrap();
        assert_eq!(port.receive(), Some(request(GcCause::Timer)));
        assert_eq!(port.receive(), Some(request(GcCause::Timer)));
        port.ack();
        port.ack();
        assert!(!port.is_busy());
    }

    #[test]
    fn sync_send_waits_for_its_own_cycle() {
        let port = Arc::new(DriverPort::new());
        let done = Arc::new(AtomicBool::new(false));

        // A cycle for the same cause is already running when the sender arrives
        port.send_async(request(GcCause::SystemGc)).unwrap();
        assert_eq!(port.receive(), Some(request(GcCause::SystemGc)));

        let sender = {
            let port = port.clone();
            let done = done.clone();
            thread::spawn(move || {
                let result = port.send_sync(request(GcCause::SystemGc));
                done.store(true, Ordering::SeqCst);
                result
            })
        };
        while port.state.lock().queue.is_empty() {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(20));

        // The running cycle started before the send, so it does not count
        port.ack();
        thread::sleep(Duration::from_millis(20));
        assert!(!done.load(Ordering::SeqCst));

        assert_eq!(port.receive(), Some(request(GcCause::SystemGc)));
        port.ack();
        assert_eq!(sender.join().unwrap(), Ok(()));
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn equal_sync_sends_are_coalesced() {
        let port = Arc::new(DriverPort::new());
        let senders: Vec<_> = (0..3)
            .map(|_| {
                let port = port.clone();
                thread::spawn(move || port.send_sync(request(GcCause::DiagnosticCommand)))
            })
            .collect();
        while port.state.lock().queue.len() < 3 {
            thread::yield_now();
        }
        assert_eq!(port.receive(), Some(request(GcCause::DiagnosticCommand)));
        port.ack();
        for sender in senders {
            assert_eq!(sender.join().unwrap(), Ok(()));
        }
        assert!(!port.is_busy());
    }

    #[test]
    fn shutdown_fails_waiting_senders() {
        let port = Arc::new(DriverPort::new());
        let sender = {
            let port = port.clone();
            thread::spawn(move || port.send_sync(request(GcCause::SystemGc)))
        };
        while port.state.lock().queue.is_empty() {
            thread::yield_now();
        }
        port.shutdown();
        assert_eq!(sender.join().unwrap(), Err(DriverError::Shutdown));
        assert_eq!(
            port.send_sync(request(GcCause::SystemGc)),
            Err(DriverError::Shutdown)
        );
        assert_eq!(
            port.send_async(request(GcCause::Timer)),
            Err(DriverError::Shutdown)
        );
        assert!(!port.is_busy());
    }

    #[test]
    fn shutdown_wakes_receiver() {
        let port = Arc::new(DriverPort::new());
        let receiver = {
            let port = port.clone();
            thread::spawn(move || port.receive())
        };
        thread::sleep(Duration::from_millis(20));
        port.shutdown();
        assert_eq!(receiver.join().unwrap(), None);
    }
}
