//! Single-threaded cooperative event reactor.
//!
//! The reactor watches a small table of *endpoints* (cameras, the keyboard,
//! a remote-control bridge). An endpoint may carry a readable descriptor
//! with a read callback, a housekeeping deadline with a housekeeping
//! callback, or both. A [`TransferEngine`] can be attached; its sockets are
//! polled alongside the endpoints and its finished exchanges are resumed
//! from the same loop.
//!
//! One call to [`Reactor::run_once`] is one iteration:
//!
//! ```text
//! compact ─► wait (poll) ─► read callbacks ─► engine.perform
//!                           ─► housekeeping callbacks ─► continuations
//! ```
//!
//! Every callback receives `&mut Reactor`, so it may register, release or
//! rewrite any endpoint (itself included) without invalidating the
//! iteration in progress.

mod endpoint;
mod poller;

use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use endpoint::EndpointTable;

use crate::error::{Result, WallError};
use crate::session::continuation;
use crate::transfer::TransferEngine;

pub use endpoint::{Callback, EndpointHandle, MAX_ENDPOINTS};
pub use poller::Interest;

/// Which callback slot of an endpoint a dispatch refers to.
#[derive(Clone, Copy)]
enum Slot {
    Read,
    Housekeeping,
}

pub struct Reactor {
    endpoints: EndpointTable,
    engine: Option<Box<dyn TransferEngine>>,
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor {
    pub fn new() -> Self {
        Self {
            endpoints: EndpointTable::new(),
            engine: None,
        }
    }

    /// Add an endpoint with no descriptor and no timer.
    pub fn register(&mut self, name: &str) -> Result<EndpointHandle> {
        let handle = self.endpoints.insert(name)?;
        tracing::debug!(endpoint = name, slot = handle.index(), "endpoint registered");
        Ok(handle)
    }

    /// Remove an endpoint. Its slot is trimmed or reused later; the handle
    /// goes stale immediately. Returns `false` if it was already gone.
    pub fn release(&mut self, handle: EndpointHandle) -> bool {
        match self.endpoints.remove(handle) {
            Some(endpoint) => {
                tracing::debug!(endpoint = %endpoint.name, slot = handle.index(), "endpoint released");
                true
            }
            None => false,
        }
    }

    /// Set or clear the descriptor watched for readability. `None` means
    /// "not currently connected". Negative descriptors are rejected.
    pub fn set_descriptor(&mut self, handle: EndpointHandle, fd: Option<RawFd>) -> bool {
        if fd.is_some_and(|fd| fd < 0) {
            return false;
        }
        match self.endpoints.get_mut(handle) {
            Some(endpoint) => {
                endpoint.fd = fd;
                true
            }
            None => false,
        }
    }

    pub fn set_read_callback(
        &mut self,
        handle: EndpointHandle,
        callback: impl FnMut(&mut Reactor, EndpointHandle) + 'static,
    ) -> bool {
        match self.endpoints.get_mut(handle) {
            Some(endpoint) => {
                endpoint.on_read = Some(Box::new(callback));
                true
            }
            None => false,
        }
    }

    pub fn clear_read_callback(&mut self, handle: EndpointHandle) -> bool {
        match self.endpoints.get_mut(handle) {
            Some(endpoint) => {
                endpoint.on_read = None;
                true
            }
            None => false,
        }
    }

    /// Install a housekeeping callback due at `deadline`.
    ///
    /// The callback fires once; it stays installed, so re-arming only needs
    /// [`set_housekeeping_deadline`](Self::set_housekeeping_deadline).
    pub fn arm_housekeeping(
        &mut self,
        handle: EndpointHandle,
        deadline: Instant,
        callback: impl FnMut(&mut Reactor, EndpointHandle) + 'static,
    ) -> bool {
        match self.endpoints.get_mut(handle) {
            Some(endpoint) => {
                endpoint.deadline = Some(deadline);
                endpoint.on_housekeeping = Some(Box::new(callback));
                true
            }
            None => false,
        }
    }

    /// Re-arm with the callback already installed.
    pub fn set_housekeeping_deadline(&mut self, handle: EndpointHandle, deadline: Instant) -> bool {
        match self.endpoints.get_mut(handle) {
            Some(endpoint) => {
                endpoint.deadline = Some(deadline);
                true
            }
            None => false,
        }
    }

    /// Disarm without removing the callback.
    pub fn cancel_housekeeping(&mut self, handle: EndpointHandle) -> bool {
        match self.endpoints.get_mut(handle) {
            Some(endpoint) => {
                endpoint.deadline = None;
                true
            }
            None => false,
        }
    }

    pub fn name(&self, handle: EndpointHandle) -> Result<&str> {
        self.endpoints
            .get(handle)
            .map(|e| e.name.as_str())
            .ok_or(WallError::StaleHandle)
    }

    pub fn descriptor(&self, handle: EndpointHandle) -> Result<Option<RawFd>> {
        self.endpoints
            .get(handle)
            .map(|e| e.fd)
            .ok_or(WallError::StaleHandle)
    }

    pub fn next_deadline(&self, handle: EndpointHandle) -> Result<Option<Instant>> {
        self.endpoints
            .get(handle)
            .map(|e| e.deadline)
            .ok_or(WallError::StaleHandle)
    }

    pub fn is_live(&self, handle: EndpointHandle) -> bool {
        self.endpoints.get(handle).is_some()
    }

    /// Number of live endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.len() == 0
    }

    /// Attach the transfer engine, replacing any previous one.
    pub fn attach_engine(&mut self, engine: Box<dyn TransferEngine>) {
        self.engine = Some(engine);
    }

    pub fn engine_mut(&mut self) -> Result<&mut (dyn TransferEngine + 'static)> {
        self.engine.as_deref_mut().ok_or(WallError::NoEngine)
    }

    /// Run one iteration, blocking at most `max_wait`.
    ///
    /// Returns the number of read and housekeeping callbacks invoked.
    /// Transfer continuations are not counted.
    pub fn run_once(&mut self, max_wait: Duration) -> usize {
        self.endpoints.compact();
        // Endpoints registered by a callback wait for the next iteration.
        let snapshot = self.endpoints.snapshot();

        let now = Instant::now();
        let mut wait = max_wait;
        let mut watched: Vec<(EndpointHandle, RawFd)> = Vec::new();
        for (handle, endpoint) in self.endpoints.iter().filter(|(_, e)| !e.is_inert()) {
            if endpoint.on_housekeeping.is_some()
                && let Some(deadline) = endpoint.deadline
            {
                wait = wait.min(deadline.saturating_duration_since(now));
            }
            if endpoint.on_read.is_some()
                && let Some(fd) = endpoint.fd
            {
                watched.push((handle, fd));
            }
        }
        let fds: Vec<RawFd> = watched.iter().map(|(_, fd)| *fd).collect();

        let mut interests = Vec::new();
        if let Some(engine) = self.engine.as_deref().filter(|e| e.is_active()) {
            if let Some(timeout) = engine.timeout() {
                wait = wait.min(timeout);
            }
            interests = engine.interests();
        }

        let ready = match poller::wait(&fds, &interests, wait) {
            Ok(ready) => ready,
            Err(nix::errno::Errno::EINTR) => return 0,
            Err(e) => {
                tracing::warn!(error = %e, "reactor wait failed");
                return 0;
            }
        };

        let mut dispatched = 0;

        // Read callbacks: only for endpoints whose descriptor is unchanged.
        for ((handle, fd), readable) in watched.into_iter().zip(ready) {
            if !readable {
                continue;
            }
            let current = self.endpoints.get(handle).and_then(|e| e.fd);
            if current != Some(fd) {
                continue;
            }
            if self.dispatch(handle, Slot::Read) {
                dispatched += 1;
            }
        }

        if let Some(engine) = self.engine.as_deref_mut() {
            engine.perform();
        }

        let now = Instant::now();
        for handle in snapshot {
            let due = self.endpoints.get(handle).is_some_and(|e| {
                e.on_housekeeping.is_some() && e.deadline.is_some_and(|d| d <= now)
            });
            if !due {
                continue;
            }
            if let Some(endpoint) = self.endpoints.get_mut(handle) {
                endpoint.deadline = None;
            }
            if self.dispatch(handle, Slot::Housekeeping) {
                dispatched += 1;
            }
        }

        let completions = match self.engine.as_deref_mut() {
            Some(engine) => engine.drain_completions(),
            None => Vec::new(),
        };
        for completion in completions {
            continuation::resume(self, completion);
        }

        dispatched
    }

    /// Invoke one callback of `handle`.
    ///
    /// The callback is taken out of its slot while it runs and put back
    /// only if the endpoint still exists under the same generation and the
    /// callback did not install a replacement.
    fn dispatch(&mut self, handle: EndpointHandle, slot: Slot) -> bool {
        let Some(endpoint) = self.endpoints.get_mut(handle) else {
            return false;
        };
        let taken = match slot {
            Slot::Read => endpoint.on_read.take(),
            Slot::Housekeeping => endpoint.on_housekeeping.take(),
        };
        let Some(mut callback) = taken else {
            return false;
        };

        callback(self, handle);

        if let Some(endpoint) = self.endpoints.get_mut(handle) {
            let current = match slot {
                Slot::Read => &mut endpoint.on_read,
                Slot::Housekeeping => &mut endpoint.on_housekeeping,
            };
            if current.is_none() {
                *current = Some(callback);
            }
        }
        true
    }
}
