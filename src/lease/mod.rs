//! Single-writer lease per store identity.
//!
//! A store instance may have at most one live session. The lease enforcing
//! this lives in process memory only: [`InstanceLease::for_identity`] hands
//! out the one lease object for an identity from a registry of weak handles,
//! and [`InstanceLease::acquire`] blocks until the lease is free or the
//! timeout expires.
//!
//! The holder records its name, thread, acquisition time and a best-effort
//! backtrace so a timed-out caller can report who is in the way.
//!
//! Acquiring from the thread that already holds the lease fails at once
//! instead of waiting for a release that can never happen.


use std::{
    backtrace::Backtrace,
    collections::HashMap,
    fmt,
    sync::{Arc, OnceLock, Weak},
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, trace, warn};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Details of a failed acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseConflict {
    /// Identity whose lease was requested.
    pub identity: String,
    /// Name the current holder acquired with.
    pub holder: String,
    /// Thread of the current holder.
    pub holder_thread: String,
    /// How long the holder has had the lease.
    pub held_for: Duration,
    /// How long the caller waited.
    pub waited: Duration,
    /// Where the holder acquired the lease, if captured.
    pub holder_backtrace: String,
}

impl fmt::Display for LeaseConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lease for {} held by `{}` on thread {} for {:?}; waited {:?}",
            self.identity, self.holder, self.holder_thread, self.held_for, self.waited
        )
    }
}

/// Errors returned by lease operations.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// The lease is held by someone else.
    #[error("lease unavailable: {0}")]
    Unavailable(LeaseConflict),
}

// ------------------------------------------------------------------------------------------------
// Lease
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct Holder {
    name: String,
    thread: ThreadId,
    thread_name: String,
    acquired_at: Instant,
    backtrace: String,
    generation: u64,
}

#[derive(Debug, Default)]
struct LeaseState {
    holder: Option<Holder>,
    /// Bumped on every acquisition; a guard only releases its own generation.
    generation: u64,
}

/// The exclusive lease of one store identity.
#[derive(Debug)]
pub struct InstanceLease {
    identity: String,
    state: Mutex<LeaseState>,
    freed: Condvar,
}

fn registry() -> &'static Mutex<HashMap<String, Weak<InstanceLease>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Weak<InstanceLease>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn describe_thread(name: Option<&str>, id: ThreadId) -> String {
    match name {
        Some(name) => format!("{name} ({id:?})"),
        None => format!("{id:?}"),
    }
}

impl InstanceLease {
    /// The process-wide lease for `identity`.
    ///
    /// Every caller gets the same object while any handle to it is alive.
    pub fn for_identity(identity: &str) -> Arc<Self> {
        let mut registry = registry().lock();
        if let Some(lease) = registry.get(identity).and_then(Weak::upgrade) {
            return lease;
        }
        registry.retain(|_, weak| weak.strong_count() > 0);

        let lease = Arc::new(Self {
            identity: identity.to_owned(),
            state: Mutex::new(LeaseState::default()),
            freed: Condvar::new(),
        });
        registry.insert(identity.to_owned(), Arc::downgrade(&lease));
        trace!(identity, "lease created");
        lease
    }

    /// Identity this lease guards.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Name of the current holder, if any.
    pub fn holder(&self) -> Option<String> {
        self.state.lock().holder.as_ref().map(|h| h.name.clone())
    }

    /// Whether someone holds the lease.
    pub fn is_held(&self) -> bool {
        self.state.lock().holder.is_some()
    }

    /// Waits up to `timeout` for the lease and takes it in the name of
    /// `holder`.
    pub fn acquire(
        self: &Arc<Self>,
        holder: &str,
        timeout: Duration,
    ) -> Result<LeaseGuard, LeaseError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let me = thread::current();
        let mut state = self.state.lock();

        loop {
            let Some(current) = state.holder.as_ref() else {
                break;
            };

            let now = Instant::now();
            if current.thread == me.id() || now >= deadline {
                let conflict = LeaseConflict {
                    identity: self.identity.clone(),
                    holder: current.name.clone(),
                    holder_thread: current.thread_name.clone(),
                    held_for: now.saturating_duration_since(current.acquired_at),
                    waited: now.saturating_duration_since(started),
                    holder_backtrace: current.backtrace.clone(),
                };
                warn!(
                    identity = %self.identity,
                    requester = holder,
                    holder = %conflict.holder,
                    waited_ms = conflict.waited.as_millis() as u64,
                    "lease acquisition failed"
                );
                return Err(LeaseError::Unavailable(conflict));
            }
            let _ = self.freed.wait_for(&mut state, deadline - now);
        }

        state.generation += 1;
        let generation = state.generation;
        state.holder = Some(Holder {
            name: holder.to_owned(),
            thread: me.id(),
            thread_name: describe_thread(me.name(), me.id()),
            acquired_at: Instant::now(),
            backtrace: Backtrace::capture().to_string(),
            generation,
        });
        drop(state);

        debug!(
            identity = %self.identity,
            holder,
            waited_ms = started.elapsed().as_millis() as u64,
            "lease acquired"
        );
        Ok(LeaseGuard {
            lease: Arc::clone(self),
            generation,
            acquired_at: Instant::now(),
            released: false,
        })
    }

    fn release(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        let owned = state
            .holder
            .as_ref()
            .is_some_and(|h| h.generation == generation);
        if owned {
            state.holder = None;
            drop(state);
            self.freed.notify_one();
            debug!(identity = %self.identity, "lease released");
        }
        owned
    }
}

// ------------------------------------------------------------------------------------------------
// Guard
// ------------------------------------------------------------------------------------------------

/// Proof of holding a lease. Releases on drop.
#[derive(Debug)]
pub struct LeaseGuard {
    lease: Arc<InstanceLease>,
    generation: u64,
    acquired_at: Instant,
    released: bool,
}

impl LeaseGuard {
    /// Give the lease back. Calling it again does nothing.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.lease.release(self.generation);
        }
    }

    /// Whether [`release`](Self::release) has been called.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Time since acquisition.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// The lease this guard holds.
    pub fn lease(&self) -> &Arc<InstanceLease> {
        &self.lease
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.release();
    }
}
