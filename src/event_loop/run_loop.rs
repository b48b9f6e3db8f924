// src/event_loop/run_loop.rs - Descriptor run loop with deferred registration
//
// Core features:
// - Registration/unregistration from any thread, including from inside a callback
// - Changes staged in a side buffer and merged only at safe points
//   (start of a dispatch pass, after every callback invocation)
// - A merge during a pass aborts the pass so stale ready lists are never walked
// - No internal lock is held while a callback runs or while blocked in poll(2)

use crate::event_loop::poller::{Event, Interest, PollSet};
use log::{debug, warn};
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Callback invoked on the dispatch thread when its descriptor is ready.
pub type FdCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// A descriptor, the readiness it is watched for, and its callback.
#[derive(Clone)]
pub struct WatchedDescriptor {
    fd: RawFd,
    interest: Interest,
    callback: FdCallback,
}

impl WatchedDescriptor {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn callback(&self) -> &FdCallback {
        &self.callback
    }
}

impl fmt::Debug for WatchedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchedDescriptor")
            .field("fd", &self.fd)
            .field("interest", &self.interest)
            .finish_non_exhaustive()
    }
}

/// Outcome of one [`RunLoop::dispatch_pending`] pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// Nothing was ready
    NoEvent,
    /// At least one callback ran and the watched set did not change
    Dispatched,
    /// A callback changed the watched set; the pass was cut short
    Restarted,
}

impl DispatchResult {
    pub fn is_event(&self) -> bool {
        !matches!(self, DispatchResult::NoEvent)
    }
}

#[derive(Default)]
struct LiveSet {
    poll_set: PollSet,
    watched: Vec<WatchedDescriptor>,
}

impl LiveSet {
    fn add(&mut self, entry: WatchedDescriptor) {
        self.poll_set.push(entry.fd, entry.interest);
        self.watched.push(entry);
    }

    fn remove(&mut self, fd: RawFd, removed: &mut Vec<WatchedDescriptor>) {
        self.poll_set.remove(fd);
        let mut i = 0;
        while i < self.watched.len() {
            if self.watched[i].fd == fd {
                removed.push(self.watched.remove(i));
            } else {
                i += 1;
            }
        }
    }
}

/// Registration requests not yet merged into the live set.
///
/// Each removal records how many additions were queued before it, so the
/// merge replays both sequences in request order.
#[derive(Default)]
struct PendingChanges {
    additions: Vec<WatchedDescriptor>,
    removals: Vec<(RawFd, usize)>,
}

impl PendingChanges {
    fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

/// Multiplexed run loop over a set of watched descriptors.
///
/// `register`, `unregister` and `watched_descriptors` may be called from any
/// thread. `dispatch_pending`, `sleep_until_next_event` and
/// `apply_pending_changes` must only ever be called from the single dispatch
/// thread; calling them from two threads at once is undefined behaviour of
/// the dispatch protocol (callbacks may run concurrently or out of order).
pub struct RunLoop {
    live: Mutex<LiveSet>,
    pending: Mutex<PendingChanges>,
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLoop {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(LiveSet {
                poll_set: PollSet::with_capacity(16),
                watched: Vec::with_capacity(16),
            }),
            pending: Mutex::new(PendingChanges::default()),
        }
    }

    /// Queues `callback` to be watched for `interest` readiness on `fd`.
    ///
    /// Takes effect at the next merge point on the dispatch thread.
    pub fn register<F>(&self, fd: RawFd, interest: Interest, callback: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.register_callback(fd, interest, Arc::new(callback));
    }

    pub fn register_callback(&self, fd: RawFd, interest: Interest, callback: FdCallback) {
        let mut pending = lock(&self.pending);
        pending.additions.push(WatchedDescriptor {
            fd,
            interest,
            callback,
        });
        debug!("Descriptor {} queued for registration ({:?})", fd, interest);
    }

    /// Queues removal of every callback watching `fd`.
    ///
    /// An invocation already in progress is not interrupted.
    pub fn unregister(&self, fd: RawFd) {
        let mut pending = lock(&self.pending);
        let barrier = pending.additions.len();
        pending.removals.push((fd, barrier));
        debug!("Descriptor {} queued for removal", fd);
    }

    /// Merges staged registrations into the live set.
    ///
    /// Dispatch thread only. Returns whether anything changed.
    pub fn apply_pending_changes(&self) -> bool {
        let mut removed = Vec::new();
        let changed = {
            let mut live = lock(&self.live);
            self.merge_pending(&mut live, &mut removed)
        };
        // Callbacks are dropped outside the lock; their captures may call back in
        drop(removed);
        changed
    }

    fn merge_pending(&self, live: &mut LiveSet, removed: &mut Vec<WatchedDescriptor>) -> bool {
        let PendingChanges {
            additions,
            removals,
        } = {
            let mut pending = lock(&self.pending);
            if pending.is_empty() {
                return false;
            }
            std::mem::take(&mut *pending)
        };

        let mut additions = additions.into_iter().enumerate().peekable();
        for (fd, barrier) in removals {
            while let Some((_, entry)) = additions.next_if(|(index, _)| *index < barrier) {
                live.add(entry);
            }
            live.remove(fd, removed);
        }
        for (_, entry) in additions {
            live.add(entry);
        }

        debug!(
            "Applied pending descriptor changes ({} watched, {} removed)",
            live.watched.len(),
            removed.len()
        );
        true
    }

    /// One non-blocking multiplex pass.
    ///
    /// Merges staged changes, polls the live set with a zero timeout and runs
    /// the callbacks of every ready descriptor in set order. After each
    /// callback staged changes are merged again; if that changed the set the
    /// pass stops and returns [`DispatchResult::Restarted`].
    pub fn dispatch_pending(&self) -> DispatchResult {
        let mut removed = Vec::new();
        let ready = {
            let mut live = lock(&self.live);
            self.merge_pending(&mut live, &mut removed);

            match live.poll_set.poll(Some(Duration::ZERO)) {
                Ok(0) => Vec::new(),
                Ok(_) => live.poll_set.take_ready(),
                Err(e) => {
                    warn!("Run loop poll failed: {}", e);
                    Vec::new()
                }
            }
        };
        drop(removed);

        if ready.is_empty() {
            return DispatchResult::NoEvent;
        }

        let mut event_was_sent = false;

        for event in ready {
            if event.invalid {
                warn!("Watched descriptor {} is not open", event.fd);
            }

            let callbacks: Vec<FdCallback> = {
                let live = lock(&self.live);
                live.watched
                    .iter()
                    .filter(|w| w.fd == event.fd)
                    .map(|w| w.callback.clone())
                    .collect()
            };

            for callback in callbacks {
                callback(event);

                if self.apply_pending_changes() {
                    // The set we polled no longer matches the live set
                    return DispatchResult::Restarted;
                }

                event_was_sent = true;
            }
        }

        if event_was_sent {
            DispatchResult::Dispatched
        } else {
            DispatchResult::NoEvent
        }
    }

    /// Blocks until a watched descriptor is ready or `timeout` passes.
    ///
    /// Polls a snapshot of the live set so no lock is held while blocked.
    /// Readiness is only observed here, never dispatched; the next
    /// [`dispatch_pending`](Self::dispatch_pending) pass picks it up.
    pub fn sleep_until_next_event(&self, timeout: Duration) {
        let mut snapshot = lock(&self.live).poll_set.clone();
        if let Err(e) = snapshot.wait(Some(timeout)) {
            warn!("Run loop wait failed: {}", e);
        }
    }

    /// Snapshot of the live watched descriptors, in dispatch order.
    pub fn watched_descriptors(&self) -> Vec<WatchedDescriptor> {
        lock(&self.live).watched.clone()
    }

    /// Drops every live and staged registration.
    pub(crate) fn clear(&self) {
        let staged = std::mem::take(&mut *lock(&self.pending));
        let watched = {
            let mut live = lock(&self.live);
            live.poll_set = PollSet::default();
            std::mem::take(&mut live.watched)
        };
        debug!(
            "Run loop cleared ({} watched, {} staged additions)",
            watched.len(),
            staged.additions.len()
        );
    }
}

// Internal locks never guard user code, so a poisoned lock still holds consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Tests
// ============================================================================
