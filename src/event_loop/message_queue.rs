// src/event_loop/message_queue.rs - Cross-thread message queue
//
// Core features:
// - FIFO of work items, appended from any thread under one lock
// - One wakeup byte per post, capped at a fixed budget of unread bytes
// - Drain callback pops until empty, so a capped signal never strands an item
// - A panicking item is caught and reported; the drain carries on
// - Posting after shutdown is refused instead of touching freed state

use crate::error::{Error, Result};
use crate::event_loop::poller::Interest;
use crate::event_loop::run_loop::RunLoop;
use crate::event_loop::wakeup::WakeupChannel;
use log::{debug, error};
use std::any::Any;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Maximum number of unread wakeup bytes
pub const MAX_PENDING_SIGNALS: usize = 128;

/// Deferred unit of work, run exactly once on the dispatch thread.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// Host error path for failures raised by work items.
pub type ErrorReporter = Arc<dyn Fn(&Error) + Send + Sync>;

pub(crate) fn default_error_reporter() -> ErrorReporter {
    Arc::new(|e: &Error| error!("{}", e))
}

struct PendingQueue {
    items: VecDeque<WorkItem>,
    /// Wakeup bytes written and not yet read back
    signals_in_flight: usize,
    open: bool,
}

struct Shared {
    pending: Mutex<PendingQueue>,
    wakeup: WakeupChannel,
    max_signals: usize,
    reporter: ErrorReporter,
    dispatch_thread: Mutex<Option<ThreadId>>,
}

impl Shared {
    fn post(&self, item: WorkItem) -> bool {
        let mut pending = lock(&self.pending);
        if !pending.open {
            return false;
        }
        pending.items.push_back(item);

        // Byte and count change together, so a drain never reads ahead of a write
        if pending.signals_in_flight < self.max_signals && self.wakeup.signal() {
            pending.signals_in_flight += 1;
        }
        true
    }

    /// Pops the head item, consuming one wakeup byte if any are outstanding.
    fn pop_next(&self) -> Option<WorkItem> {
        let mut pending = lock(&self.pending);
        if pending.signals_in_flight > 0 {
            pending.signals_in_flight -= 1;
            self.wakeup.consume();
        }
        pending.items.pop_front()
    }

    fn drain(&self) {
        while let Some(item) = self.pop_next() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(item)) {
                let err = Error::WorkItemPanicked {
                    message: panic_message(payload.as_ref()),
                };
                (self.reporter)(&err);
            }
        }
    }

    fn is_dispatch_thread(&self) -> bool {
        *lock(&self.dispatch_thread) == Some(thread::current().id())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Cloneable, thread-safe handle for submitting work to a [`MessageQueue`].
///
/// Stays valid after the queue shuts down; posts are then refused.
#[derive(Clone)]
pub struct MessagePoster {
    shared: Arc<Shared>,
}

impl MessagePoster {
    /// Queues `f` for the dispatch thread.
    ///
    /// Returns `false` if the queue has been shut down.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.post(Box::new(f))
    }

    pub fn post_item(&self, item: WorkItem) -> bool {
        self.shared.post(item)
    }

    /// Runs `f` on the dispatch thread and waits for its result.
    ///
    /// Runs `f` inline when called from the dispatch thread itself. That
    /// thread is only known once it has entered `dispatch_once`; calling
    /// this from the future dispatch thread before then posts `f` and waits
    /// for a dispatch that can never happen.
    ///
    /// # Errors
    /// * [`Error::QueueClosed`] - the queue was already shut down
    /// * [`Error::CallAbandoned`] - the item was discarded at shutdown or panicked
    pub fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.shared.is_dispatch_thread() {
            return Ok(f());
        }

        let (sender, receiver) = crossbeam_channel::bounded(1);
        let posted = self.shared.post(Box::new(move || {
            let _ = sender.send(f());
        }));
        if !posted {
            return Err(Error::QueueClosed);
        }

        receiver.recv().map_err(|_| Error::CallAbandoned)
    }

    pub fn is_closed(&self) -> bool {
        !lock(&self.shared.pending).open
    }
}

/// Queue of work items handed from any thread to the dispatch thread.
///
/// On construction the wakeup channel's receiver is registered with the run
/// loop; its callback drains the queue to empty. [`shutdown`](Self::shutdown)
/// (or drop) refuses further posts, discards queued items and unregisters
/// the descriptor. The channel's descriptors close once the run loop has
/// released the callback and every [`MessagePoster`] is gone, so a stale
/// descriptor number is never left in the poll set.
pub struct MessageQueue {
    shared: Arc<Shared>,
    run_loop: Arc<RunLoop>,
    wakeup_fd: RawFd,
}

impl MessageQueue {
    pub fn new(run_loop: Arc<RunLoop>) -> Result<Self> {
        Self::with_config(run_loop, MAX_PENDING_SIGNALS, default_error_reporter())
    }

    pub fn with_config(
        run_loop: Arc<RunLoop>,
        max_signals: usize,
        reporter: ErrorReporter,
    ) -> Result<Self> {
        let wakeup = WakeupChannel::new().map_err(Error::WakeupChannel)?;
        let wakeup_fd = wakeup.receiver_fd();

        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingQueue {
                items: VecDeque::with_capacity(64),
                signals_in_flight: 0,
                open: true,
            }),
            wakeup,
            max_signals: max_signals.max(1),
            reporter,
            dispatch_thread: Mutex::new(None),
        });

        let drain_shared = shared.clone();
        run_loop.register(wakeup_fd, Interest::READABLE, move |_| drain_shared.drain());

        debug!("Message queue created (wakeup fd {})", wakeup_fd);

        Ok(Self {
            shared,
            run_loop,
            wakeup_fd,
        })
    }

    pub fn poster(&self) -> MessagePoster {
        MessagePoster {
            shared: self.shared.clone(),
        }
    }

    /// Queues `f` for the dispatch thread. See [`MessagePoster::post`].
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.post(Box::new(f))
    }

    /// Pops the next item without running it.
    ///
    /// Dispatch thread only; the registered drain callback normally does this.
    pub fn pop_next(&self) -> Option<WorkItem> {
        self.shared.pop_next()
    }

    /// Descriptor registered with the run loop.
    pub fn wakeup_fd(&self) -> RawFd {
        self.wakeup_fd
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.pending).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records the calling thread as the dispatch thread.
    pub(crate) fn mark_dispatch_thread(&self) {
        let mut current = lock(&self.shared.dispatch_thread);
        if current.is_none() {
            *current = Some(thread::current().id());
        }
    }

    /// Refuses further posts, discards queued items and unregisters the wakeup descriptor.
    pub fn shutdown(&self) {
        let discarded = {
            let mut pending = lock(&self.shared.pending);
            if !pending.open {
                return;
            }
            pending.open = false;
            while pending.signals_in_flight > 0 {
                pending.signals_in_flight -= 1;
                self.shared.wakeup.consume();
            }
            std::mem::take(&mut pending.items)
        };

        self.run_loop.unregister(self.wakeup_fd);

        if !discarded.is_empty() {
            debug!("Message queue shut down, {} item(s) discarded", discarded.len());
        }
        // Dropped outside the lock; an item's captures may post back
        drop(discarded);
    }

    #[cfg(test)]
    fn signals_in_flight(&self) -> usize {
        lock(&self.shared.pending).signals_in_flight
    }

    #[cfg(test)]
    fn unread_signal_bytes(&self) -> usize {
        self.shared.wakeup.unread_bytes()
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Tests
// ============================================================================
