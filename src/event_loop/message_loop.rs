// src/event_loop/message_loop.rs - Dispatch driver and loop context
//
// Core features:
// - One explicitly constructed context owning the run loop and the queue
// - Init order: run loop, then queue. Shutdown order: queue, then run loop
// - dispatch_once: Running -> (nothing ready) -> IdleWait -> Running ...
// - Idle wait bounded by a timeout so the keyboard break flag is polled
// - Keyboard break translated into a quit request, never an unwind

use crate::error::{Error, Result};
use crate::event_loop::interrupt;
use crate::event_loop::message_queue::{
    default_error_reporter, ErrorReporter, MessagePoster, MessageQueue, MAX_PENDING_SIGNALS,
};
use crate::event_loop::poller::{Event, Interest};
use crate::event_loop::run_loop::{RunLoop, WatchedDescriptor};
use log::{debug, info};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default idle wait ceiling between keyboard break checks
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 2000;

// Status constants
const STATUS_RUNNING: usize = 0;
const STATUS_IDLE_WAIT: usize = 1;
const STATUS_TERMINATED: usize = 2;

/// Host hook invoked on the dispatch thread when quitting is requested.
pub type QuitHandler = Arc<dyn Fn() + Send + Sync>;

/// Dispatch driver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// Dispatching, or between dispatch calls
    Running,
    /// Blocked in the idle wait
    IdleWait,
    /// Shut down; nothing is dispatched any more
    Terminated,
}

impl LoopStatus {
    fn from_status(status: usize) -> Self {
        match status {
            STATUS_IDLE_WAIT => LoopStatus::IdleWait,
            STATUS_TERMINATED => LoopStatus::Terminated,
            _ => LoopStatus::Running,
        }
    }
}

/// Configuration for a [`MessageLoop`].
pub struct MessageLoopBuilder {
    idle_timeout: Duration,
    max_pending_signals: usize,
    keyboard_break: bool,
    quit_handler: Option<QuitHandler>,
    error_reporter: Option<ErrorReporter>,
}

impl Default for MessageLoopBuilder {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            max_pending_signals: MAX_PENDING_SIGNALS,
            keyboard_break: false,
            quit_handler: None,
            error_reporter: None,
        }
    }
}

impl MessageLoopBuilder {
    /// Sets the ceiling of a single idle wait.
    ///
    /// The wait is a liveness poll for the keyboard break flag; readiness of
    /// any watched descriptor ends it early.
    pub fn set_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets how many wakeup bytes may be unread at once (at least 1).
    pub fn set_max_pending_signals(mut self, max_pending_signals: usize) -> Self {
        self.max_pending_signals = max_pending_signals.max(1);
        self
    }

    /// Installs a SIGINT handler whose keyboard break becomes a quit request.
    ///
    /// Meant for standalone applications that own the process's signal handling.
    pub fn set_keyboard_break_handler(mut self, enabled: bool) -> Self {
        self.keyboard_break = enabled;
        self
    }

    pub fn set_quit_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.quit_handler = Some(Arc::new(handler));
        self
    }

    /// Sets where failures raised by work items are reported.
    ///
    /// Defaults to logging them with `log::error!`.
    pub fn set_error_reporter<F>(mut self, reporter: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.error_reporter = Some(Arc::new(reporter));
        self
    }

    /// Creates the run loop, then the message queue registered on it.
    ///
    /// # Errors
    /// * [`Error::SignalHandler`] - the keyboard break handler could not be installed
    /// * [`Error::WakeupChannel`] - the queue's socket pair could not be created
    pub fn build(self) -> Result<MessageLoop> {
        if self.keyboard_break {
            interrupt::install_keyboard_break_handler().map_err(Error::SignalHandler)?;
        }

        let run_loop = Arc::new(RunLoop::new());
        let reporter = self.error_reporter.unwrap_or_else(default_error_reporter);
        let queue = MessageQueue::with_config(run_loop.clone(), self.max_pending_signals, reporter)?;

        debug!(
            "Message loop created (idle timeout {:?}, signal budget {})",
            self.idle_timeout, self.max_pending_signals
        );

        Ok(MessageLoop {
            run_loop,
            queue,
            status: Arc::new(AtomicUsize::new(STATUS_RUNNING)),
            quit_requested: Arc::new(AtomicBool::new(false)),
            idle_timeout: self.idle_timeout,
            keyboard_break: self.keyboard_break,
            quit_handler: self.quit_handler,
        })
    }
}

/// Requests quitting a [`MessageLoop`] from any thread.
#[derive(Clone)]
pub struct QuitHandle {
    quit_requested: Arc<AtomicBool>,
    poster: MessagePoster,
}

impl QuitHandle {
    /// Flags the loop to quit and wakes it if it is idle.
    pub fn quit(&self) {
        self.quit_requested.store(true, Ordering::Release);
        let _ = self.poster.post(|| {});
    }
}

/// The message loop context handed to every collaborator.
///
/// Registration and posting are safe from any thread. [`dispatch_once`],
/// [`run`] and [`shutdown`] belong to the single designated dispatch thread;
/// driving them from more than one thread is undefined behaviour of the
/// dispatch protocol and is not detected.
///
/// [`dispatch_once`]: MessageLoop::dispatch_once
/// [`run`]: MessageLoop::run
/// [`shutdown`]: MessageLoop::shutdown
pub struct MessageLoop {
    run_loop: Arc<RunLoop>,
    queue: MessageQueue,
    status: Arc<AtomicUsize>,
    quit_requested: Arc<AtomicBool>,
    idle_timeout: Duration,
    keyboard_break: bool,
    quit_handler: Option<QuitHandler>,
}

impl MessageLoop {
    pub fn builder() -> MessageLoopBuilder {
        MessageLoopBuilder::default()
    }

    /// Creates a loop with the default configuration.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn run_loop(&self) -> &Arc<RunLoop> {
        &self.run_loop
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Queues `f` for the dispatch thread; `false` once shut down.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.post(f)
    }

    pub fn poster(&self) -> MessagePoster {
        self.queue.poster()
    }

    pub fn quit_handle(&self) -> QuitHandle {
        QuitHandle {
            quit_requested: self.quit_requested.clone(),
            poster: self.queue.poster(),
        }
    }

    /// Watches `fd` for `interest` readiness. See [`RunLoop::register`].
    pub fn register_fd<F>(&self, fd: RawFd, interest: Interest, callback: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.run_loop.register(fd, interest, callback);
    }

    /// Stops watching `fd`. See [`RunLoop::unregister`].
    pub fn unregister_fd(&self, fd: RawFd) {
        self.run_loop.unregister(fd);
    }

    pub fn watched_descriptors(&self) -> Vec<WatchedDescriptor> {
        self.run_loop.watched_descriptors()
    }

    pub fn status(&self) -> LoopStatus {
        LoopStatus::from_status(self.status.load(Ordering::Acquire))
    }

    pub fn is_quit_requested(&self) -> bool {
        self.quit_requested.load(Ordering::Acquire)
    }

    /// Flags the loop to quit, runs the quit handler and wakes the loop.
    ///
    /// Dispatch thread only; other threads use a [`QuitHandle`].
    pub fn request_quit(&self) {
        self.quit_requested.store(true, Ordering::Release);
        if let Some(handler) = &self.quit_handler {
            handler();
        }
        let _ = self.queue.post(|| {});
    }

    /// Dispatches pending events.
    ///
    /// Returns `true` once a pass dispatched at least one event. With
    /// `block_if_empty` set, idles in bounded waits until that happens;
    /// otherwise returns `false` as soon as a pass finds nothing ready.
    /// Returns `false` once the loop is shut down, including by a callback,
    /// work item or quit handler running inside this call.
    pub fn dispatch_once(&self, block_if_empty: bool) -> bool {
        if self.is_terminated() {
            return false;
        }
        self.queue.mark_dispatch_thread();

        loop {
            if self.keyboard_break && interrupt::take_keyboard_break() {
                info!("Keyboard break received, requesting quit");
                self.request_quit();
            }

            if !self.enter_status(STATUS_RUNNING) {
                return false;
            }

            let dispatched = self.run_loop.dispatch_pending().is_event();
            if self.is_terminated() {
                return false;
            }
            if dispatched {
                return true;
            }

            if !block_if_empty {
                return false;
            }

            if !self.enter_status(STATUS_IDLE_WAIT) {
                return false;
            }
            self.run_loop.sleep_until_next_event(self.idle_timeout);
        }
    }

    fn is_terminated(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_TERMINATED
    }

    /// Moves to `status` unless the loop is terminated; Terminated is final.
    fn enter_status(&self, status: usize) -> bool {
        self.status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != STATUS_TERMINATED).then_some(status)
            })
            .is_ok()
    }

    /// Dispatches until quitting is requested or the loop is shut down.
    pub fn run(&self) {
        info!("Message loop started");

        while !self.is_quit_requested() && self.status() != LoopStatus::Terminated {
            self.dispatch_once(true);
        }

        info!("Message loop stopped");
    }

    /// Tears down the queue, then every run loop registration.
    ///
    /// Producers should stop posting first; later posts are refused.
    pub fn shutdown(&self) {
        if self.status.swap(STATUS_TERMINATED, Ordering::AcqRel) == STATUS_TERMINATED {
            return;
        }

        self.queue.shutdown();
        self.run_loop.clear();

        info!("Message loop shut down");
    }
}

impl Drop for MessageLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
