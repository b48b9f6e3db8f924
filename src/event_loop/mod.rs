//! The **event loop** module hands work from any thread to one designated dispatch
//! thread and multiplexes that hand-off with arbitrary readable descriptors
//! (for example a windowing-system socket).
//!
//! # Architecture
//!
//! A single dispatch thread drives a `poll(2)` based run loop:
//! - **`RunLoop`**: the watched descriptor set and its callbacks. Registration is
//!   staged from any thread and merged only at safe points on the dispatch thread.
//! - **`MessageQueue`**: a FIFO of work items plus a self-connected socket pair whose
//!   receiver is one of the run loop's watched descriptors.
//! - **`MessageLoop`**: the context object that owns both and runs the dispatch driver.
//!
//! ## Dispatch Driver
//!
//! | State | Entered when | Leaves when |
//! |-------|--------------|-------------|
//! | Running | `dispatch_once` is called | a pass dispatched an event, or nothing is ready |
//! | IdleWait | nothing ready and the caller may block | a descriptor is ready or the idle timeout (2000 ms) passes |
//! | Terminated | `shutdown` / drop | never |
//!
//! ## Wakeup Signal Budget
//!
//! | Unread wakeup bytes | `post` behaviour |
//! |---------------------|------------------|
//! | < 128 | enqueue item, write one byte |
//! | = 128 | enqueue item only |
//!
//! The drain callback pops until the queue is empty, so items beyond the budget
//! are never stranded.
//!
//! # Example
//!
//! ```rust,no_run
//! use ez_msgloop::event_loop::{Interest, MessageLoop};
//!
//! let message_loop = MessageLoop::new().unwrap();
//!
//! // Any thread may post work for the dispatch thread.
//! let poster = message_loop.poster();
//! std::thread::spawn(move || {
//!     poster.post(|| println!("running on the dispatch thread"));
//! });
//!
//! // Watch another descriptor alongside the queue.
//! # let fd = 0;
//! message_loop.register_fd(fd, Interest::READABLE, |event| {
//!     println!("descriptor {} is ready", event.fd);
//! });
//!
//! // Drive the loop from the designated thread.
//! message_loop.dispatch_once(true);
//! ```

mod interrupt;
mod message_loop;
mod message_queue;
mod poller;
mod run_loop;
mod wakeup;

pub use interrupt::{install_keyboard_break_handler, keyboard_break_occurred};
pub use message_loop::{
    LoopStatus, MessageLoop, MessageLoopBuilder, QuitHandle, QuitHandler, DEFAULT_IDLE_TIMEOUT_MS,
};
pub use message_queue::{ErrorReporter, MessagePoster, MessageQueue, WorkItem, MAX_PENDING_SIGNALS};
pub use poller::{Event, Interest};
pub use run_loop::{DispatchResult, FdCallback, RunLoop, WatchedDescriptor};
