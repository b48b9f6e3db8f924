//! **ez-msgloop** is the Linux message-dispatch backbone for a UI toolkit: any thread can
//! post a unit of work to be run on the designated UI thread, and that thread waits on
//! the posted work and on any other registered file descriptors in a single `poll(2)`.
//!
//! See [`event_loop`] for the architecture and an example.
//!
//! # Threading Contract
//!
//! - `post`, `register_fd` and `unregister_fd` are safe from any thread, including from
//!   inside a callback running on the dispatch thread.
//! - `dispatch_once`, `run` and `shutdown` must only be called from one designated
//!   thread. This is not checked at runtime.
//! - Stop producing before shutting down; posts after shutdown are refused and return `false`.

#[cfg(not(target_os = "linux"))]
compile_error!("ez-msgloop only supports Linux");

pub mod error;
pub mod event_loop;

pub use error::{Error, Result};
pub use event_loop::{Event, Interest, MessageLoop, MessagePoster};
