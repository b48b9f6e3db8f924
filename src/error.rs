use std::io;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to create the wakeup channel: {0}")]
    WakeupChannel(#[source] io::Error),

    #[error("Failed to install the keyboard break handler: {0}")]
    SignalHandler(#[source] io::Error),

    #[error("The message queue has been shut down")]
    QueueClosed,

    #[error("The message was discarded before it produced a result")]
    CallAbandoned,

    #[error("Work item panicked on the dispatch thread: {message}")]
    WorkItemPanicked { message: String },
}
