// src/event_loop/wakeup.rs - Self-connected wakeup channel
//
// A connected AF_UNIX stream socket pair used as a counting signal:
// - `signal()` writes one byte into the sender end
// - `consume()` reads one byte back out of the receiver end
// - Both ends are non-blocking, so neither call can stall the caller
// - The owner pairs every successful `signal()` with one `consume()` under
//   its own lock, so a read never races ahead of the matching write

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

const SIGNAL_BYTE: u8 = 0xff;

pub struct WakeupChannel {
    sender: OwnedFd,
    receiver: OwnedFd,
}

impl WakeupChannel {
    pub fn new() -> io::Result<Self> {
        let mut fds: [libc::c_int; 2] = [-1, -1];

        // SAFETY: socketpair(2) requires:
        // - fds.as_mut_ptr() points to a writable array of two c_ints
        // Both descriptors are only used after the return value is checked
        let ret = unsafe {
            libc::socketpair(
                libc::AF_UNIX,
                libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                0,
                fds.as_mut_ptr(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        // The pair is symmetric; fds[0] is picked as the end that gets written.
        // SAFETY: socketpair succeeded, so both descriptors are open and owned
        // exclusively by this channel from here on.
        let (sender, receiver) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        Ok(Self { sender, receiver })
    }

    /// Descriptor the run loop watches for readability.
    pub fn receiver_fd(&self) -> RawFd {
        self.receiver.as_raw_fd()
    }

    /// Writes one signal byte, returning whether it was written.
    pub fn signal(&self) -> bool {
        let byte = [SIGNAL_BYTE];
        // SAFETY: the sender descriptor is owned by self and open for its lifetime;
        // byte is a valid one-byte buffer on the stack.
        let written = unsafe { libc::write(self.sender.as_raw_fd(), byte.as_ptr().cast(), 1) };
        if written != 1 {
            log::trace!(
                "Wakeup signal not written: {}",
                io::Error::last_os_error()
            );
            return false;
        }
        true
    }

    /// Reads one signal byte. Best effort.
    pub fn consume(&self) {
        let mut byte = [0u8; 1];
        // SAFETY: the receiver descriptor is owned by self and open for its lifetime;
        // byte is a valid, writable one-byte buffer on the stack.
        let read = unsafe { libc::read(self.receiver.as_raw_fd(), byte.as_mut_ptr().cast(), 1) };
        if read != 1 {
            log::trace!(
                "Wakeup signal not consumed: {}",
                io::Error::last_os_error()
            );
        }
    }

    /// Number of unread signal bytes (FIONREAD on the receiver).
    #[cfg(test)]
    pub fn unread_bytes(&self) -> usize {
        let mut count: libc::c_int = 0;
        // SAFETY: FIONREAD writes a single c_int into count.
        let ret = unsafe { libc::ioctl(self.receiver.as_raw_fd(), libc::FIONREAD, &mut count as *mut libc::c_int) };
        if ret < 0 {
            return 0;
        }
        count as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::poller::{Interest, PollSet};
    use std::time::Duration;

    #[test]
    fn test_signal_then_consume() {
        let channel = WakeupChannel::new().expect("Failed to create wakeup channel");
        assert_eq!(channel.unread_bytes(), 0);

        assert!(channel.signal());
        assert!(channel.signal());
        assert_eq!(channel.unread_bytes(), 2);

        channel.consume();
        assert_eq!(channel.unread_bytes(), 1);
        channel.consume();
        assert_eq!(channel.unread_bytes(), 0);
    }

    #[test]
    fn test_consume_on_empty_channel_does_not_block() {
        let channel = WakeupChannel::new().expect("Failed to create wakeup channel");
        // Non-blocking receiver: EAGAIN is swallowed
        channel.consume();
        assert_eq!(channel.unread_bytes(), 0);
    }

    #[test]
    fn test_signal_makes_receiver_readable() {
        let channel = WakeupChannel::new().expect("Failed to create wakeup channel");
        let mut set = PollSet::default();
        set.push(channel.receiver_fd(), Interest::READABLE);

        assert_eq!(set.poll(Some(Duration::ZERO)).expect("Failed to poll"), 0);

        assert!(channel.signal());
        assert_eq!(set.poll(Some(Duration::from_millis(100))).expect("Failed to poll"), 1);
        let events = set.take_ready();
        assert_eq!(events[0].fd, channel.receiver_fd());
        assert!(events[0].is_readable());
    }
}
