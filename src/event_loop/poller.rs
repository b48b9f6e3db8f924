// src/event_loop/poller.rs - poll(2) based descriptor multiplexer
//
// Provides the multiplex wait used by the run loop:
// - Level-triggered poll(2) over a flat pollfd array
// - Zero timeout for the dispatch pass, bounded timeout for the idle wait
// - EINTR retried for the dispatch pass, ends the idle wait early

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Event interest flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
    pub priority: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
        priority: false,
    };

    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
        priority: false,
    };

    pub fn add_writable(self) -> Interest {
        Interest {
            writable: true,
            ..self
        }
    }

    pub fn add_priority(self) -> Interest {
        Interest {
            priority: true,
            ..self
        }
    }

    fn to_poll_events(self) -> libc::c_short {
        let mut events = 0;
        if self.readable {
            events |= libc::POLLIN;
        }
        if self.writable {
            events |= libc::POLLOUT;
        }
        if self.priority {
            events |= libc::POLLPRI;
        }
        events
    }
}

impl Default for Interest {
    fn default() -> Self {
        Interest::READABLE
    }
}

/// Readiness reported for one watched descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub priority: bool,
    pub error: bool,
    pub hangup: bool,
    /// The descriptor is not open (POLLNVAL)
    pub invalid: bool,
}

impl Event {
    fn from_revents(fd: RawFd, revents: libc::c_short) -> Self {
        Event {
            fd,
            readable: (revents & libc::POLLIN) != 0,
            writable: (revents & libc::POLLOUT) != 0,
            priority: (revents & libc::POLLPRI) != 0,
            error: (revents & libc::POLLERR) != 0,
            hangup: (revents & libc::POLLHUP) != 0,
            invalid: (revents & libc::POLLNVAL) != 0,
        }
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_error(&self) -> bool {
        self.error || self.invalid
    }

    pub fn is_hangup(&self) -> bool {
        self.hangup
    }
}

/// Flat pollfd array mirroring the run loop's watched descriptors.
///
/// Entries keep registration order, which is also the order ready
/// descriptors are reported in.
#[derive(Clone, Default)]
pub struct PollSet {
    fds: Vec<libc::pollfd>,
}

impl PollSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fds: Vec::with_capacity(capacity),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    pub fn push(&mut self, fd: RawFd, interest: Interest) {
        self.fds.push(libc::pollfd {
            fd,
            events: interest.to_poll_events(),
            revents: 0,
        });
    }

    /// Removes every entry for `fd`, returning how many were dropped.
    pub fn remove(&mut self, fd: RawFd) -> usize {
        let before = self.fds.len();
        self.fds.retain(|pfd| pfd.fd != fd);
        before - self.fds.len()
    }

    /// Polls the set, retrying on EINTR.
    ///
    /// Returns the number of descriptors with a non-zero `revents`.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        loop {
            match self.poll_once(timeout) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }

    /// Polls the set once, reporting EINTR as nothing ready.
    ///
    /// Used for the idle wait, where an interrupting signal must be seen
    /// by the caller before the timeout runs out.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        match self.poll_once(timeout) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            result => result,
        }
    }

    /// Collects ready descriptors in set order and clears their `revents`.
    pub fn take_ready(&mut self) -> Vec<Event> {
        let mut ready = Vec::new();
        for pfd in self.fds.iter_mut() {
            if pfd.revents == 0 {
                continue;
            }
            ready.push(Event::from_revents(pfd.fd, pfd.revents));
            pfd.revents = 0;
        }
        ready
    }

    fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout
            .map(|d| i32::try_from(d.as_millis()).unwrap_or(i32::MAX))
            .unwrap_or(-1);

        // SAFETY: poll(2) requires:
        // - self.fds.as_mut_ptr() points to valid, writable memory for fds.len() pollfds
        //   (a dangling but aligned pointer is fine when the length is zero)
        // - fds.len() correctly reports the array length
        // - timeout_ms is -1 for infinite or >= 0 milliseconds
        // Error (including EINTR) is checked immediately
        let ret = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    #[test]
    fn test_poll_set_basic() {
        let (mut writer, reader) = UnixStream::pair().expect("Failed to create socket pair");
        let mut set = PollSet::with_capacity(4);
        set.push(reader.as_raw_fd(), Interest::READABLE);

        // Nothing written yet
        let ready = set.poll(Some(Duration::ZERO)).expect("Failed to poll");
        assert_eq!(ready, 0);
        assert!(set.take_ready().is_empty());

        writer.write_all(b"x").expect("Failed to write");

        let ready = set.poll(Some(Duration::from_millis(100))).expect("Failed to poll");
        assert_eq!(ready, 1);

        let events = set.take_ready();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fd, reader.as_raw_fd());
        assert!(events[0].is_readable());
        assert!(!events[0].is_error());

        // revents were cleared
        assert!(set.take_ready().is_empty());
    }

    #[test]
    fn test_writable_interest() {
        let (writer, _reader) = UnixStream::pair().expect("Failed to create socket pair");
        let mut set = PollSet::default();
        set.push(writer.as_raw_fd(), Interest::WRITABLE);

        let ready = set.poll(Some(Duration::from_millis(100))).expect("Failed to poll");
        assert_eq!(ready, 1);
        let events = set.take_ready();
        assert!(events[0].is_writable());
        assert!(!events[0].is_readable());
    }

    #[test]
    fn test_interest_builders_map_to_poll_events() {
        assert_eq!(Interest::default(), Interest::READABLE);
        assert_eq!(Interest::READABLE.to_poll_events(), libc::POLLIN);

        let all = Interest::READABLE.add_writable().add_priority();
        assert!(all.readable && all.writable && all.priority);
        assert_eq!(
            all.to_poll_events(),
            libc::POLLIN | libc::POLLOUT | libc::POLLPRI
        );

        // No out-of-band data pending: a priority-only watch stays quiet
        let (_writer, reader) = UnixStream::pair().expect("Failed to create socket pair");
        let mut set = PollSet::default();
        set.push(
            reader.as_raw_fd(),
            Interest {
                readable: false,
                ..Interest::default()
            }
            .add_priority(),
        );
        assert_eq!(set.poll(Some(Duration::ZERO)).expect("Failed to poll"), 0);
    }

    #[test]
    fn test_hangup_reported() {
        let (writer, reader) = UnixStream::pair().expect("Failed to create socket pair");
        let mut set = PollSet::default();
        set.push(reader.as_raw_fd(), Interest::READABLE);

        drop(writer);

        set.poll(Some(Duration::from_millis(100))).expect("Failed to poll");
        let events = set.take_ready();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_hangup() || events[0].is_readable());
    }

    #[test]
    fn test_remove_purges_all_entries() {
        let (a, b) = UnixStream::pair().expect("Failed to create socket pair");
        let mut set = PollSet::default();
        set.push(a.as_raw_fd(), Interest::READABLE);
        set.push(b.as_raw_fd(), Interest::READABLE);
        set.push(a.as_raw_fd(), Interest::WRITABLE);

        assert_eq!(set.remove(a.as_raw_fd()), 2);
        assert_eq!(set.len(), 1);
        assert_eq!(set.remove(a.as_raw_fd()), 0);
    }

    #[test]
    fn test_empty_set_does_not_block_on_zero_timeout() {
        let mut set = PollSet::default();
        assert!(set.is_empty());

        let start = Instant::now();
        let ready = set.poll(Some(Duration::ZERO)).expect("Failed to poll");
        assert_eq!(ready, 0);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_wait_honours_timeout() {
        let (_writer, reader) = UnixStream::pair().expect("Failed to create socket pair");
        let mut set = PollSet::default();
        set.push(reader.as_raw_fd(), Interest::READABLE);

        let start = Instant::now();
        let ready = set.wait(Some(Duration::from_millis(30))).expect("Failed to wait");
        assert_eq!(ready, 0);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
