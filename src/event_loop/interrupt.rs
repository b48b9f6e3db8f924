// src/event_loop/interrupt.rs - Keyboard break (SIGINT) recording
//
// The handler only stores into a process-wide atomic flag. The dispatch
// driver takes the flag at the top of each iteration and turns it into an
// application quit request. SA_RESTART stays unset: an idle poll(2) must
// return EINTR so the flag is seen before the idle timeout runs out.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

static KEYBOARD_BREAK: AtomicBool = AtomicBool::new(false);

extern "C" fn keyboard_break_handler(sig: libc::c_int) {
    if sig == libc::SIGINT {
        KEYBOARD_BREAK.store(true, Ordering::SeqCst);
    }
}

/// Installs the SIGINT handler for this process.
pub fn install_keyboard_break_handler() -> io::Result<()> {
    // SAFETY: std::mem::zeroed() for sigaction is safe because:
    // - sigaction is a POD type; all-zero is a valid (empty) action
    // - every field we rely on is overwritten below
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = keyboard_break_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
    action.sa_flags = 0;

    // SAFETY: sigemptyset writes only into action.sa_mask, a valid sigset_t.
    unsafe { libc::sigemptyset(&mut action.sa_mask) };

    // SAFETY: sigaction(2) requires:
    // - &action points to a fully initialised sigaction
    // - the old-action pointer may be null
    // The handler is async-signal-safe: it only performs an atomic store.
    let ret = unsafe { libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut()) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Whether a keyboard break is recorded and not yet taken.
pub fn keyboard_break_occurred() -> bool {
    KEYBOARD_BREAK.load(Ordering::SeqCst)
}

/// Returns and clears the recorded keyboard break.
pub(crate) fn take_keyboard_break() -> bool {
    KEYBOARD_BREAK.swap(false, Ordering::SeqCst)
}
