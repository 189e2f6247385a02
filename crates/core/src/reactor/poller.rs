use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

/// Readiness the transfer engine wants to be woken for on one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub fn readable(fd: RawFd) -> Self {
        Self {
            fd,
            readable: true,
            writable: false,
        }
    }

    pub fn writable(fd: RawFd) -> Self {
        Self {
            fd,
            readable: false,
            writable: true,
        }
    }
}

/// Block until one of `readable` (or an engine descriptor) is ready, or
/// `timeout` elapses.
///
/// Returns one flag per entry of `readable`. Engine descriptors only wake
/// the call; the engine checks its own sockets when driven.
///
/// Every descriptor must stay open for the duration of the call. The
/// reactor guarantees this because descriptors are owned by the code that
/// registered them and nothing else runs while the thread is blocked here.
pub(crate) fn wait(
    readable: &[RawFd],
    engine: &[Interest],
    timeout: Duration,
) -> nix::Result<Vec<bool>> {
    let mut fds: Vec<PollFd<'_>> = Vec::with_capacity(readable.len() + engine.len());

    for &fd in readable {
        // SAFETY: fd is non-negative (checked by `Reactor::set_descriptor`)
        // and open for the duration of this call, see above.
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        fds.push(PollFd::new(fd, PollFlags::POLLIN));
    }

    for interest in engine.iter().filter(|i| i.fd >= 0) {
        let mut flags = PollFlags::empty();
        if interest.readable {
            flags |= PollFlags::POLLIN;
        }
        if interest.writable {
            flags |= PollFlags::POLLOUT;
        }
        // SAFETY: engine sockets are owned by the engine, which cannot
        // close them while the reactor is blocked.
        let fd = unsafe { BorrowedFd::borrow_raw(interest.fd) };
        fds.push(PollFd::new(fd, flags));
    }

    poll(&mut fds, PollTimeout::from(timeout_millis(timeout)))?;

    let wake = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
    Ok(fds[..readable.len()]
        .iter()
        .map(|fd| fd.revents().is_some_and(|r| r.intersects(wake)))
        .collect())
}

/// Millisecond poll timeout, rounded up so a deadline a fraction of a
/// millisecond away does not spin.
fn timeout_millis(wait: Duration) -> u16 {
    let millis = wait.as_nanos().div_ceil(1_000_000);
    u16::try_from(millis).unwrap_or(u16::MAX)
}
