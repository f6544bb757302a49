//! `poll(2)`-backed poller with a self-pipe wake source.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::pipe;
use tracing::{debug, trace};

use super::{Interest, PollEvent, PollRequest, Poller, Readiness, WaitOutcome, WakeSignal};

/// Write end of the self-pipe.
///
/// Writing one byte makes the read end readable, which the poller always
/// includes in its wait set.
#[derive(Debug)]
pub struct PipeWaker {
    tx: File,
}

impl WakeSignal for PipeWaker {
    fn wake(&self) -> io::Result<()> {
        loop {
            match (&self.tx).write(&[1]) {
                Ok(_) => return Ok(()),
                // A full pipe already guarantees the next wait returns.
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Poller built on `poll(2)`.
///
/// The `PollFd` set borrows the watched descriptors, so it only lives for one
/// wait. What persists between waits is the list of polled request indices,
/// pre-sized from `poll.buffer_capacity`.
#[derive(Debug)]
pub struct SysPoller {
    wake_rx: File,
    waker: Arc<PipeWaker>,
    polled: Vec<usize>,
}

impl SysPoller {
    /// Create a poller and its wake pipe.
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(0)
    }

    /// Create a poller whose per-wait buffers start with room for
    /// `capacity` descriptors.
    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        let (rx, tx) = pipe()?;
        prepare_pipe_end(&rx)?;
        prepare_pipe_end(&tx)?;

        Ok(Self {
            wake_rx: File::from(rx),
            waker: Arc::new(PipeWaker { tx: File::from(tx) }),
            polled: Vec::with_capacity(capacity),
        })
    }

    /// Empty the wake pipe so the next wait blocks again.
    fn drain_wake_pipe(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.wake_rx).read(&mut buf) {
                Ok(0) => break,
                Ok(n) => trace!("Drained {} wake bytes", n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

fn prepare_pipe_end(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    fcntl(raw, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}

fn interest_flags(interest: Interest) -> PollFlags {
    match interest {
        Interest::Read => PollFlags::POLLIN,
        Interest::Write => PollFlags::POLLOUT,
        Interest::Exceptional => PollFlags::POLLPRI,
        Interest::Custom => PollFlags::empty(),
    }
}

fn readiness_from(revents: PollFlags) -> Readiness {
    Readiness {
        readable: revents.contains(PollFlags::POLLIN),
        writable: revents.contains(PollFlags::POLLOUT),
        exceptional: revents.contains(PollFlags::POLLPRI),
        hangup: revents.contains(PollFlags::POLLHUP),
        error: revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL),
        triggered: false,
    }
}

fn poll_timeout(timeout: Option<Duration>) -> PollTimeout {
    match timeout {
        None => PollTimeout::NONE,
        Some(t) => {
            // Round up so a wait never ends just before the deadline it serves.
            let ms = t.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32;
            PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX)
        }
    }
}

impl Poller for SysPoller {
    fn wait(
        &mut self,
        requests: &[PollRequest],
        timeout: Option<Duration>,
        events: &mut Vec<PollEvent>,
    ) -> io::Result<WaitOutcome> {
        self.polled.clear();
        self.polled.extend(
            requests
                .iter()
                .enumerate()
                .filter(|(_, r)| r.fd >= 0 && r.interest != Interest::Custom)
                .map(|(i, _)| i),
        );

        let mut fds = Vec::with_capacity(self.polled.len() + 1);
        fds.push(PollFd::new(self.wake_rx.as_fd(), PollFlags::POLLIN));
        for &i in &self.polled {
            let request = &requests[i];
            // SAFETY: a watcher's descriptor must stay open while the watcher
            // is registered; it is only borrowed for the duration of this call.
            let fd = unsafe { BorrowedFd::borrow_raw(request.fd) };
            fds.push(PollFd::new(fd, interest_flags(request.interest)));
        }

        poll(&mut fds, poll_timeout(timeout)).map_err(io::Error::from)?;

        let woken = fds[0]
            .revents()
            .is_some_and(|r| r.contains(PollFlags::POLLIN));
        for (&i, pfd) in self.polled.iter().zip(&fds[1..]) {
            let request = &requests[i];
            if let Some(revents) = pfd.revents() {
                if !revents.is_empty() {
                    events.push(PollEvent {
                        fd: request.fd,
                        readiness: readiness_from(revents),
                    });
                }
            }
        }
        drop(fds);

        if woken {
            debug!("Poller woken through wake pipe");
            self.drain_wake_pipe();
        }

        Ok(WaitOutcome { woken })
    }

    fn waker(&self) -> Arc<dyn WakeSignal> {
        self.waker.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_zero_timeout_returns_immediately() {
        let mut poller = SysPoller::new().unwrap();
        let mut events = Vec::new();

        let start = Instant::now();
        let outcome = poller
            .wait(&[], Some(Duration::ZERO), &mut events)
            .unwrap();
        assert!(!outcome.woken);
        assert!(events.is_empty());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_wake_interrupts_wait() {
        let mut poller = SysPoller::new().unwrap();
        let waker = poller.waker();
        waker.wake().unwrap();
        waker.wake().unwrap();

        let mut events = Vec::new();
        let outcome = poller
            .wait(&[], Some(Duration::from_secs(5)), &mut events)
            .unwrap();
        assert!(outcome.woken);

        // Drained: the next wait times out instead of seeing the old bytes.
        let outcome = poller
            .wait(&[], Some(Duration::from_millis(10)), &mut events)
            .unwrap();
        assert!(!outcome.woken);
    }

    #[test]
    fn test_reports_readable_pipe() {
        let mut poller = SysPoller::new().unwrap();
        let (rx, tx) = pipe().unwrap();
        let request = PollRequest {
            fd: rx.as_raw_fd(),
            interest: Interest::Read,
        };

        let mut events = Vec::new();
        poller
            .wait(&[request], Some(Duration::ZERO), &mut events)
            .unwrap();
        assert!(events.is_empty());

        File::from(tx).write_all(b"x").unwrap();
        poller
            .wait(&[request], Some(Duration::from_secs(1)), &mut events)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fd, rx.as_raw_fd());
        assert!(events[0].readiness.readable || events[0].readiness.hangup);
    }

    #[test]
    fn test_polled_buffer_is_reused() {
        let mut poller = SysPoller::with_capacity(8).unwrap();
        let (rx, _tx) = pipe().unwrap();
        let requests = [
            PollRequest {
                fd: rx.as_raw_fd(),
                interest: Interest::Read,
            },
            PollRequest {
                fd: -1,
                interest: Interest::Custom,
            },
        ];

        let mut events = Vec::new();
        for _ in 0..3 {
            poller
                .wait(&requests, Some(Duration::ZERO), &mut events)
                .unwrap();
        }
        assert_eq!(poller.polled, vec![0]);
        assert!(poller.polled.capacity() >= 8);
        assert!(events.is_empty());
    }

    #[test]
    fn test_poll_timeout_rounds_up() {
        assert_eq!(poll_timeout(None), PollTimeout::NONE);
        assert_eq!(poll_timeout(Some(Duration::ZERO)), PollTimeout::ZERO);
        assert_eq!(
            poll_timeout(Some(Duration::from_micros(1500))),
            PollTimeout::try_from(2i32).unwrap()
        );
    }
}
