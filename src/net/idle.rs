//! Idle-timeout bookkeeping for a single connection.
//!
//! Every completed I/O operation pushes the deadline forward. The deadline
//! is only consulted when the transport has nothing ready: an operation that
//! completes on the same poll always wins, and a pending operation that has
//! transferred nothing fails once the deadline passes.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// I/O direction; each has its own timer so split halves polled from
/// different tasks both get woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug)]
pub struct IdleTimer {
    timeout: Duration,
    deadline: Instant,
    read: Pin<Box<Sleep>>,
    write: Pin<Box<Sleep>>,
    read_pending: bool,
    write_pending: bool,
}

impl IdleTimer {
    pub fn new(timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            timeout,
            deadline,
            read: Box::pin(tokio::time::sleep_until(deadline)),
            write: Box::pin(tokio::time::sleep_until(deadline)),
            read_pending: false,
            write_pending: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Record activity: the connection may now stay idle for another full timeout.
    pub fn touch(&mut self) {
        self.deadline = Instant::now() + self.timeout;
    }

    /// Called before polling the transport. Fails a fresh operation that
    /// starts after the deadline has already passed.
    pub fn check_start(&mut self, dir: Direction) -> io::Result<()> {
        if !*self.pending_mut(dir) && Instant::now() >= self.deadline {
            return Err(idle_timeout_error(self.timeout));
        }
        Ok(())
    }

    /// Called when the transport completed an operation.
    pub fn completed(&mut self, dir: Direction, activity: bool) {
        *self.pending_mut(dir) = false;
        if activity {
            self.touch();
        }
    }

    /// Called when the transport returned `Pending`. Arms the direction's
    /// timer and reports a timeout if the deadline has been reached.
    pub fn poll_expired(&mut self, dir: Direction, cx: &mut Context<'_>) -> Poll<io::Error> {
        let deadline = self.deadline;
        let timeout = self.timeout;
        *self.pending_mut(dir) = true;

        let sleep = match dir {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        };
        if sleep.deadline() != deadline {
            sleep.as_mut().reset(deadline);
        }

        match sleep.as_mut().poll(cx) {
            Poll::Ready(()) => {
                *self.pending_mut(dir) = false;
                Poll::Ready(idle_timeout_error(timeout))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn pending_mut(&mut self, dir: Direction) -> &mut bool {
        match dir {
            Direction::Read => &mut self.read_pending,
            Direction::Write => &mut self.write_pending,
        }
    }
}

/// The error handlers observe when a connection idles out.
pub fn idle_timeout_error(timeout: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("connection idle for more than {:?}", timeout),
    )
}
