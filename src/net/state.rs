//! Connection lifecycle phases.
//!
//! States are ordered; a single connection only ever moves forward through
//! them. [`StateGate`] enforces that ordering so observers never see a
//! connection step backwards.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle phase of a connection, reported through the info callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ConnState {
    /// Client is dialing. Never emitted by a server.
    Dial = 0,
    /// Connection accepted.
    New = 1,
    /// Read side handed to the handler.
    Read = 2,
    /// Read side closed.
    CloseRead = 3,
    /// Handler is running.
    Handler = 4,
    /// First bytes written back to the peer.
    Write = 5,
    /// Write side shut down.
    CloseWrite = 6,
    /// Transport closed.
    Close = 7,
}

impl ConnState {
    pub const ALL: [ConnState; 8] = [
        ConnState::Dial,
        ConnState::New,
        ConnState::Read,
        ConnState::CloseRead,
        ConnState::Handler,
        ConnState::Write,
        ConnState::CloseWrite,
        ConnState::Close,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Short identifier suitable for metric labels.
    pub fn code(self) -> &'static str {
        match self {
            ConnState::Dial => "dial",
            ConnState::New => "new",
            ConnState::Read => "read",
            ConnState::CloseRead => "close_read",
            ConnState::Handler => "handler",
            ConnState::Write => "write",
            ConnState::CloseWrite => "close_write",
            ConnState::Close => "close",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnState::Dial => "Dial Connection",
            ConnState::New => "New Connection",
            ConnState::Read => "Read Incoming Stream",
            ConnState::CloseRead => "Close Incoming Stream",
            ConnState::Handler => "Run Handler",
            ConnState::Write => "Write Outgoing Stream",
            ConnState::CloseWrite => "Close Outgoing Stream",
            ConnState::Close => "Close Connection",
        };
        f.write_str(label)
    }
}

/// Monotonic high-water mark of the states a connection has reported.
///
/// Stores `state + 1` so that zero means "nothing reported yet".
#[derive(Debug, Default)]
pub struct StateGate(AtomicU8);

impl StateGate {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Move the gate to `state`. Returns `true` only if `state` is strictly
    /// beyond everything reported so far, in which case the caller should
    /// emit it.
    pub fn advance(&self, state: ConnState) -> bool {
        let mark = state.as_u8() + 1;
        self.0.fetch_max(mark, Ordering::AcqRel) < mark
    }

    /// Latest state reported, if any.
    pub fn current(&self) -> Option<ConnState> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            mark => ConnState::from_u8(mark - 1),
        }
    }
}
