//! Core identifier types.

use std::fmt;

/// Opaque identity of one client connection, stable for its lifetime.
///
/// The transport layer allocates these; the core only stores and compares
/// them. A completion that outlives its session resolves the identity
/// through the registry instead of holding any session reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}
