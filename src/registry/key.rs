//! Session identity

use serde::Serialize;

/// Opaque identity of one signaling connection
///
/// Allocated from a monotonically increasing counter in the server context,
/// so two live connections never share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw identifier
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw identifier
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
