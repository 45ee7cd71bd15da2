//! Session identity for transfers.
//!
//! Session ids are handed out by an explicitly constructed [`SessionCounter`]
//! rather than a process-wide static, so every door (and every test) owns its
//! own sequence. The counter is seeded from the wall clock, which keeps ids of
//! successive runs apart without persisting anything.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Process-local identifier of a transfer.
///
/// Used for ordering and for correlating asynchronous mover notifications;
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Wraps a raw id. Mostly useful for tests and message routing.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic, time-seeded source of [`SessionId`]s.
#[derive(Debug)]
pub struct SessionCounter {
    next: AtomicU64,
}

impl SessionCounter {
    /// Creates a counter seeded with the current time in milliseconds.
    #[must_use]
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX / 2))
            .unwrap_or(0);
        Self::starting_at(seed)
    }

    /// Creates a counter whose first id is `first`.
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Returns the next id. Ids are strictly increasing across all callers.
    pub fn next_id(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for SessionCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Address of the door cell driving a transfer (`cell@domain`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoorAddress {
    /// Cell name of the door.
    pub cell: String,
    /// Domain the door runs in.
    pub domain: String,
}

impl DoorAddress {
    /// Creates a door address.
    pub fn new(cell: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            cell: cell.into(),
            domain: domain.into(),
        }
    }
}

impl fmt::Display for DoorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.cell, self.domain)
    }
}

/// Builds the transaction string that identifies a transfer in billing
/// records and mover initiator fields.
#[must_use]
pub fn transaction(door: Option<&DoorAddress>, session_id: SessionId) -> String {
    match door {
        Some(door) => format!("door:{door}:{session_id}"),
        None => session_id.to_string(),
    }
}
