//! Registry of active transfers.
//!
//! The registry only observes transfers: it keeps weak references, and a
//! transfer removes its own entry when the door drops its last handle. It is
//! read by introspection (the "active transfers" view) and by whatever
//! routes mover notifications back to their transfer.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;

use crate::session::SessionId;
use crate::transfer::{IoDoorEntry, Transfer};

/// Live transfers by session id.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    transfers: DashMap<SessionId, Weak<Transfer>>,
}

impl TransferRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `transfer`. Called by [`Transfer::new`] for contexts with a registry.
    pub fn register(&self, transfer: &Arc<Transfer>) {
        self.transfers
            .insert(transfer.session_id(), Arc::downgrade(transfer));
    }

    /// Removes the entry of a dropped transfer. Called by `Drop for Transfer`.
    pub(crate) fn unregister(&self, session_id: SessionId) {
        self.transfers
            .remove_if(&session_id, |_, weak| weak.strong_count() == 0);
    }

    /// Returns the transfer with `session_id`, if it is still alive.
    #[must_use]
    pub fn get(&self, session_id: SessionId) -> Option<Arc<Transfer>> {
        let transfer = self
            .transfers
            .get(&session_id)
            .and_then(|entry| entry.value().upgrade());
        if transfer.is_none() {
            self.transfers
                .remove_if(&session_id, |_, weak| weak.strong_count() == 0);
        }
        transfer
    }

    /// Live transfers, most recent first.
    #[must_use]
    pub fn transfers(&self) -> Vec<Arc<Transfer>> {
        self.prune();
        let mut live: Vec<Arc<Transfer>> = self
            .transfers
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        live.sort();
        live
    }

    /// Snapshot of all live transfers, most recent first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<IoDoorEntry> {
        self.transfers()
            .iter()
            .map(|transfer| transfer.io_door_entry())
            .collect()
    }

    /// Number of registered entries, including ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Drops entries of transfers that no longer exist.
    pub fn prune(&self) {
        let before = self.transfers.len();
        self.transfers.retain(|_, weak| weak.strong_count() > 0);
        let pruned = before.saturating_sub(self.transfers.len());
        if pruned > 0 {
            debug!(pruned, "pruned finished transfers");
        }
    }
}
