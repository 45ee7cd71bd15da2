//! In-process stand-ins for the services a door talks to.
//!
//! # Overview
//!
//! - [`InMemoryNamespace`]: a name space with Unix permission checks
//! - [`ScriptedPoolSelector`]: a pool manager with a fixed pool list and
//!   scriptable failures
//! - [`LoopbackMovers`]: pools whose movers report back to their transfer
//!   through the [`TransferRegistry`]
//! - [`RecordingBilling`]: a billing service that keeps its records
//!
//! [`SimCluster`] wires all of them into a [`TransferContext`]. The command
//! line tool and the integration tests run transfers against it.

mod billing;
mod namespace;
mod pools;

use std::sync::Arc;

pub use billing::RecordingBilling;
pub use namespace::InMemoryNamespace;
pub use pools::{LoopbackMovers, MoverScript, RecordedKill, RecordedSelection, ScriptedPoolSelector};

use crate::pool::SelectedPool;
use crate::registry::TransferRegistry;
use crate::session::{DoorAddress, SessionCounter};
use crate::transfer::{Timeouts, TransferContext};

/// Name of the simulated pool manager.
pub const POOL_MANAGER: &str = "PoolManager";

/// A complete simulated cluster.
#[derive(Debug, Clone)]
pub struct SimCluster {
    pub namespace: Arc<InMemoryNamespace>,
    pub selector: Arc<ScriptedPoolSelector>,
    pub movers: Arc<LoopbackMovers>,
    pub billing: Arc<RecordingBilling>,
    pub registry: Arc<TransferRegistry>,
    pub sessions: Arc<SessionCounter>,
    pub door: DoorAddress,
    pub timeouts: Timeouts,
}

impl SimCluster {
    /// Cluster with the given pools and default services.
    #[must_use]
    pub fn with_pools<I, S>(pools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Arc::new(TransferRegistry::new());
        let pools = pools.into_iter().map(SelectedPool::named).collect();
        Self {
            namespace: Arc::new(InMemoryNamespace::new()),
            selector: Arc::new(ScriptedPoolSelector::new(POOL_MANAGER, pools)),
            movers: Arc::new(LoopbackMovers::new(Arc::clone(&registry))),
            billing: Arc::new(RecordingBilling::new()),
            registry,
            sessions: Arc::new(SessionCounter::new()),
            door: DoorAddress::new("door", "doorDomain"),
            timeouts: Timeouts::default(),
        }
    }

    /// Replaces the pool manager.
    #[must_use]
    pub fn with_selector(mut self, selector: ScriptedPoolSelector) -> Self {
        self.selector = Arc::new(selector);
        self
    }

    /// Replaces the pools. Build `movers` on [`registry`](Self::registry).
    #[must_use]
    pub fn with_movers(mut self, movers: LoopbackMovers) -> Self {
        self.movers = Arc::new(movers);
        self
    }

    #[must_use]
    pub fn with_sessions(mut self, sessions: SessionCounter) -> Self {
        self.sessions = Arc::new(sessions);
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Context for transfers against this cluster.
    #[must_use]
    pub fn context(&self) -> TransferContext {
        TransferContext::new(
            self.namespace.clone(),
            self.selector.clone(),
            self.movers.clone(),
            self.billing.clone(),
        )
        .with_sessions(Arc::clone(&self.sessions))
        .with_registry(Arc::clone(&self.registry))
        .with_door(self.door.clone())
        .with_timeouts(self.timeouts)
    }
}

impl Default for SimCluster {
    fn default() -> Self {
        Self::with_pools(["pool-1"])
    }
}
