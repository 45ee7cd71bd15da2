use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::billing::BillingNotifier;
use crate::namespace::AttributeStore;
use crate::pool::{MoverController, PoolSelector};
use crate::registry::TransferRegistry;
use crate::session::{DoorAddress, SessionCounter};

/// Default timeout of name-space requests (5 minutes).
pub const DEFAULT_NAMESPACE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default timeout of pool manager requests (5 minutes).
pub const DEFAULT_POOL_MANAGER_TIMEOUT: Duration = Duration::from_secs(300);

/// Default timeout of pool requests (90 seconds).
pub const DEFAULT_POOL_TIMEOUT: Duration = Duration::from_secs(90);

/// Per-service request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub namespace: Duration,
    pub pool_manager: Duration,
    pub pool: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE_TIMEOUT,
            pool_manager: DEFAULT_POOL_MANAGER_TIMEOUT,
            pool: DEFAULT_POOL_TIMEOUT,
        }
    }
}

/// Services shared by all transfers of a door.
///
/// Cheap to clone; every service is reference counted.
#[derive(Clone)]
pub struct TransferContext {
    pub(crate) namespace: Arc<dyn AttributeStore>,
    pub(crate) pool_selector: Arc<dyn PoolSelector>,
    pub(crate) movers: Arc<dyn MoverController>,
    pub(crate) billing: Arc<dyn BillingNotifier>,
    pub(crate) sessions: Arc<SessionCounter>,
    pub(crate) registry: Option<Arc<TransferRegistry>>,
    pub(crate) door: Option<DoorAddress>,
    pub(crate) timeouts: Timeouts,
}

impl TransferContext {
    /// Creates a context with a fresh session counter and default timeouts.
    pub fn new(
        namespace: Arc<dyn AttributeStore>,
        pool_selector: Arc<dyn PoolSelector>,
        movers: Arc<dyn MoverController>,
        billing: Arc<dyn BillingNotifier>,
    ) -> Self {
        Self {
            namespace,
            pool_selector,
            movers,
            billing,
            sessions: Arc::new(SessionCounter::new()),
            registry: None,
            door: None,
            timeouts: Timeouts::default(),
        }
    }

    /// Shares `sessions` instead of the context's own counter.
    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<SessionCounter>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Registers every transfer created with this context in `registry`.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<TransferRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the address of the door cell.
    #[must_use]
    pub fn with_door(mut self, door: DoorAddress) -> Self {
        self.door = Some(door);
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    #[must_use]
    pub fn door(&self) -> Option<&DoorAddress> {
        self.door.as_ref()
    }

    #[must_use]
    pub fn registry(&self) -> Option<&Arc<TransferRegistry>> {
        self.registry.as_ref()
    }

    /// Name of the pool manager that pool selections go to.
    #[must_use]
    pub fn pool_manager(&self) -> &str {
        self.pool_selector.name()
    }
}

impl fmt::Debug for TransferContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferContext")
            .field("pool_manager", &self.pool_manager())
            .field("door", &self.door)
            .field("timeouts", &self.timeouts)
            .field("registry", &self.registry.is_some())
            .finish_non_exhaustive()
    }
}
