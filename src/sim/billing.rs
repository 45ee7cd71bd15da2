use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::billing::{BillingNotifier, DoorRequestInfo};
use crate::error::TransferError;

/// Billing service that keeps every record it receives.
#[derive(Debug, Default)]
pub struct RecordingBilling {
    records: Mutex<Vec<DoorRequestInfo>>,
    unreachable: AtomicBool,
}

impl RecordingBilling {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes further records fail to route. Failed records are still kept.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn records(&self) -> Vec<DoorRequestInfo> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BillingNotifier for RecordingBilling {
    async fn record(&self, info: DoorRequestInfo) -> Result<(), TransferError> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(info);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransferError::no_route("billing"));
        }
        Ok(())
    }
}
