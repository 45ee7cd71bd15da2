//! Usage records sent to the billing service.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{ErrorCode, TransferError};
use crate::namespace::{PnfsId, StorageInfo};

/// One usage record per transfer, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoorRequestInfo {
    /// Door cell that handled the transfer (`cell@domain`).
    pub cell: String,
    /// DN or user name of the subject.
    pub owner: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub path: String,
    pub transaction: String,
    /// Milliseconds between transfer creation and this record.
    pub transaction_duration_ms: u64,
    /// Address of the client that connected to the door.
    pub client: Option<String>,
    /// All client addresses, relays first, comma separated.
    pub client_chain: String,
    pub pnfs_id: Option<PnfsId>,
    /// Pool that served the transfer, if one was selected.
    pub pool: Option<String>,
    pub file_size: Option<u64>,
    pub result_code: ErrorCode,
    pub message: String,
    pub storage_info: Option<StorageInfo>,
}

impl DoorRequestInfo {
    /// Returns true if the record reports a successful transfer.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result_code.is_ok()
    }
}

/// Fire-and-forget sink for usage records.
#[async_trait]
pub trait BillingNotifier: Send + Sync {
    /// Sends `info` without waiting for an acknowledgement.
    ///
    /// An error means the record could not be routed; callers log it.
    async fn record(&self, info: DoorRequestInfo) -> Result<(), TransferError>;
}
