//! Door-side drivers for complete uploads and downloads.
//!
//! # Overview
//!
//! A [`Door`] runs the whole life of one [`Transfer`]:
//!
//! 1. resolve the name space (create the entry for uploads)
//! 2. select a pool and start a mover, retrying as the policy allows
//! 3. wait for the mover
//! 4. on failure, kill the mover and remove the entry of a failed upload
//! 5. send exactly one billing record
//!
//! Secondary failures during cleanup are logged. The returned
//! [`TransferReport`] always carries the primary result.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{ErrorCode, TransferError};
use crate::namespace::{FileAttributes, FileTarget, FileType, PnfsId, RequestedAttribute, parent_of};
use crate::pool::MoverId;
use crate::retry::RetryPolicy;
use crate::subject::Subject;
use crate::transfer::{IoDoorEntry, Protocol, Transfer, TransferContext, TransferState};

/// Default time a mover may take to finish (5 minutes).
pub const DEFAULT_MOVER_TIMEOUT: Duration = Duration::from_secs(300);

/// Default time to wait for a killed mover to confirm (10 seconds).
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(10);

const PARENT_ATTRIBUTES: &[RequestedAttribute] = &[
    RequestedAttribute::Type,
    RequestedAttribute::Owner,
    RequestedAttribute::Group,
    RequestedAttribute::Mode,
];

/// Per-door transfer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DoorSettings {
    pub retry_policy: RetryPolicy,
    /// Time the mover may take once started.
    pub mover_timeout: Duration,
    /// Time to wait for a killed mover to confirm.
    pub kill_timeout: Duration,
    pub io_queue: Option<String>,
    pub overwrite_allowed: bool,
    /// Create missing parent directories of uploads.
    pub create_parents: bool,
}

impl Default for DoorSettings {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            mover_timeout: DEFAULT_MOVER_TIMEOUT,
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            io_queue: None,
            overwrite_allowed: false,
            create_parents: false,
        }
    }
}

/// Outcome of one transfer as reported to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub session_id: u64,
    pub path: String,
    pub is_write: bool,
    pub pnfs_id: Option<PnfsId>,
    pub pool: Option<String>,
    pub mover_id: Option<MoverId>,
    pub code: ErrorCode,
    pub message: String,
    /// Pool-selection attempts.
    pub attempts: u32,
    pub state: TransferState,
}

impl TransferReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code.is_ok()
    }
}

/// Drives transfers against one set of services.
#[derive(Clone)]
pub struct Door {
    ctx: TransferContext,
    protocol: Arc<dyn Protocol>,
    settings: DoorSettings,
}

impl Door {
    pub fn new(ctx: TransferContext, protocol: Arc<dyn Protocol>, settings: DoorSettings) -> Self {
        Self {
            ctx,
            protocol,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &DoorSettings {
        &self.settings
    }

    #[must_use]
    pub fn context(&self) -> &TransferContext {
        &self.ctx
    }

    /// Snapshot of the transfers in progress, most recent first.
    #[must_use]
    pub fn active_transfers(&self) -> Vec<IoDoorEntry> {
        self.ctx
            .registry()
            .map(|registry| registry.snapshot())
            .unwrap_or_default()
    }

    /// Creates a transfer configured with this door's settings.
    ///
    /// Use it to drive the steps individually instead of calling
    /// [`upload`](Self::upload) or [`download`](Self::download).
    #[must_use]
    pub fn transfer(&self, subject: Subject, path: &str, client: Option<SocketAddr>) -> Arc<Transfer> {
        let transfer = Transfer::new(self.ctx.clone(), subject, path, Arc::clone(&self.protocol));
        transfer.set_overwrite_allowed(self.settings.overwrite_allowed);
        if let Some(queue) = &self.settings.io_queue {
            transfer.set_io_queue(queue.clone());
        }
        if let Some(client) = client {
            transfer.set_client_address(client);
        }
        transfer
    }

    /// Uploads `path` for `subject`.
    #[instrument(skip(self, subject), fields(uid = ?subject.uid))]
    pub async fn upload(
        &self,
        subject: Subject,
        path: &str,
        client: Option<SocketAddr>,
    ) -> TransferReport {
        let transfer = self.transfer(subject, path, client);
        let result = self.run_upload(&transfer).await;
        self.complete(&transfer, result).await
    }

    /// Downloads `path` for `subject`.
    #[instrument(skip(self, subject), fields(uid = ?subject.uid))]
    pub async fn download(
        &self,
        subject: Subject,
        path: &str,
        client: Option<SocketAddr>,
    ) -> TransferReport {
        let transfer = self.transfer(subject, path, client);
        let result = self.run_download(&transfer).await;
        self.complete(&transfer, result).await
    }

    async fn run_upload(&self, transfer: &Transfer) -> Result<(), TransferError> {
        let parent = self.parent_attributes(transfer).await?;
        if self.settings.create_parents {
            transfer.create_name_space_entry_with_parents(&parent).await?;
        } else {
            transfer.create_name_space_entry(&parent).await?;
        }
        self.run_mover(transfer).await
    }

    async fn run_download(&self, transfer: &Transfer) -> Result<(), TransferError> {
        transfer.read_name_space_entry(false).await?;
        self.run_mover(transfer).await
    }

    async fn run_mover(&self, transfer: &Transfer) -> Result<(), TransferError> {
        transfer
            .select_pool_and_start_mover(&self.settings.retry_policy)
            .await?;
        if transfer.wait_for_mover(self.settings.mover_timeout).await? {
            return Ok(());
        }
        let pool = transfer
            .pool()
            .map_or_else(|| "pool".to_string(), |pool| pool.name);
        Err(TransferError::timeout(pool, "wait for mover"))
    }

    /// Attributes of the directory an upload is created in.
    ///
    /// With `create_parents`, missing directories are skipped up to the
    /// nearest existing ancestor.
    async fn parent_attributes(&self, transfer: &Transfer) -> Result<FileAttributes, TransferError> {
        let timeout = self.ctx.timeouts().namespace;
        let subject = transfer.subject();
        let mut directory = parent_of(transfer.path()).to_string();
        loop {
            let target = FileTarget::Path(directory.clone());
            let fetched = transfer
                .call_remote(
                    "PnfsManager",
                    "get parent attributes",
                    timeout,
                    self.ctx.namespace.get_attributes(
                        &target,
                        PARENT_ATTRIBUTES,
                        &[],
                        subject.uid,
                        &subject.gids,
                        timeout,
                    ),
                )
                .await;
            match fetched {
                Ok(attributes) if attributes.file_type == Some(FileType::Dir) => {
                    return Ok(attributes);
                }
                Ok(_) => {
                    return Err(TransferError::Remote {
                        code: ErrorCode::NOT_DIR,
                        message: format!("not a directory: {directory}"),
                    });
                }
                Err(TransferError::FileNotFound { .. })
                    if self.settings.create_parents && directory != "/" =>
                {
                    debug!(directory, "parent directory missing");
                    directory = parent_of(&directory).to_string();
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn complete(&self, transfer: &Transfer, result: Result<(), TransferError>) -> TransferReport {
        let (code, message) = match &result {
            Ok(()) => {
                info!(session_id = %transfer.session_id(), path = transfer.path(), "transfer complete");
                (ErrorCode::OK, String::new())
            }
            Err(e) => {
                warn!(session_id = %transfer.session_id(), path = transfer.path(), error = %e, "transfer failed");
                (e.code(), e.to_string())
            }
        };

        if result.is_err() {
            transfer.kill_mover(self.settings.kill_timeout, &message).await;
            if transfer.is_write() {
                if let Err(e) = transfer.delete_name_space_entry().await {
                    debug!(error = %e, "not deleting name space entry");
                }
            }
        }

        transfer.notify_billing(code, &message).await;

        TransferReport {
            session_id: transfer.session_id().as_u64(),
            path: transfer.path().to_string(),
            is_write: transfer.is_write(),
            pnfs_id: transfer.pnfs_id(),
            pool: transfer.pool().map(|pool| pool.name),
            mover_id: transfer.mover_id(),
            code,
            message,
            attempts: transfer.selection_attempts(),
            state: transfer.state(),
        }
    }
}

impl std::fmt::Debug for Door {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Door")
            .field("ctx", &self.ctx)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sim::SimCluster;
    use crate::transfer::GenericProtocol;

    fn door(cluster: &SimCluster, settings: DoorSettings) -> Door {
        Door::new(
            cluster.context(),
            Arc::new(GenericProtocol::new("Http", 1, 1)),
            settings,
        )
    }

    fn cluster() -> SimCluster {
        let cluster = SimCluster::default();
        cluster.namespace.add_directory("/data", 500, 100, 0o755);
        cluster
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_succeeds() {
        let cluster = cluster();
        let door = door(&cluster, DoorSettings::default());

        let report = door.upload(Subject::new(500, 100), "/data/x", None).await;

        assert!(report.is_success(), "Expected success in: {report:?}");
        assert!(report.is_write);
        assert_eq!(report.pool.as_deref(), Some("pool-1"));
        assert_eq!(report.state, TransferState::FinishedOk);
        assert_eq!(cluster.billing.records().len(), 1);
        assert!(cluster.namespace.contains("/data/x"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_into_file_is_not_dir() {
        let cluster = cluster();
        cluster.namespace.add_file("/data/file", 500, 100, 0o644, 1);
        let door = door(&cluster, DoorSettings::default());

        let report = door.upload(Subject::new(500, 100), "/data/file/x", None).await;

        assert_eq!(report.code, ErrorCode::NOT_DIR);
        assert_eq!(cluster.billing.records()[0].result_code, ErrorCode::NOT_DIR);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_with_parents() {
        let cluster = cluster();
        let settings = DoorSettings {
            create_parents: true,
            ..DoorSettings::default()
        };
        let door = door(&cluster, settings);

        let report = door.upload(Subject::new(500, 100), "/data/a/b/x", None).await;

        assert!(report.is_success(), "Expected success in: {report:?}");
        assert!(cluster.namespace.contains("/data/a/b/x"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_without_parents_fails() {
        let cluster = cluster();
        let door = door(&cluster, DoorSettings::default());

        let report = door.upload(Subject::new(500, 100), "/data/a/x", None).await;

        assert_eq!(report.code, ErrorCode::FILE_NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_file_is_kept_on_failed_upload() {
        let cluster = cluster();
        cluster.namespace.add_file("/data/x", 500, 100, 0o644, 10);
        let door = door(&cluster, DoorSettings::default());

        let report = door.upload(Subject::new(500, 100), "/data/x", None).await;

        assert_eq!(report.code, ErrorCode::FILE_EXISTS);
        assert!(cluster.namespace.contains("/data/x"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_missing_file() {
        let cluster = cluster();
        let door = door(&cluster, DoorSettings::default());

        let report = door.download(Subject::new(500, 100), "/data/missing", None).await;

        assert_eq!(report.code, ErrorCode::FILE_NOT_FOUND);
        assert_eq!(report.attempts, 0);
        assert_eq!(cluster.billing.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_transfers_empty_after_completion() {
        let cluster = cluster();
        cluster.namespace.add_file("/data/x", 500, 100, 0o644, 10);
        let door = door(&cluster, DoorSettings::default());

        door.download(Subject::new(500, 100), "/data/x", None).await;

        assert!(door.active_transfers().is_empty());
    }
}
