//! The transfer state machine.
//!
//! A [`Transfer`] drives one upload or download of one file for one
//! [`Subject`]: name-space resolution, pool selection, mover start, the wait
//! for the mover to finish, cleanup and billing.
//!
//! # Concurrency
//!
//! Two parties act on a transfer concurrently: the door task driving the
//! operation sequence, and whatever delivers the pool's "mover finished"
//! notification ([`Transfer::finished`]). All mutable fields live behind one
//! mutex that is never held across an `.await`. The mover outcome is
//! published through a `watch` channel so that any number of waiters observe
//! the same value.
//!
//! The first outcome recorded by [`Transfer::finished`] is final. Later
//! notifications, such as a pool confirming a kill after a regular finish,
//! are ignored.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use transfer_door::{GenericProtocol, RetryPolicy, Subject, Transfer, TransferContext};
//!
//! # async fn example(ctx: TransferContext) -> Result<(), Box<dyn std::error::Error>> {
//! let protocol = Arc::new(GenericProtocol::new("Http", 1, 1));
//! let transfer = Transfer::new(ctx, Subject::new(500, 100), "/data/x", protocol);
//! transfer.read_name_space_entry(false).await?;
//! transfer.select_pool_and_start_mover(&RetryPolicy::try_once(Duration::from_secs(60))).await?;
//! transfer.wait_for_mover(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

mod context;
mod entry;
mod protocol;
mod selection;
mod state;

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

pub use context::{
    DEFAULT_NAMESPACE_TIMEOUT, DEFAULT_POOL_MANAGER_TIMEOUT, DEFAULT_POOL_TIMEOUT, Timeouts,
    TransferContext,
};
pub use protocol::{GenericProtocol, Protocol};
pub use state::TransferState;

use crate::billing::DoorRequestInfo;
use crate::error::{ErrorCode, TransferError};
use crate::namespace::{FileAttributes, PnfsId, StorageInfo};
use crate::pool::{MoverFinished, MoverId, MoverInfo, ProtocolInfo, SelectedPool};
use crate::session::{self, SessionId};
use crate::subject::Subject;
use state::MoverOutcome;

/// Reported for a pool or door that is not known.
const UNKNOWN: &str = "<unknown>";

#[derive(Debug)]
struct Inner {
    state: TransferState,
    status: Option<String>,
    pnfs_id: Option<PnfsId>,
    attributes: FileAttributes,
    is_write: bool,
    pool: Option<SelectedPool>,
    mover_id: Option<MoverId>,
    mover_created: bool,
    mover_finished: bool,
    error: Option<TransferError>,
    protocol_info: Option<ProtocolInfo>,
    client_addresses: Vec<SocketAddr>,
    io_queue: Option<String>,
    overwrite_allowed: bool,
    allow_staging: bool,
    allocation: Option<u64>,
    maximum_length: Option<u64>,
    tried_hosts: BTreeSet<String>,
    selection_attempts: u32,
    cleaned_up: bool,
    billing_notified: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: TransferState::Created,
            status: None,
            pnfs_id: None,
            attributes: FileAttributes::default(),
            is_write: false,
            pool: None,
            mover_id: None,
            mover_created: false,
            mover_finished: false,
            error: None,
            protocol_info: None,
            client_addresses: Vec::new(),
            io_queue: None,
            overwrite_allowed: false,
            allow_staging: true,
            allocation: None,
            maximum_length: None,
            tried_hosts: BTreeSet::new(),
            selection_attempts: 0,
            cleaned_up: false,
            billing_notified: false,
        }
    }

    fn has_mover(&self) -> bool {
        self.mover_created && !self.mover_finished
    }

    fn set_pnfs_id(&mut self, pnfs_id: PnfsId) -> Result<(), TransferError> {
        match &self.pnfs_id {
            Some(existing) if *existing != pnfs_id => Err(TransferError::illegal_state(
                "set pnfs id",
                format!("pnfs id already set to {existing}, refusing {pnfs_id}"),
            )),
            Some(_) => Ok(()),
            None => {
                self.pnfs_id = Some(pnfs_id);
                Ok(())
            }
        }
    }
}

/// Snapshot of a transfer for the "active transfers" view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IoDoorEntry {
    pub session_id: SessionId,
    pub pnfs_id: Option<PnfsId>,
    pub path: String,
    pub owner: Option<String>,
    pub pool: String,
    pub status: Option<String>,
    pub state: TransferState,
    /// Milliseconds since the Unix epoch.
    pub started_at_ms: u64,
    pub client: Option<String>,
}

/// One upload or download of one file.
pub struct Transfer {
    ctx: TransferContext,
    session_id: SessionId,
    path: String,
    subject: Subject,
    started_at: SystemTime,
    created: Instant,
    protocol: Arc<dyn Protocol>,
    inner: Mutex<Inner>,
    outcome: watch::Sender<MoverOutcome>,
    interrupt: watch::Sender<bool>,
}

impl Transfer {
    /// Creates a transfer of `path` for `subject`.
    ///
    /// The transfer takes the next session id of the context's counter and
    /// registers itself with the context's registry, if any.
    pub fn new(
        ctx: TransferContext,
        subject: Subject,
        path: impl Into<String>,
        protocol: Arc<dyn Protocol>,
    ) -> Arc<Self> {
        let session_id = ctx.sessions.next_id();
        let (outcome, _) = watch::channel(MoverOutcome::Pending);
        let (interrupt, _) = watch::channel(false);

        let transfer = Arc::new(Self {
            session_id,
            path: path.into(),
            subject,
            started_at: SystemTime::now(),
            created: Instant::now(),
            protocol,
            inner: Mutex::new(Inner::new()),
            outcome,
            interrupt,
            ctx,
        });

        if let Some(registry) = transfer.ctx.registry() {
            registry.register(&transfer);
        }
        debug!(session_id = %session_id, path = %transfer.path, "transfer created");
        transfer
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: TransferState) {
        self.lock().state = state;
    }

    // ==================== Accessors ====================

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    #[must_use]
    pub fn context(&self) -> &TransferContext {
        &self.ctx
    }

    /// Wall-clock time the transfer was created.
    #[must_use]
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    #[must_use]
    pub fn state(&self) -> TransferState {
        self.lock().state
    }

    /// Human-readable description of the step in progress, if any.
    #[must_use]
    pub fn status(&self) -> Option<String> {
        self.lock().status.clone()
    }

    #[must_use]
    pub fn pnfs_id(&self) -> Option<PnfsId> {
        self.lock().pnfs_id.clone()
    }

    #[must_use]
    pub fn pool(&self) -> Option<SelectedPool> {
        self.lock().pool.clone()
    }

    #[must_use]
    pub fn mover_id(&self) -> Option<MoverId> {
        self.lock().mover_id
    }

    /// True between a successful mover start and the mover's finish notification.
    #[must_use]
    pub fn has_mover(&self) -> bool {
        self.lock().has_mover()
    }

    /// True for uploads.
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.lock().is_write
    }

    #[must_use]
    pub fn file_attributes(&self) -> FileAttributes {
        self.lock().attributes.clone()
    }

    #[must_use]
    pub fn storage_info(&self) -> Option<StorageInfo> {
        self.lock().attributes.storage_info.clone()
    }

    /// Size of the file, if known.
    #[must_use]
    pub fn length(&self) -> Option<u64> {
        self.lock().attributes.size
    }

    /// The terminal error recorded by [`finished`](Self::finished), if any.
    #[must_use]
    pub fn error(&self) -> Option<TransferError> {
        self.lock().error.clone()
    }

    /// Protocol information last sent to, or returned by, the pool.
    #[must_use]
    pub fn protocol_info(&self) -> Option<ProtocolInfo> {
        self.lock().protocol_info.clone()
    }

    /// Address of the client connected to the door.
    #[must_use]
    pub fn client_address(&self) -> Option<SocketAddr> {
        self.lock().client_addresses.first().copied()
    }

    /// All client addresses, starting with the one connected to the door.
    #[must_use]
    pub fn client_addresses(&self) -> Vec<SocketAddr> {
        self.lock().client_addresses.clone()
    }

    #[must_use]
    pub fn io_queue(&self) -> Option<String> {
        self.lock().io_queue.clone()
    }

    /// Hosts excluded from pool selection.
    #[must_use]
    pub fn tried_hosts(&self) -> Vec<String> {
        self.lock().tried_hosts.iter().cloned().collect()
    }

    /// Pool-selection attempts made by the last
    /// [`select_pool_and_start_mover`](Self::select_pool_and_start_mover).
    #[must_use]
    pub fn selection_attempts(&self) -> u32 {
        self.lock().selection_attempts
    }

    /// True once the name-space entry of a failed upload has been removed.
    #[must_use]
    pub fn is_cleaned_up(&self) -> bool {
        self.lock().cleaned_up
    }

    /// True once a billing record was delivered.
    #[must_use]
    pub fn is_billing_notified(&self) -> bool {
        self.lock().billing_notified
    }

    /// Identifies this transfer in billing records and mover requests.
    #[must_use]
    pub fn transaction(&self) -> String {
        session::transaction(self.ctx.door(), self.session_id)
    }

    // ==================== Setters ====================

    pub fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        debug!(session_id = %self.session_id, status = %status, "status");
        self.lock().status = Some(status);
    }

    pub fn clear_status(&self) {
        self.lock().status = None;
    }

    /// Sets `status` until the returned guard is dropped.
    fn status_until(&self, status: impl Into<String>) -> StatusGuard<'_> {
        self.set_status(status);
        StatusGuard { transfer: self }
    }

    pub fn set_client_address(&self, address: SocketAddr) {
        self.lock().client_addresses = vec![address];
    }

    /// Sets the client chain, starting with the client connected to the door.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidArgs`] for an empty list.
    pub fn set_client_addresses(&self, addresses: Vec<SocketAddr>) -> Result<(), TransferError> {
        if addresses.is_empty() {
            return Err(TransferError::invalid_args("empty address list is not allowed"));
        }
        self.lock().client_addresses = addresses;
        Ok(())
    }

    /// Allows an upload to replace an existing regular file.
    pub fn set_overwrite_allowed(&self, allowed: bool) {
        self.lock().overwrite_allowed = allowed;
    }

    /// Allows the pool manager to stage a download from tertiary storage.
    pub fn set_allow_staging(&self, allowed: bool) {
        self.lock().allow_staging = allowed;
    }

    /// Sets the space to preallocate for an upload.
    pub fn set_allocation(&self, bytes: u64) {
        self.lock().allocation = Some(bytes);
    }

    pub fn set_io_queue(&self, queue: impl Into<String>) {
        self.lock().io_queue = Some(queue.into());
    }

    /// Replaces the set of hosts excluded from pool selection.
    pub fn set_tried_hosts(&self, hosts: impl IntoIterator<Item = String>) {
        self.lock().tried_hosts = hosts.into_iter().collect();
    }

    /// Sets the file identity. It can be set only once.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::IllegalState`] if a different id is already set.
    pub fn set_pnfs_id(&self, pnfs_id: PnfsId) -> Result<(), TransferError> {
        self.lock().set_pnfs_id(pnfs_id)
    }

    /// Sets the size of the file to upload.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::IllegalState`] for downloads and
    /// [`TransferError::InvalidArgs`] if `bytes` exceeds the maximum length.
    /// Nothing is changed on error.
    pub fn set_length(&self, bytes: u64) -> Result<(), TransferError> {
        let mut inner = self.lock();
        if !inner.is_write {
            return Err(TransferError::illegal_state(
                "set length",
                "can only set length for uploads",
            ));
        }
        if let Some(max) = inner.maximum_length.filter(|max| bytes > *max) {
            return Err(TransferError::invalid_args(format!(
                "file length {bytes} is larger than the maximum length {max}"
            )));
        }
        inner.attributes.size = Some(bytes);
        if let Some(storage_info) = inner.attributes.storage_info.as_mut() {
            storage_info.file_size = bytes;
        }
        Ok(())
    }

    /// Sets the maximum size of an upload whose length is not known in advance.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::IllegalState`] for downloads and
    /// [`TransferError::InvalidArgs`] for zero or for a value below the length
    /// already set.
    pub fn set_maximum_length(&self, bytes: u64) -> Result<(), TransferError> {
        let mut inner = self.lock();
        if !inner.is_write {
            return Err(TransferError::illegal_state(
                "set maximum length",
                "can only set maximum length for uploads",
            ));
        }
        if bytes == 0 {
            return Err(TransferError::invalid_args(
                "maximum length must be a positive number",
            ));
        }
        if let Some(size) = inner.attributes.size.filter(|size| *size > bytes) {
            return Err(TransferError::invalid_args(format!(
                "maximum length {bytes} is smaller than the file length {size}"
            )));
        }
        inner.maximum_length = Some(bytes);
        Ok(())
    }

    // ==================== Interruption ====================

    /// Interrupts the step the transfer is blocked in.
    ///
    /// A blocked (or the next) [`wait_for_mover`](Self::wait_for_mover) or
    /// remote step fails with [`TransferError::Interrupted`] and consumes the
    /// interrupt.
    pub fn interrupt(&self) {
        debug!(session_id = %self.session_id, "interrupted");
        self.interrupt.send_replace(true);
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        *self.interrupt.borrow()
    }

    /// Clears the interrupt, returning whether it was set.
    pub fn take_interrupt(&self) -> bool {
        self.interrupt.send_replace(false)
    }

    /// Runs a remote call bounded by `timeout`, giving up early on interrupt.
    pub(crate) async fn call_remote<T, F>(
        &self,
        target: &str,
        operation: &'static str,
        timeout: Duration,
        call: F,
    ) -> Result<T, TransferError>
    where
        F: Future<Output = Result<T, TransferError>>,
    {
        let mut interrupts = self.interrupt.subscribe();
        tokio::select! {
            biased;
            () = wait_until_set(&mut interrupts) => {
                self.take_interrupt();
                Err(TransferError::interrupted(operation))
            }
            result = tokio::time::timeout(timeout, call) => {
                result.unwrap_or_else(|_| Err(TransferError::timeout(target, operation)))
            }
        }
    }

    // ==================== Mover Lifecycle ====================

    /// Records the outcome of the mover and wakes all waiters.
    ///
    /// Only the first call has an effect; returns whether this call was it.
    pub fn finished(&self, result: Result<(), TransferError>) -> bool {
        let mut inner = self.lock();
        self.finish_locked(&mut inner, result)
    }

    /// Like [`finished`](Self::finished) for a return-code/message pair.
    pub fn finished_with_code(&self, code: ErrorCode, message: impl Into<String>) -> bool {
        let result = match TransferError::from_code(code, message) {
            Some(error) => Err(error),
            None => Ok(()),
        };
        self.finished(result)
    }

    /// Like [`finished`](Self::finished) for a pool's notification.
    ///
    /// Also takes over the attributes and protocol information reported by
    /// the pool, unless an outcome was already recorded.
    pub fn finished_with_message(&self, message: MoverFinished) -> bool {
        let mut inner = self.lock();
        if inner.mover_finished {
            debug!(
                session_id = %self.session_id,
                mover_id = %message.mover_id,
                "ignoring mover notification for finished transfer"
            );
            return false;
        }
        let result = message.result();
        if let Some(attributes) = message.attributes {
            inner.attributes = attributes;
        }
        if let Some(protocol_info) = message.protocol_info {
            inner.protocol_info = Some(protocol_info);
        }
        self.finish_locked(&mut inner, result)
    }

    fn finish_locked(&self, inner: &mut Inner, result: Result<(), TransferError>) -> bool {
        if inner.mover_finished {
            debug!(session_id = %self.session_id, ?result, "ignoring repeated finish");
            return false;
        }
        inner.mover_finished = true;
        match &result {
            Ok(()) => {
                inner.state = TransferState::FinishedOk;
                debug!(session_id = %self.session_id, "mover finished");
            }
            Err(error) => {
                inner.state = TransferState::FinishedError;
                inner.error = Some(error.clone());
                debug!(session_id = %self.session_id, error = %error, "mover failed");
            }
        }
        self.outcome.send_replace(MoverOutcome::Finished(result));
        true
    }

    /// Waits until the mover finished or `timeout` elapsed.
    ///
    /// Returns whether the mover finished.
    ///
    /// # Errors
    ///
    /// Returns the recorded terminal error in preference to returning
    /// normally, and [`TransferError::Interrupted`] if interrupted first.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn wait_for_mover(&self, timeout: Duration) -> Result<bool, TransferError> {
        let mut outcomes = self.outcome.subscribe();
        let already_finished = outcomes.borrow().is_finished();

        if !already_finished {
            let mut interrupts = self.interrupt.subscribe();
            tokio::select! {
                biased;
                () = wait_until_set(&mut interrupts) => {
                    self.take_interrupt();
                    return Err(TransferError::interrupted("wait for mover"));
                }
                () = wait_until_finished(&mut outcomes) => {}
                () = tokio::time::sleep(timeout) => {
                    debug!(timeout_ms = timeout.as_millis(), "mover did not finish in time");
                }
            }
        }

        let inner = self.lock();
        match &inner.error {
            Some(error) => Err(error.clone()),
            None => Ok(inner.mover_finished),
        }
    }

    /// Kills the mover and waits up to `timeout` for the pool to confirm.
    ///
    /// Does nothing if no mover is running. Failures are logged; an interrupt
    /// during the wait is re-raised on the transfer.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn kill_mover(&self, timeout: Duration, explanation: &str) {
        let (pool, mover_id) = {
            let mut inner = self.lock();
            if !inner.has_mover() {
                return;
            }
            let (Some(pool), Some(mover_id)) = (inner.pool.clone(), inner.mover_id) else {
                return;
            };
            inner.state = TransferState::MoverKilling;
            (pool, mover_id)
        };

        let _status = self.status_until(format!("Mover {pool}/{mover_id}: Killing mover"));

        let sent = tokio::time::timeout(
            self.ctx.timeouts.pool,
            self.ctx.movers.kill_mover(&pool, mover_id, explanation),
        )
        .await
        .unwrap_or_else(|_| Err(TransferError::timeout(pool.name.clone(), "kill mover")));
        if let Err(e) = sent {
            error!(pool = %pool, mover_id = %mover_id, error = %e, "failed to send kill request");
            return;
        }

        if timeout.is_zero() {
            return;
        }

        match self.wait_for_mover(timeout).await {
            Ok(true) => debug!(pool = %pool, mover_id = %mover_id, "mover killed"),
            Ok(false) => {
                error!(pool = %pool, mover_id = %mover_id, "failed to kill mover: timeout");
            }
            Err(TransferError::Interrupted { .. }) => {
                warn!(pool = %pool, mover_id = %mover_id, "failed to kill mover: interrupted");
                self.interrupt();
            }
            Err(e) => debug!(error = %e, "killed mover and pool reported"),
        }
    }

    /// Queries the pool for the state of the running mover.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::IllegalState`] if there is no mover, and
    /// [`TransferError::Timeout`] if the pool cannot be reached.
    pub async fn query_mover_info(&self) -> Result<MoverInfo, TransferError> {
        let (pool, mover_id) = {
            let inner = self.lock();
            match (inner.has_mover(), inner.pool.clone(), inner.mover_id) {
                (true, Some(pool), Some(mover_id)) => (pool, mover_id),
                _ => {
                    return Err(TransferError::illegal_state(
                        "query mover",
                        "transfer has no mover",
                    ));
                }
            }
        };

        let timeout = self.ctx.timeouts.pool;
        self.call_remote(
            &pool.name,
            "query mover",
            timeout,
            self.ctx.movers.query_mover(&pool, mover_id, timeout),
        )
        .await
        .map_err(|e| match e {
            TransferError::NoRoute { target } => TransferError::timeout(target, "query mover"),
            other => other,
        })
    }

    // ==================== Cleanup and Billing ====================

    /// Removes the name-space entry of a failed upload.
    ///
    /// Failures of the removal itself are logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::IllegalState`] for downloads.
    #[instrument(skip(self), fields(session_id = %self.session_id, path = %self.path))]
    pub async fn delete_name_space_entry(&self) -> Result<(), TransferError> {
        let pnfs_id = {
            let inner = self.lock();
            if !inner.is_write {
                return Err(TransferError::illegal_state(
                    "delete name space entry",
                    "can only delete name space entry for uploads",
                ));
            }
            inner.pnfs_id.clone()
        };
        let Some(pnfs_id) = pnfs_id else {
            return Ok(());
        };

        let _status = self.status_until("PnfsManager: Deleting name space entry");
        let timeout = self.ctx.timeouts.namespace;
        let deleted = self
            .call_remote(
                entry::NAMESPACE_SERVICE,
                "delete entry",
                timeout,
                self.ctx.namespace.delete_entry(&pnfs_id, &self.path, timeout),
            )
            .await;

        match deleted {
            Ok(()) => {
                self.lock().cleaned_up = true;
                info!(pnfs_id = %pnfs_id, "deleted file after failed upload");
            }
            Err(TransferError::FileNotFound { .. }) => {
                self.lock().cleaned_up = true;
                debug!(pnfs_id = %pnfs_id, "file already gone after failed upload");
            }
            Err(e) => {
                error!(pnfs_id = %pnfs_id, error = %e, "failed to delete file after failed upload");
            }
        }
        Ok(())
    }

    /// Sends the usage record of this transfer.
    ///
    /// Once a record was delivered, further calls do nothing. A record that
    /// could not be delivered is logged and a later call sends again.
    #[instrument(skip(self, message), fields(session_id = %self.session_id))]
    pub async fn notify_billing(&self, code: ErrorCode, message: &str) {
        let record = {
            let mut inner = self.lock();
            if inner.billing_notified {
                debug!("billing already notified");
                return;
            }
            // Claimed while sending so concurrent callers do not send twice.
            inner.billing_notified = true;
            self.billing_record(&inner, code, message)
        };

        if let Err(e) = self.ctx.billing.record(record).await {
            error!(error = %e, "failed to send billing record");
            self.lock().billing_notified = false;
        }
    }

    fn billing_record(&self, inner: &Inner, code: ErrorCode, message: &str) -> DoorRequestInfo {
        let hosts: Vec<String> = inner
            .client_addresses
            .iter()
            .map(|address| address.ip().to_string())
            .collect();

        DoorRequestInfo {
            cell: self
                .ctx
                .door()
                .map_or_else(|| UNKNOWN.to_string(), ToString::to_string),
            owner: self.subject.owner().map(str::to_owned),
            uid: self.subject.uid,
            gid: self.subject.primary_gid(),
            path: self.path.clone(),
            transaction: self.transaction(),
            transaction_duration_ms: u64::try_from(self.created.elapsed().as_millis())
                .unwrap_or(u64::MAX),
            client: hosts.first().cloned(),
            client_chain: hosts.join(","),
            pnfs_id: inner.pnfs_id.clone(),
            pool: inner.pool.as_ref().map(|pool| pool.name.clone()),
            file_size: inner.attributes.size,
            result_code: code,
            message: message.to_string(),
            storage_info: inner.attributes.storage_info.clone(),
        }
    }

    /// Snapshot for the "active transfers" view.
    #[must_use]
    pub fn io_door_entry(&self) -> IoDoorEntry {
        let inner = self.lock();
        IoDoorEntry {
            session_id: self.session_id,
            pnfs_id: inner.pnfs_id.clone(),
            path: self.path.clone(),
            owner: self.subject.owner().map(str::to_owned),
            pool: inner
                .pool
                .as_ref()
                .map_or_else(|| UNKNOWN.to_string(), |pool| pool.name.clone()),
            status: inner.status.clone(),
            state: inner.state,
            started_at_ms: self
                .started_at
                .duration_since(UNIX_EPOCH)
                .map_or(0, |elapsed| {
                    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
                }),
            client: inner
                .client_addresses
                .first()
                .map(|address| address.ip().to_string()),
        }
    }
}

struct StatusGuard<'a> {
    transfer: &'a Transfer,
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        self.transfer.clear_status();
    }
}

/// Resolves once the flag is set. The sender lives as long as the transfer.
async fn wait_until_set(flag: &mut watch::Receiver<bool>) {
    let set = flag.wait_for(|value| *value).await.is_ok();
    if !set {
        std::future::pending::<()>().await;
    }
}

async fn wait_until_finished(outcomes: &mut watch::Receiver<MoverOutcome>) {
    let finished = outcomes.wait_for(MoverOutcome::is_finished).await.is_ok();
    if !finished {
        std::future::pending::<()>().await;
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("session_id", &self.session_id)
            .field("path", &self.path)
            .field("inner", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl Drop for Transfer {
    fn drop(&mut self) {
        if let Some(registry) = self.ctx.registry() {
            registry.unregister(self.session_id);
        }
    }
}

impl PartialEq for Transfer {
    fn eq(&self, other: &Self) -> bool {
        self.session_id == other.session_id
    }
}

impl Eq for Transfer {}

impl PartialOrd for Transfer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Most recent transfer first.
impl Ord for Transfer {
    fn cmp(&self, other: &Self) -> Ordering {
        other.session_id.cmp(&self.session_id)
    }
}
