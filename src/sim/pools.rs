//! Simulated pool manager and pools.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ErrorCode, TransferError};
use crate::namespace::FileAttributes;
use crate::pool::{
    MoverController, MoverFinished, MoverId, MoverInfo, MoverRequest, PoolSelectRequest,
    PoolSelector, SelectedPool,
};
use crate::registry::TransferRegistry;
use crate::session::SessionId;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A pool-selection request and when it arrived.
#[derive(Debug, Clone)]
pub struct RecordedSelection {
    pub at: Instant,
    pub request: PoolSelectRequest,
}

/// Pool manager answering from a fixed pool list.
///
/// Queued failures are returned first, one per request. Otherwise the first
/// pool not on the request's exclusion list is selected, or the first pool
/// if all are excluded.
#[derive(Debug)]
pub struct ScriptedPoolSelector {
    name: String,
    pools: Vec<SelectedPool>,
    failures: Mutex<VecDeque<TransferError>>,
    requests: Mutex<Vec<RecordedSelection>>,
    latency: Duration,
}

impl ScriptedPoolSelector {
    pub fn new(name: impl Into<String>, pools: Vec<SelectedPool>) -> Self {
        Self {
            name: name.into(),
            pools,
            failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Delays every reply by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fails the next request that is not already scripted to fail.
    pub fn fail_next(&self, error: TransferError) {
        locked(&self.failures).push_back(error);
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedSelection> {
        locked(&self.requests).clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        locked(&self.requests).len()
    }
}

#[async_trait]
impl PoolSelector for ScriptedPoolSelector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn select_pool(
        &self,
        request: PoolSelectRequest,
        _timeout: Duration,
    ) -> Result<(SelectedPool, FileAttributes), TransferError> {
        locked(&self.requests).push(RecordedSelection {
            at: Instant::now(),
            request: request.clone(),
        });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(error) = locked(&self.failures).pop_front() {
            debug!(error = %error, "scripted pool selection failure");
            return Err(error);
        }

        let pool = self
            .pools
            .iter()
            .find(|pool| !request.excluded_hosts.contains(&pool.address))
            .or_else(|| self.pools.first())
            .cloned()
            .ok_or_else(|| TransferError::no_pool_configured(&self.name, "no pools configured"))?;
        Ok((pool, request.attributes))
    }
}

/// How a started mover ends on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoverScript {
    /// Time until the mover reports; `None` keeps it running until killed.
    pub transfer_time: Option<Duration>,
    pub return_code: ErrorCode,
    pub message: String,
    /// Size reported for uploads.
    pub bytes: u64,
}

impl Default for MoverScript {
    fn default() -> Self {
        Self {
            transfer_time: Some(Duration::from_millis(100)),
            return_code: ErrorCode::OK,
            message: String::new(),
            bytes: 0,
        }
    }
}

/// A kill request received by [`LoopbackMovers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedKill {
    pub pool: String,
    pub mover_id: MoverId,
    pub explanation: String,
}

#[derive(Debug, Clone)]
struct RunningMover {
    session_id: SessionId,
    pool: String,
    is_write: bool,
    attributes: FileAttributes,
    started_at: SystemTime,
}

/// Pools whose movers report back through a [`TransferRegistry`].
///
/// Mover ids are handed out sequentially. Each mover follows the current
/// [`MoverScript`]; killed movers confirm the kill when configured to.
#[derive(Debug)]
pub struct LoopbackMovers {
    registry: Arc<TransferRegistry>,
    next_id: AtomicI32,
    script: Mutex<MoverScript>,
    confirm_kills: bool,
    start_failures: Mutex<VecDeque<TransferError>>,
    query_failures: Mutex<VecDeque<TransferError>>,
    started: Mutex<Vec<MoverRequest>>,
    kills: Mutex<Vec<RecordedKill>>,
    running: Arc<DashMap<MoverId, RunningMover>>,
    start_latency: Duration,
}

impl LoopbackMovers {
    pub fn new(registry: Arc<TransferRegistry>) -> Self {
        Self {
            registry,
            next_id: AtomicI32::new(1),
            script: Mutex::new(MoverScript::default()),
            confirm_kills: true,
            start_failures: Mutex::new(VecDeque::new()),
            query_failures: Mutex::new(VecDeque::new()),
            started: Mutex::new(Vec::new()),
            kills: Mutex::new(Vec::new()),
            running: Arc::new(DashMap::new()),
            start_latency: Duration::ZERO,
        }
    }

    /// Delays every mover start reply by `latency`.
    #[must_use]
    pub fn with_start_latency(mut self, latency: Duration) -> Self {
        self.start_latency = latency;
        self
    }

    /// Numbers movers from `first`.
    #[must_use]
    pub fn starting_at(self, first: i32) -> Self {
        self.next_id.store(first, Ordering::SeqCst);
        self
    }

    /// Whether killed movers send a finish notification.
    #[must_use]
    pub fn with_kill_confirmation(mut self, confirm: bool) -> Self {
        self.confirm_kills = confirm;
        self
    }

    #[must_use]
    pub fn with_script(self, script: MoverScript) -> Self {
        self.set_script(script);
        self
    }

    /// Changes the script for movers started from now on.
    pub fn set_script(&self, script: MoverScript) {
        *locked(&self.script) = script;
    }

    /// Fails the next mover start.
    pub fn fail_next_start(&self, error: TransferError) {
        locked(&self.start_failures).push_back(error);
    }

    /// Fails the next mover query.
    pub fn fail_next_query(&self, error: TransferError) {
        locked(&self.query_failures).push_back(error);
    }

    #[must_use]
    pub fn started(&self) -> Vec<MoverRequest> {
        locked(&self.started).clone()
    }

    #[must_use]
    pub fn kills(&self) -> Vec<RecordedKill> {
        locked(&self.kills).clone()
    }

    /// Number of movers started and not yet finished or killed.
    #[must_use]
    pub fn running(&self) -> usize {
        self.running.len()
    }

    fn notify(
        registry: &TransferRegistry,
        mover_id: MoverId,
        mover: &RunningMover,
        return_code: ErrorCode,
        message: String,
    ) {
        let Some(transfer) = registry.get(mover.session_id) else {
            debug!(session_id = %mover.session_id, "mover finished for unknown transfer");
            return;
        };
        transfer.finished_with_message(MoverFinished {
            session_id: mover.session_id,
            pool: mover.pool.clone(),
            mover_id,
            return_code,
            message,
            attributes: Some(mover.attributes.clone()),
            protocol_info: None,
        });
    }
}

#[async_trait]
impl MoverController for LoopbackMovers {
    async fn start_mover(
        &self,
        request: MoverRequest,
        _timeout: Duration,
    ) -> Result<MoverId, TransferError> {
        locked(&self.started).push(request.clone());
        if !self.start_latency.is_zero() {
            tokio::time::sleep(self.start_latency).await;
        }
        if let Some(error) = locked(&self.start_failures).pop_front() {
            debug!(pool = %request.pool, error = %error, "scripted mover start failure");
            return Err(error);
        }

        let mover_id = MoverId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let script = locked(&self.script).clone();
        let is_write = request.kind == crate::pool::MoverKind::Accept;
        let mut attributes = request.attributes;
        if is_write {
            attributes.size = Some(script.bytes);
            if let Some(storage_info) = attributes.storage_info.as_mut() {
                storage_info.file_size = script.bytes;
                storage_info.is_new = false;
            }
        }
        let mover = RunningMover {
            session_id: request.session_id,
            pool: request.pool.name.clone(),
            is_write,
            attributes,
            started_at: SystemTime::now(),
        };
        self.running.insert(mover_id, mover);

        if let Some(transfer_time) = script.transfer_time {
            let registry = Arc::clone(&self.registry);
            let running = Arc::clone(&self.running);
            tokio::spawn(async move {
                tokio::time::sleep(transfer_time).await;
                if let Some((mover_id, mover)) = running.remove(&mover_id) {
                    Self::notify(&registry, mover_id, &mover, script.return_code, script.message);
                }
            });
        }
        Ok(mover_id)
    }

    async fn kill_mover(
        &self,
        pool: &SelectedPool,
        mover_id: MoverId,
        explanation: &str,
    ) -> Result<(), TransferError> {
        locked(&self.kills).push(RecordedKill {
            pool: pool.name.clone(),
            mover_id,
            explanation: explanation.to_string(),
        });
        if !self.confirm_kills {
            return Ok(());
        }
        if let Some((mover_id, mover)) = self.running.remove(&mover_id) {
            let registry = Arc::clone(&self.registry);
            let explanation = explanation.to_string();
            tokio::spawn(async move {
                Self::notify(&registry, mover_id, &mover, ErrorCode::INTERRUPTED, explanation);
            });
        }
        Ok(())
    }

    async fn query_mover(
        &self,
        pool: &SelectedPool,
        mover_id: MoverId,
        _timeout: Duration,
    ) -> Result<MoverInfo, TransferError> {
        if let Some(error) = locked(&self.query_failures).pop_front() {
            return Err(error);
        }
        let mover = self
            .running
            .get(&mover_id)
            .filter(|mover| mover.pool == pool.name)
            .map(|mover| mover.value().clone())
            .ok_or_else(|| TransferError::Remote {
                code: ErrorCode::ILLEGAL_STATE,
                message: format!("no mover {mover_id} on {pool}"),
            })?;
        Ok(MoverInfo {
            mover_id,
            pool: mover.pool,
            state: if mover.is_write { "RECEIVING" } else { "SENDING" }.to_string(),
            bytes_transferred: 0,
            started_at: mover.started_at,
            last_transferred_at: None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::namespace::PnfsId;
    use crate::pool::ProtocolInfo;
    use crate::subject::Subject;

    fn request(excluded: &[&str]) -> PoolSelectRequest {
        PoolSelectRequest {
            session_id: SessionId::new(1),
            pnfs_id: PnfsId::from_sequence(1),
            attributes: FileAttributes::default(),
            protocol_info: ProtocolInfo::new("Http", 1, 1),
            is_write: false,
            expected_size: None,
            path: "/f".into(),
            subject: Subject::new(1, 1),
            io_queue: None,
            excluded_hosts: excluded.iter().map(ToString::to_string).collect(),
            allow_stage: true,
        }
    }

    fn selector() -> ScriptedPoolSelector {
        ScriptedPoolSelector::new(
            "PoolManager",
            vec![SelectedPool::named("pool-a"), SelectedPool::named("pool-b")],
        )
    }

    #[tokio::test]
    async fn test_selects_first_pool_not_excluded() {
        let selector = selector();
        let (pool, _) = selector
            .select_pool(request(&["pool-a"]), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(pool.name, "pool-b");
    }

    #[tokio::test]
    async fn test_falls_back_to_first_pool_when_all_excluded() {
        let selector = selector();
        let (pool, _) = selector
            .select_pool(request(&["pool-a", "pool-b"]), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(pool.name, "pool-a");
    }

    #[tokio::test]
    async fn test_scripted_failures_come_first() {
        let selector = selector();
        selector.fail_next(TransferError::no_pool_available("PoolManager", "all offline"));

        let first = selector.select_pool(request(&[]), Duration::from_secs(1)).await;
        assert_eq!(first.unwrap_err().code(), ErrorCode::NO_POOL_ONLINE);
        assert!(selector.select_pool(request(&[]), Duration::from_secs(1)).await.is_ok());
        assert_eq!(selector.request_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_pool_list_is_not_configured() {
        let selector = ScriptedPoolSelector::new("PoolManager", Vec::new());
        let error = selector
            .select_pool(request(&[]), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::NO_POOL_CONFIGURED);
    }
}
