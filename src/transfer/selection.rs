//! Pool selection and mover start.

use std::time::Duration;

use tracing::{error, info, instrument, warn};

use super::{Transfer, TransferState};
use crate::error::{ErrorCode, FailureType, TransferError, classify_error};
use crate::pool::{MoverId, MoverKind, MoverRequest, MoverRoute, PoolSelectRequest};
use crate::retry::{RetryPolicy, run_with_retry_classified};

impl Transfer {
    /// Asks the pool manager for a pool and remembers it.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::IllegalState`] without contacting the pool
    /// manager if the file identity or storage info is unknown. Otherwise
    /// propagates the pool manager's failure.
    #[instrument(skip(self), fields(session_id = %self.session_id, path = %self.path))]
    pub async fn select_pool(&self, timeout: Duration) -> Result<(), TransferError> {
        {
            let inner = self.lock();
            if inner.pnfs_id.is_none() || inner.attributes.storage_info.is_none() {
                return Err(TransferError::illegal_state(
                    "select pool",
                    "need pnfs id and storage info before a pool can be selected",
                ));
            }
        }

        let protocol_info = self.protocol.pool_manager_protocol_info(self);
        let (request, previous) = {
            let mut inner = self.lock();
            let Some(pnfs_id) = inner.pnfs_id.clone() else {
                return Err(TransferError::illegal_state("select pool", "pnfs id vanished"));
            };
            let expected_size = if inner.is_write {
                inner.allocation.filter(|bytes| *bytes > 0).or(inner.attributes.size)
            } else {
                inner.attributes.size
            };
            let request = PoolSelectRequest {
                session_id: self.session_id,
                pnfs_id,
                attributes: inner.attributes.clone(),
                protocol_info,
                is_write: inner.is_write,
                expected_size,
                path: self.path.clone(),
                subject: self.subject.clone(),
                io_queue: inner.io_queue.clone(),
                excluded_hosts: inner.tried_hosts.iter().cloned().collect(),
                allow_stage: inner.allow_staging,
            };
            let previous = inner.state;
            inner.state = TransferState::SelectingPool;
            (request, previous)
        };

        let pool_manager = self.ctx.pool_manager().to_string();
        let _status = self.status_until(format!("{pool_manager}: Selecting pool"));
        let selected = self
            .call_remote(
                &pool_manager,
                "select pool",
                timeout,
                self.ctx.pool_selector.select_pool(request, timeout),
            )
            .await;

        let mut inner = self.lock();
        match selected {
            Ok((pool, attributes)) => {
                info!(pool = %pool, "selected pool");
                inner.pool = Some(pool);
                if attributes.pnfs_id.is_some() {
                    inner.attributes = attributes;
                }
                inner.state = TransferState::PoolSelected;
                Ok(())
            }
            Err(e) => {
                inner.state = previous;
                Err(e)
            }
        }
    }

    /// Asks the selected pool to start a mover.
    ///
    /// The request is routed through the pool manager. If it cannot be
    /// routed, the pool selection is dropped so the next attempt starts over.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::IllegalState`] without contacting the pool if
    /// the file identity, storage info or pool is unknown. Otherwise
    /// propagates the pool's failure.
    #[instrument(skip(self), fields(session_id = %self.session_id, path = %self.path))]
    pub async fn start_mover(&self, timeout: Duration) -> Result<MoverId, TransferError> {
        {
            let inner = self.lock();
            if inner.pnfs_id.is_none()
                || inner.attributes.storage_info.is_none()
                || inner.pool.is_none()
            {
                return Err(TransferError::illegal_state(
                    "start mover",
                    "need pnfs id, file attributes and pool before a mover can be started",
                ));
            }
        }

        let protocol_info = self.protocol.pool_protocol_info(self);
        let transaction = self.transaction();
        let request = {
            let mut inner = self.lock();
            let (Some(pnfs_id), Some(pool)) = (inner.pnfs_id.clone(), inner.pool.clone()) else {
                return Err(TransferError::illegal_state("start mover", "pool vanished"));
            };
            inner.protocol_info = Some(protocol_info.clone());
            inner.state = TransferState::MoverStarting;
            MoverRequest {
                kind: if inner.is_write {
                    MoverKind::Accept
                } else {
                    MoverKind::Deliver
                },
                route: MoverRoute::via(self.ctx.pool_manager(), &pool),
                pool,
                pnfs_id,
                protocol_info,
                attributes: inner.attributes.clone(),
                io_queue: inner.io_queue.clone(),
                initiator: transaction,
                session_id: self.session_id,
            }
        };

        let pool = request.pool.clone();
        let _status = self.status_until(format!("Pool {pool}: Creating mover"));
        let started = self
            .call_remote(
                &pool.name,
                "start mover",
                timeout,
                self.ctx.movers.start_mover(request, timeout),
            )
            .await;

        let mut inner = self.lock();
        match started {
            Ok(mover_id) => {
                info!(pool = %pool, mover_id = %mover_id, "started mover");
                inner.mover_id = Some(mover_id);
                inner.mover_created = true;
                // The pool may have reported the mover finished before its id arrived.
                if !inner.mover_finished {
                    inner.state = TransferState::MoverRunning;
                }
                Ok(mover_id)
            }
            Err(e) => {
                if matches!(e, TransferError::NoRoute { .. }) {
                    inner.pool = None;
                    inner.state = TransferState::NameSpaceResolved;
                } else {
                    inner.state = TransferState::PoolSelected;
                }
                if !matches!(
                    e,
                    TransferError::IllegalState { .. } | TransferError::Interrupted { .. }
                ) {
                    inner.tried_hosts.insert(pool.address.clone());
                }
                Err(e)
            }
        }
    }

    /// Selects a pool and starts a mover, retrying failures as `policy` allows.
    ///
    /// Downloads re-read their name-space entry before every retry, and each
    /// of their mover starts is capped by the policy's mover start timeout.
    /// Uploads are not retried once a pool was assigned and a step timed
    /// out, so their mover start may use the pool timeout.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    #[instrument(skip(self, policy), fields(session_id = %self.session_id, path = %self.path))]
    pub async fn select_pool_and_start_mover(
        &self,
        policy: &RetryPolicy,
    ) -> Result<MoverId, TransferError> {
        let timeouts = self.ctx.timeouts;
        let result = run_with_retry_classified(
            policy,
            |error| self.classify_selection_failure(error),
            |error, _delay| self.set_status(format!("Sleeping ({error})")),
            |attempt, remaining| async move {
                self.lock().selection_attempts = attempt;
                if attempt > 1 && !self.is_write() {
                    self.read_name_space_entry_within(false, timeouts.namespace.min(remaining))
                        .await?;
                }
                self.select_pool(timeouts.pool_manager.min(remaining)).await?;
                let mover_timeout =
                    mover_start_timeout(self.is_write(), timeouts.pool, policy, remaining);
                self.start_mover(mover_timeout).await
            },
        )
        .await;
        self.clear_status();

        match result {
            Ok((mover_id, _)) => Ok(mover_id),
            Err((e, stats)) => {
                warn!(attempts = stats.attempts, error = %e, "failed to select pool and start mover");
                Err(e)
            }
        }
    }

    fn classify_selection_failure(&self, error: &TransferError) -> FailureType {
        match error.code() {
            ErrorCode::TIMEOUT if self.is_write() && self.pool().is_some() => FailureType::Permanent,
            ErrorCode::TIMEOUT => FailureType::Transient,
            ErrorCode::OUT_OF_DATE
            | ErrorCode::POOL_DISABLED
            | ErrorCode::FILE_NOT_IN_REPOSITORY => {
                info!(error = %error, "retrying pool selection");
                FailureType::Stale
            }
            ErrorCode::NO_POOL_ONLINE | ErrorCode::POOL_UNAVAILABLE => {
                warn!(error = %error, "pool selection failed");
                FailureType::Transient
            }
            ErrorCode::NO_POOL_CONFIGURED => {
                error!(error = %error, "no pool configured");
                FailureType::Permanent
            }
            ErrorCode::PERMISSION_DENIED => {
                info!(error = %error, "request rejected due to permission settings");
                FailureType::Permanent
            }
            _ => {
                let failure = classify_error(error);
                if failure == FailureType::Transient {
                    error!(error = %error, "unexpected pool selection failure");
                }
                failure
            }
        }
    }
}

/// Budget for one mover start.
///
/// A timed out upload start is final, so uploads are not cut short by the
/// policy's per-attempt cap.
fn mover_start_timeout(
    is_write: bool,
    pool_timeout: Duration,
    policy: &RetryPolicy,
    remaining: Duration,
) -> Duration {
    let timeout = pool_timeout.min(remaining);
    if is_write {
        timeout
    } else {
        timeout.min(policy.mover_start_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_start_is_capped_by_policy() {
        let policy = RetryPolicy::never_fail();
        let timeout =
            mover_start_timeout(false, Duration::from_secs(90), &policy, Duration::MAX);
        assert_eq!(timeout, policy.mover_start_timeout());
    }

    #[test]
    fn test_upload_start_uses_pool_timeout() {
        let policy = RetryPolicy::never_fail();
        let timeout = mover_start_timeout(true, Duration::from_secs(90), &policy, Duration::MAX);
        assert_eq!(timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_start_never_exceeds_remaining_budget() {
        let policy = RetryPolicy::try_once(Duration::from_secs(1));
        let remaining = Duration::from_millis(200);
        assert_eq!(
            mover_start_timeout(true, Duration::from_secs(90), &policy, remaining),
            remaining
        );
        assert_eq!(
            mover_start_timeout(false, Duration::from_secs(90), &policy, remaining),
            remaining
        );
    }
}
