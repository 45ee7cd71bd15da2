//! Properties that hold for every transfer and every retry policy.

use std::sync::Arc;
use std::time::Duration;

use transfer_door::retry::{UNBOUNDED_RETRIES, UNBOUNDED_TIMEOUT};
use transfer_door::sim::SimCluster;
use transfer_door::{
    ErrorCode, FailureType, GenericProtocol, RetryDecision, RetryPolicy, SessionCounter, Subject,
    Transfer, TransferError, TransferState,
};

fn new_transfer(cluster: &SimCluster, path: &str) -> Arc<Transfer> {
    Transfer::new(
        cluster.context(),
        Subject::new(500, 100),
        path,
        Arc::new(GenericProtocol::new("Http", 1, 1)),
    )
}

// ==================== Retry Policy Presets ====================

#[test]
fn test_presets() {
    let never_fail = RetryPolicy::never_fail();
    assert_eq!(never_fail.retry_count(), UNBOUNDED_RETRIES);
    assert_eq!(never_fail.total_timeout(), UNBOUNDED_TIMEOUT);

    let once = RetryPolicy::try_once(Duration::from_secs(30));
    assert_eq!(once.retry_count(), 1);

    for seconds in [1, 60, 3600] {
        let until = RetryPolicy::try_until_timeout(Duration::from_secs(seconds));
        assert_eq!(until.retry_count(), UNBOUNDED_RETRIES);
        assert_eq!(until.total_timeout(), Duration::from_secs(seconds));
    }
}

#[test]
fn test_no_policy_retries_permanent_or_illegal_failures() {
    let policies = [
        RetryPolicy::never_fail(),
        RetryPolicy::try_once(Duration::from_secs(60)),
        RetryPolicy::try_until_timeout(Duration::from_secs(60)),
    ];
    for policy in &policies {
        for failure in [
            FailureType::Permanent,
            FailureType::IllegalState,
            FailureType::Interrupted,
        ] {
            let decision = policy.should_retry(failure, 1, Duration::ZERO, Duration::ZERO);
            assert!(
                matches!(decision, RetryDecision::DoNotRetry { .. }),
                "{policy:?} retried {failure:?}"
            );
        }
    }
}

#[test]
fn test_try_once_never_retries() {
    let policy = RetryPolicy::try_once(Duration::from_secs(60));
    for failure in [FailureType::Transient, FailureType::Stale] {
        let decision = policy.should_retry(failure, 1, Duration::ZERO, Duration::ZERO);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }
}

// ==================== Session Ordering ====================

#[test]
fn test_session_ids_strictly_increase() {
    let counter = SessionCounter::starting_at(1000);
    let ids: Vec<_> = (0..100).map(|_| counter.next_id()).collect();
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_transfers_order_by_descending_session_id() {
    let cluster = SimCluster::default();
    let mut transfers: Vec<_> = (0..10)
        .map(|i| new_transfer(&cluster, &format!("/file-{i}")))
        .collect();
    let mut expected: Vec<_> = transfers.iter().map(|t| t.session_id()).collect();
    expected.sort_unstable_by(|a, b| b.cmp(a));

    transfers.sort();

    let sorted: Vec<_> = transfers.iter().map(|t| t.session_id()).collect();
    assert_eq!(sorted, expected);
    assert!(sorted.windows(2).all(|pair| pair[0] > pair[1]));
}

#[test]
fn test_registry_snapshot_is_most_recent_first() {
    let cluster = SimCluster::default();
    let _transfers: Vec<_> = (0..5)
        .map(|i| new_transfer(&cluster, &format!("/file-{i}")))
        .collect();

    let snapshot = cluster.registry.snapshot();

    assert_eq!(snapshot.len(), 5);
    assert!(snapshot.windows(2).all(|pair| pair[0].session_id > pair[1].session_id));
}

#[test]
fn test_registry_does_not_grow_with_finished_transfers() {
    let cluster = SimCluster::default();
    let kept = new_transfer(&cluster, "/kept");

    for i in 0..1000 {
        let transfer = new_transfer(&cluster, &format!("/file-{i}"));
        transfer.finished(Ok(()));
    }

    assert_eq!(cluster.registry.len(), 1);
    assert!(cluster.registry.get(kept.session_id()).is_some());
}

// ==================== Terminal Outcome ====================

#[test]
fn test_success_then_error_keeps_success() {
    let cluster = SimCluster::default();
    let transfer = new_transfer(&cluster, "/f");

    transfer.finished(Ok(()));
    transfer.finished_with_code(ErrorCode::DEFAULT_ERROR, "late failure");

    assert_eq!(transfer.state(), TransferState::FinishedOk);
    assert_eq!(transfer.error(), None);
}

#[test]
fn test_error_then_success_keeps_error() {
    let cluster = SimCluster::default();
    let transfer = new_transfer(&cluster, "/f");

    transfer.finished(Err(TransferError::interrupted("kill mover")));
    transfer.finished(Ok(()));

    assert_eq!(transfer.state(), TransferState::FinishedError);
    assert_eq!(transfer.error().map(|e| e.code()), Some(ErrorCode::INTERRUPTED));
}

#[test]
fn test_two_threads_observe_one_outcome() {
    for _ in 0..50 {
        let cluster = SimCluster::default();
        let transfer = new_transfer(&cluster, "/f");

        let success = {
            let transfer = Arc::clone(&transfer);
            std::thread::spawn(move || transfer.finished(Ok(())))
        };
        let failure = {
            let transfer = Arc::clone(&transfer);
            std::thread::spawn(move || {
                transfer.finished_with_code(ErrorCode::DEFAULT_ERROR, "failed")
            })
        };
        let success_won = success.join().unwrap_or(false);
        let failure_won = failure.join().unwrap_or(false);

        assert!(success_won ^ failure_won, "exactly one finish must win");
        let observed = (transfer.state(), transfer.error().is_some());
        if success_won {
            assert_eq!(observed, (TransferState::FinishedOk, false));
        } else {
            assert_eq!(observed, (TransferState::FinishedError, true));
        }
    }
}

#[test]
fn test_wait_after_recorded_error_does_not_block() {
    let cluster = SimCluster::default();
    let transfer = new_transfer(&cluster, "/f");
    transfer.finished_with_code(ErrorCode::DEFAULT_ERROR, "failed");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap_or_else(|e| panic!("runtime: {e}"));
    let started = std::time::Instant::now();
    let result = runtime.block_on(transfer.wait_for_mover(Duration::from_secs(60)));

    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_kill_without_mover_returns_at_once() {
    let cluster = SimCluster::default();
    let transfer = new_transfer(&cluster, "/f");

    tokio_test::block_on(transfer.kill_mover(Duration::from_secs(60), "nothing to kill"));

    assert!(cluster.movers.kills().is_empty());
}
