//! End-to-end transfer scenarios against the simulated cluster.
//!
//! All tests run with paused time, so the mover and retry delays below are
//! exact.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use transfer_door::sim::{LoopbackMovers, MoverScript, POOL_MANAGER, SimCluster};
use transfer_door::{
    Door, DoorSettings, ErrorCode, FailureType, FileAttributes, GenericProtocol, MoverId,
    RetryPolicy, Subject, Transfer, TransferError, TransferState, classify_error,
};

const WAIT: Duration = Duration::from_secs(5);

/// Cluster with `/data` owned by 500:100 and movers numbered from 42.
fn cluster_with_script(script: MoverScript) -> SimCluster {
    let cluster = SimCluster::with_pools(["pool-1"]);
    let movers = LoopbackMovers::new(Arc::clone(&cluster.registry))
        .starting_at(42)
        .with_script(script);
    let cluster = cluster.with_movers(movers);
    cluster.namespace.add_directory("/data", 500, 100, 0o755);
    cluster
}

fn finishing_after(transfer_time: Duration) -> MoverScript {
    MoverScript {
        transfer_time: Some(transfer_time),
        ..MoverScript::default()
    }
}

fn upload(cluster: &SimCluster, path: &str) -> Arc<Transfer> {
    Transfer::new(
        cluster.context(),
        Subject::new(500, 100),
        path,
        Arc::new(GenericProtocol::new("Http", 1, 1)),
    )
}

fn parent() -> FileAttributes {
    FileAttributes::directory(500, 100, 0o755)
}

// ==================== Scenario A: Successful Upload ====================

#[tokio::test(start_paused = true)]
async fn test_upload_completes_and_bills_once() -> Result<(), Box<dyn std::error::Error>> {
    let cluster = cluster_with_script(finishing_after(Duration::from_secs(2)));
    let transfer = upload(&cluster, "/data/x");

    transfer.create_name_space_entry(&parent()).await?;
    let pnfs_id = transfer.pnfs_id().ok_or("no pnfs id after create")?;

    transfer.select_pool(WAIT).await?;
    assert_eq!(transfer.pool().map(|pool| pool.name).as_deref(), Some("pool-1"));

    let mover_id = transfer.start_mover(WAIT).await?;
    assert_eq!(mover_id, MoverId::new(42));
    assert!(transfer.has_mover());
    assert_eq!(transfer.state(), TransferState::MoverRunning);

    let started = Instant::now();
    assert!(transfer.wait_for_mover(WAIT).await?);
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert!(!transfer.has_mover());

    transfer.notify_billing(ErrorCode::OK, "").await;

    let records = cluster.billing.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].pnfs_id.as_ref(), Some(&pnfs_id));
    assert_eq!(records[0].pool.as_deref(), Some("pool-1"));
    assert!(records[0].is_success());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_upload_mode_follows_umask_and_parent() -> Result<(), Box<dyn std::error::Error>> {
    let cluster = cluster_with_script(MoverScript::default());
    let transfer = upload(&cluster, "/data/x");

    transfer.create_name_space_entry(&parent()).await?;

    let attributes = cluster.namespace.attributes("/data/x").ok_or("entry missing")?;
    assert_eq!(attributes.mode, Some(0o644));
    assert_eq!(attributes.owner, Some(500));
    assert_eq!(attributes.group, Some(100));
    Ok(())
}

// ==================== Scenario B: Try Once ====================

#[tokio::test(start_paused = true)]
async fn test_try_once_surfaces_first_failure() -> Result<(), Box<dyn std::error::Error>> {
    let cluster = cluster_with_script(MoverScript::default());
    cluster
        .selector
        .fail_next(TransferError::no_pool_available(POOL_MANAGER, "all pools offline"));
    let transfer = upload(&cluster, "/data/x");
    transfer.create_name_space_entry(&parent()).await?;

    let started = Instant::now();
    let error = transfer
        .select_pool_and_start_mover(&RetryPolicy::try_once(Duration::from_secs(60)))
        .await
        .err()
        .ok_or("expected pool selection to fail")?;

    assert_eq!(error.code(), ErrorCode::NO_POOL_ONLINE);
    assert_eq!(cluster.selector.request_count(), 1);
    assert_eq!(transfer.selection_attempts(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(cluster.movers.started().is_empty());
    Ok(())
}

// ==================== Scenario C: Never Fail ====================

#[tokio::test(start_paused = true)]
async fn test_never_fail_retries_with_fixed_delay() -> Result<(), Box<dyn std::error::Error>> {
    let cluster = cluster_with_script(MoverScript::default());
    for _ in 0..2 {
        cluster
            .selector
            .fail_next(TransferError::no_pool_available(POOL_MANAGER, "all pools offline"));
    }
    let transfer = upload(&cluster, "/data/x");
    transfer.create_name_space_entry(&parent()).await?;

    let mover_id = transfer
        .select_pool_and_start_mover(&RetryPolicy::never_fail())
        .await?;

    assert_eq!(mover_id, MoverId::new(42));
    assert_eq!(transfer.selection_attempts(), 3);
    let requests = cluster.selector.requests();
    assert_eq!(requests.len(), 3);
    for pair in requests.windows(2) {
        assert_eq!(pair[1].at - pair[0].at, Duration::from_millis(500));
    }
    assert_eq!(transfer.status(), None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_try_until_timeout_gives_up() -> Result<(), Box<dyn std::error::Error>> {
    let cluster = cluster_with_script(MoverScript::default());
    for _ in 0..100 {
        cluster
            .selector
            .fail_next(TransferError::no_pool_available(POOL_MANAGER, "all pools offline"));
    }
    let transfer = upload(&cluster, "/data/x");
    transfer.create_name_space_entry(&parent()).await?;

    let started = Instant::now();
    let result = transfer
        .select_pool_and_start_mover(&RetryPolicy::try_until_timeout(Duration::from_secs(2)))
        .await;

    assert!(result.is_err());
    assert!(started.elapsed() <= Duration::from_secs(2));
    assert_eq!(cluster.selector.request_count(), 4);
    Ok(())
}

// ==================== Scenario D: Directory Download ====================

#[tokio::test(start_paused = true)]
async fn test_directory_download_is_rejected_without_retry() {
    let cluster = cluster_with_script(MoverScript::default());
    let door = Door::new(
        cluster.context(),
        Arc::new(GenericProtocol::new("Http", 1, 1)),
        DoorSettings {
            retry_policy: RetryPolicy::never_fail(),
            ..DoorSettings::default()
        },
    );

    let report = door.download(Subject::new(500, 100), "/data", None).await;

    assert_eq!(report.code, ErrorCode::NOT_FILE);
    assert_eq!(report.attempts, 0);
    assert_eq!(cluster.selector.request_count(), 0);
    assert_eq!(cluster.billing.records().len(), 1);
    assert_eq!(
        classify_error(&TransferError::not_regular_file("/data")),
        FailureType::Permanent
    );
}

// ==================== Scenario E: Unconfirmed Kill ====================

#[tokio::test(start_paused = true)]
async fn test_late_finish_after_unconfirmed_kill() -> Result<(), Box<dyn std::error::Error>> {
    let cluster = SimCluster::with_pools(["pool-1"]);
    let movers = LoopbackMovers::new(Arc::clone(&cluster.registry))
        .starting_at(42)
        .with_kill_confirmation(false)
        .with_script(MoverScript {
            transfer_time: None,
            ..MoverScript::default()
        });
    let cluster = cluster.with_movers(movers);
    cluster.namespace.add_directory("/data", 500, 100, 0o755);

    let transfer = upload(&cluster, "/data/x");
    transfer.create_name_space_entry(&parent()).await?;
    transfer
        .select_pool_and_start_mover(&RetryPolicy::try_once(WAIT))
        .await?;

    let started = Instant::now();
    transfer.kill_mover(Duration::from_secs(1), "client gone").await;
    assert_eq!(started.elapsed(), Duration::from_secs(1));
    assert!(transfer.has_mover(), "mover should survive an unconfirmed kill");
    assert_eq!(cluster.movers.kills().len(), 1);

    assert!(transfer.finished(Ok(())));
    assert!(!transfer.has_mover());
    assert_eq!(transfer.state(), TransferState::FinishedOk);
    assert!(transfer.wait_for_mover(WAIT).await?);
    Ok(())
}

// ==================== Failure Cleanup ====================

#[tokio::test(start_paused = true)]
async fn test_failed_upload_is_cleaned_up_and_billed_once() {
    let cluster = cluster_with_script(MoverScript {
        transfer_time: Some(Duration::from_millis(100)),
        return_code: ErrorCode::DEFAULT_ERROR,
        message: "disk full".into(),
        bytes: 0,
    });
    let door = Door::new(
        cluster.context(),
        Arc::new(GenericProtocol::new("Http", 1, 1)),
        DoorSettings::default(),
    );

    let report = door.upload(Subject::new(500, 100), "/data/x", None).await;

    assert_eq!(report.code, ErrorCode::DEFAULT_ERROR);
    assert!(report.message.contains("disk full"), "Expected mover message in: {}", report.message);
    assert!(!cluster.namespace.contains("/data/x"));
    let records = cluster.billing.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].result_code, ErrorCode::DEFAULT_ERROR);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_mover_times_out_and_is_killed() {
    let cluster = cluster_with_script(MoverScript {
        transfer_time: None,
        ..MoverScript::default()
    });
    let door = Door::new(
        cluster.context(),
        Arc::new(GenericProtocol::new("Http", 1, 1)),
        DoorSettings {
            mover_timeout: Duration::from_secs(2),
            ..DoorSettings::default()
        },
    );

    let report = door.upload(Subject::new(500, 100), "/data/x", None).await;

    assert_eq!(report.code, ErrorCode::TIMEOUT);
    assert_eq!(cluster.movers.kills().len(), 1);
    assert_eq!(cluster.movers.running(), 0);
    assert!(!cluster.namespace.contains("/data/x"));
    assert_eq!(cluster.billing.records()[0].result_code, ErrorCode::TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_pool_manager_times_out() {
    let cluster = SimCluster::with_pools(["pool-1"]).with_selector(
        transfer_door::sim::ScriptedPoolSelector::new(
            POOL_MANAGER,
            vec![transfer_door::SelectedPool::named("pool-1")],
        )
        .with_latency(Duration::from_secs(600)),
    );
    cluster.namespace.add_directory("/data", 500, 100, 0o755);
    let transfer = upload(&cluster, "/data/x");
    transfer
        .create_name_space_entry(&parent())
        .await
        .unwrap_or_else(|e| panic!("create failed: {e}"));

    let error = transfer
        .select_pool(Duration::from_secs(1))
        .await
        .expect_err("selection should time out");

    assert!(
        matches!(error, TransferError::Timeout { .. }),
        "Expected timeout in: {error}"
    );
    assert_eq!(transfer.state(), TransferState::NameSpaceResolved);
}

#[tokio::test(start_paused = true)]
async fn test_upload_timeout_after_pool_assignment_is_not_retried() {
    let cluster = cluster_with_script(MoverScript::default());
    cluster
        .movers
        .fail_next_start(TransferError::timeout("pool-1", "start mover"));
    let transfer = upload(&cluster, "/data/x");
    transfer
        .create_name_space_entry(&parent())
        .await
        .unwrap_or_else(|e| panic!("create failed: {e}"));

    let error = transfer
        .select_pool_and_start_mover(&RetryPolicy::never_fail())
        .await
        .expect_err("start should fail");

    assert_eq!(error.code(), ErrorCode::TIMEOUT);
    assert_eq!(transfer.selection_attempts(), 1);
}

/// Cluster whose pool needs 600ms to create a mover.
fn slow_starting_pool() -> SimCluster {
    let cluster = SimCluster::with_pools(["pool-1"]);
    let movers = LoopbackMovers::new(Arc::clone(&cluster.registry))
        .with_start_latency(Duration::from_millis(600))
        .with_script(finishing_after(Duration::from_secs(1)));
    let cluster = cluster.with_movers(movers);
    cluster.namespace.add_directory("/data", 500, 100, 0o755);
    cluster.namespace.add_file("/data/f", 500, 100, 0o644, 10);
    cluster
}

#[tokio::test(start_paused = true)]
async fn test_slow_mover_start_does_not_fail_upload() {
    let cluster = slow_starting_pool();
    let door = Door::new(
        cluster.context(),
        Arc::new(GenericProtocol::new("Http", 1, 1)),
        DoorSettings::default(),
    );

    let report = door.upload(Subject::new(500, 100), "/data/x", None).await;

    assert!(report.is_success(), "Expected success, got: {}", report.message);
    assert_eq!(report.attempts, 1);
    assert_eq!(cluster.movers.started().len(), 1);
    assert!(cluster.namespace.contains("/data/x"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_mover_start_is_retried_for_download() {
    let cluster = slow_starting_pool();
    let transfer = Transfer::new(
        cluster.context(),
        Subject::new(500, 100),
        "/data/f",
        Arc::new(GenericProtocol::new("Http", 1, 1)),
    );
    transfer
        .read_name_space_entry(false)
        .await
        .unwrap_or_else(|e| panic!("read failed: {e}"));

    let error = transfer
        .select_pool_and_start_mover(&RetryPolicy::try_until_timeout(Duration::from_secs(2)))
        .await
        .expect_err("every start exceeds the per-attempt cap");

    assert_eq!(error.code(), ErrorCode::TIMEOUT);
    assert_eq!(classify_error(&error), FailureType::Transient);
    assert!(transfer.selection_attempts() > 1);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_aborts_retry_loop() {
    let cluster = cluster_with_script(MoverScript::default());
    for _ in 0..100 {
        cluster
            .selector
            .fail_next(TransferError::no_pool_available(POOL_MANAGER, "all pools offline"));
    }
    let transfer = upload(&cluster, "/data/x");
    transfer
        .create_name_space_entry(&parent())
        .await
        .unwrap_or_else(|e| panic!("create failed: {e}"));

    let interrupter = Arc::clone(&transfer);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1200)).await;
        interrupter.interrupt();
    });

    let error = transfer
        .select_pool_and_start_mover(&RetryPolicy::never_fail())
        .await
        .expect_err("interrupt should end the loop");

    assert_eq!(error.code(), ErrorCode::INTERRUPTED);
}
