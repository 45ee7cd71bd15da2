//! CLI entry point for the transfer door.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{debug, error, info};
use transfer_door::config::{self, DoorConfig, VerbositySetting};
use transfer_door::sim::{LoopbackMovers, MoverScript, POOL_MANAGER, SimCluster};
use transfer_door::{
    Door, DoorRequestInfo, ErrorCode, GenericProtocol, IoDoorEntry, Subject, TransferError,
    TransferReport, parent_of,
};

mod cli;

use cli::{Args, Command};

/// Everything the tool prints.
#[derive(Serialize)]
struct Output<'a> {
    report: &'a TransferReport,
    billing: Vec<DoorRequestInfo>,
    active_transfers: Vec<IoDoorEntry>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let loaded = config::load_config(args.config.as_deref())?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match (args.verbose, loaded.config.verbosity) {
            (0, Some(VerbositySetting::Quiet)) => "error",
            (0, Some(VerbositySetting::Verbose)) | (1, _) => "debug",
            (0, Some(VerbositySetting::Debug)) => "trace",
            (0, _) => "info",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
    debug!(
        path = ?loaded.path,
        loaded_from_file = loaded.loaded_from_file,
        "configuration resolved"
    );

    let cluster = build_cluster(&args.command, &loaded.config);
    let door = Door::new(
        cluster.context(),
        Arc::new(GenericProtocol::new("Http", 1, 1)),
        loaded.config.settings(),
    );

    let options = args.command.cluster();
    let subject = if options.anonymous {
        Subject::anonymous()
    } else {
        Subject::new(options.uid, options.gid)
    };
    info!(door = %cluster.door, path = args.command.path(), "starting transfer");

    let report = match &args.command {
        Command::Upload { path, .. } => door.upload(subject, path, options.client).await,
        Command::Download { path, .. } => door.download(subject, path, options.client).await,
    };

    let output = Output {
        report: &report,
        billing: cluster.billing.records(),
        active_transfers: door.active_transfers(),
    };
    let json = serde_json::to_string_pretty(&output).context("Failed to render report")?;
    println!("{json}");

    if report.is_success() {
        info!(session_id = report.session_id, "transfer finished");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(code = %report.code, message = %report.message, "transfer failed");
        Ok(ExitCode::FAILURE)
    }
}

/// Builds the in-process cluster and seeds it for `command`.
fn build_cluster(command: &Command, config: &DoorConfig) -> SimCluster {
    let options = command.cluster();
    let mut cluster =
        SimCluster::with_pools(options.pools.iter().cloned()).with_timeouts(config.timeouts());
    cluster.door = config.door_address();

    let bytes = match command {
        Command::Upload { bytes, .. } => *bytes,
        Command::Download { size, .. } => *size,
    };
    let return_code = ErrorCode::new(options.mover_code);
    let script = MoverScript {
        transfer_time: Some(Duration::from_millis(options.mover_time_ms)),
        return_code,
        message: if return_code.is_ok() {
            String::new()
        } else {
            format!("mover failed with {return_code}")
        },
        bytes,
    };
    let movers = LoopbackMovers::new(Arc::clone(&cluster.registry)).with_script(script);
    let cluster = cluster.with_movers(movers);

    for _ in 0..options.fail_selections {
        cluster
            .selector
            .fail_next(TransferError::no_pool_available(POOL_MANAGER, "all pools offline"));
    }

    let (owner, group, mode) = if options.anonymous {
        (0, 0, 0o777)
    } else {
        (options.uid, options.gid, 0o755)
    };
    let path = command.path();
    let mut directory = String::new();
    for component in parent_of(path).split('/').filter(|c| !c.is_empty()) {
        directory.push('/');
        directory.push_str(component);
        cluster.namespace.add_directory(&directory, owner, group, mode);
    }
    if let Command::Download { size, .. } = command {
        cluster.namespace.add_file(path, owner, group, 0o644, *size);
    }
    cluster
}
