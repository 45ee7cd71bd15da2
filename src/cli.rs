//! CLI argument definitions using clap derive macros.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Run one transfer through a door against an in-process cluster.
///
/// The cluster consists of a name space, a pool manager and pools that
/// live in this process. The transfer report, the billing record and the
/// active transfers are printed as JSON.
#[derive(Parser, Debug)]
#[command(name = "transfer-door")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/transfer-door/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload a file; its parent directory is created for the caller
    Upload {
        /// Absolute path of the file
        path: String,

        /// Bytes the mover reports as written
        #[arg(long, default_value_t = 0)]
        bytes: u64,

        #[command(flatten)]
        cluster: ClusterArgs,
    },

    /// Download a file; the file is created in the name space first
    Download {
        /// Absolute path of the file
        path: String,

        /// Size of the file to download
        #[arg(long, default_value_t = 1024)]
        size: u64,

        #[command(flatten)]
        cluster: ClusterArgs,
    },
}

impl Command {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Upload { path, .. } | Self::Download { path, .. } => path,
        }
    }

    #[must_use]
    pub fn cluster(&self) -> &ClusterArgs {
        match self {
            Self::Upload { cluster, .. } | Self::Download { cluster, .. } => cluster,
        }
    }
}

/// Caller identity and simulated cluster behavior.
#[derive(ClapArgs, Debug, Clone)]
pub struct ClusterArgs {
    /// Caller uid
    #[arg(long, default_value_t = 500)]
    pub uid: u32,

    /// Caller primary gid
    #[arg(long, default_value_t = 100)]
    pub gid: u32,

    /// Transfer as the anonymous user
    #[arg(long, conflicts_with_all = ["uid", "gid"])]
    pub anonymous: bool,

    /// Client address reported to pools and billing
    #[arg(long)]
    pub client: Option<SocketAddr>,

    /// Comma separated pool names
    #[arg(long, value_delimiter = ',', default_value = "pool-1")]
    pub pools: Vec<String>,

    /// Number of pool selections that fail with "no pool online"
    #[arg(long, default_value_t = 0)]
    pub fail_selections: u32,

    /// Time the mover takes in milliseconds
    #[arg(long, default_value_t = 100)]
    pub mover_time_ms: u64,

    /// Return code the mover finishes with
    #[arg(long, default_value_t = 0)]
    pub mover_code: i32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_upload_defaults() {
        let args = Args::try_parse_from(["transfer-door", "upload", "/data/x"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.config.is_none());
        assert_eq!(args.command.path(), "/data/x");
        let cluster = args.command.cluster();
        assert_eq!(cluster.uid, 500);
        assert_eq!(cluster.pools, vec!["pool-1".to_string()]);
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["transfer-door", "download", "/data/x", "-vv", "--config", "c.toml"])
                .unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn test_cli_pool_list() {
        let args = Args::try_parse_from([
            "transfer-door",
            "download",
            "/data/x",
            "--pools",
            "a,b,c",
            "--fail-selections",
            "2",
        ])
        .unwrap();
        let cluster = args.command.cluster();
        assert_eq!(cluster.pools, vec!["a", "b", "c"]);
        assert_eq!(cluster.fail_selections, 2);
    }

    #[test]
    fn test_cli_anonymous_conflicts_with_uid() {
        let result =
            Args::try_parse_from(["transfer-door", "upload", "/x", "--anonymous", "--uid", "1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        let result = Args::try_parse_from(["transfer-door"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["transfer-door", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
