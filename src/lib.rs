//! Door-side transfer orchestration.
//!
//! A door accepts a client's request to upload or download one file and
//! drives it through the cluster: it resolves the name space, asks the pool
//! manager for a pool, asks that pool to start a mover, waits for the mover
//! to finish, cleans up after failures and reports usage to billing.
//!
//! # Architecture
//!
//! - [`transfer`] - the per-file state machine ([`Transfer`])
//! - [`retry`] - retry policy for pool selection and mover start
//! - [`door`] - complete upload/download sequences on top of [`Transfer`]
//! - [`namespace`], [`pool`], [`billing`] - the services a door talks to
//! - [`registry`] - the "active transfers" view
//! - [`sim`] - in-process implementations of all services
//! - [`config`] - door configuration file

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod billing;
pub mod config;
pub mod door;
pub mod error;
pub mod namespace;
pub mod pool;
pub mod registry;
pub mod retry;
pub mod session;
pub mod sim;
pub mod subject;
pub mod transfer;

// Re-export commonly used types
pub use billing::{BillingNotifier, DoorRequestInfo};
pub use config::{DoorConfig, RetryPolicyKind, VerbositySetting};
pub use door::{Door, DoorSettings, TransferReport};
pub use error::{ErrorCode, FailureType, TransferError, classify_error};
pub use namespace::{
    AccessMask, AttributeStore, FileAttributes, FileTarget, FileType, PnfsId, RequestedAttribute,
    StorageInfo, parent_of,
};
pub use pool::{
    MoverController, MoverFinished, MoverId, MoverInfo, MoverKind, MoverRequest, PoolSelectRequest,
    PoolSelector, ProtocolInfo, SelectedPool,
};
pub use registry::TransferRegistry;
pub use retry::{Backoff, RetryDecision, RetryPolicy, RetryStats, run_with_retry};
pub use session::{DoorAddress, SessionCounter, SessionId};
pub use subject::Subject;
pub use transfer::{
    GenericProtocol, IoDoorEntry, Protocol, Timeouts, Transfer, TransferContext, TransferState,
};
