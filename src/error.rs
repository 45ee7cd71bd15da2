//! Error types for transfer operations.
//!
//! Every [`TransferError`] maps to a numeric [`ErrorCode`], which is what a door
//! ultimately reports to its client and to billing. The [`classify_error`]
//! function decides whether a failure is worth another pool-selection attempt.
//!
//! # Failure Classes
//!
//! - [`FailureType::Transient`] - Resource temporarily unavailable; retry after a delay
//! - [`FailureType::Stale`] - Pool selection went out of date; retry immediately
//! - [`FailureType::Permanent`] - Permission/validation failure; never retried
//! - [`FailureType::IllegalState`] - Door called operations out of order; never retried
//! - [`FailureType::Interrupted`] - The waiting caller was interrupted; never retried

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

/// Numeric result code of a transfer step.
///
/// Zero means success. The remaining values follow the storage system's cache
/// error codes so that doors and billing can report them verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ErrorCode(i32);

impl ErrorCode {
    pub const OK: Self = Self(0);
    pub const POOL_DISABLED: Self = Self(104);
    pub const DEFAULT_ERROR: Self = Self(666);
    pub const FILE_NOT_FOUND: Self = Self(10001);
    pub const TIMEOUT: Self = Self(10006);
    pub const FILE_NOT_IN_REPOSITORY: Self = Self(10007);
    pub const FILE_EXISTS: Self = Self(10008);
    pub const NOT_DIR: Self = Self(10010);
    pub const UNEXPECTED_SYSTEM_EXCEPTION: Self = Self(10011);
    pub const OUT_OF_DATE: Self = Self(10013);
    pub const FILE_IS_NEW: Self = Self(10014);
    pub const NOT_FILE: Self = Self(10015);
    pub const INVALID_ARGS: Self = Self(10016);
    pub const NO_POOL_CONFIGURED: Self = Self(10017);
    pub const NO_POOL_ONLINE: Self = Self(10018);
    pub const PERMISSION_DENIED: Self = Self(10019);
    pub const FILE_IN_CACHE: Self = Self(10020);
    pub const POOL_UNAVAILABLE: Self = Self(10021);
    pub const INTERRUPTED: Self = Self(10022);
    pub const ILLEGAL_STATE: Self = Self(10023);

    /// Wraps a raw return code as reported by a pool or the pool manager.
    #[must_use]
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns true for the success code.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur while driving a transfer.
///
/// The type is `Clone` because a single terminal error recorded by a mover
/// finish notification is observed by every waiter of the transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The subject may not perform the requested access.
    #[error("permission denied: {path}")]
    PermissionDenied {
        /// Path the access was denied for.
        path: String,
    },

    /// The target is a directory, link target or special file.
    #[error("not a regular file: {path}")]
    NotRegularFile {
        /// Path of the rejected entry.
        path: String,
    },

    /// The name-space entry (or its parent directory) does not exist.
    #[error("no such file or directory: {path}")]
    FileNotFound {
        /// Path that could not be resolved.
        path: String,
    },

    /// The name-space entry already exists.
    #[error("file exists: {path}")]
    FileExists {
        /// Path of the existing entry.
        path: String,
    },

    /// The file has been created but its upload has not completed yet.
    #[error("file is still being written: {path}")]
    FileIsNew {
        /// Path of the incomplete file.
        path: String,
    },

    /// A request was malformed.
    #[error("invalid arguments: {reason}")]
    InvalidArgs {
        /// What was wrong with the request.
        reason: String,
    },

    /// The pool manager could not find a pool for the request.
    #[error("no pool available from {pool_manager} (rc={code}): {reason}")]
    NoPoolAvailable {
        /// Name of the pool manager that answered.
        pool_manager: String,
        /// One of `NO_POOL_ONLINE`, `NO_POOL_CONFIGURED` or `POOL_UNAVAILABLE`.
        code: ErrorCode,
        /// Explanation reported by the pool manager.
        reason: String,
    },

    /// The selected pool refused to create a mover.
    #[error("pool {pool} unavailable (rc={code}): {reason}")]
    PoolUnavailable {
        /// The pool that refused.
        pool: String,
        /// One of `POOL_DISABLED`, `POOL_UNAVAILABLE` or `OUT_OF_DATE`.
        code: ErrorCode,
        /// Explanation reported by the pool.
        reason: String,
    },

    /// The selected pool does not hold a replica of the file (any more).
    #[error("file {pnfs_id} is not in the repository of pool {pool}")]
    FileNotInPool {
        /// The pool that was asked.
        pool: String,
        /// The file identity.
        pnfs_id: String,
    },

    /// A remote step did not complete before its deadline.
    #[error("timeout waiting for {target} during {operation}")]
    Timeout {
        /// The service that did not answer.
        target: String,
        /// The step that timed out.
        operation: &'static str,
    },

    /// A request could not be routed to its destination.
    #[error("no route to {target}")]
    NoRoute {
        /// The unreachable destination.
        target: String,
    },

    /// A failure reported as a bare return-code/message pair.
    #[error("{message} (rc={code})")]
    Remote {
        /// The reported return code.
        code: ErrorCode,
        /// The reported message.
        message: String,
    },

    /// An operation was called before its preconditions were established.
    #[error("illegal state in {operation}: {reason}")]
    IllegalState {
        /// The misused operation.
        operation: &'static str,
        /// Which precondition was violated.
        reason: String,
    },

    /// The waiting caller was interrupted.
    #[error("interrupted during {operation}")]
    Interrupted {
        /// The step that was waiting.
        operation: &'static str,
    },
}

impl TransferError {
    /// Creates a permission-denied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied { path: path.into() }
    }

    /// Creates a not-a-regular-file error.
    pub fn not_regular_file(path: impl Into<String>) -> Self {
        Self::NotRegularFile { path: path.into() }
    }

    /// Creates a file-not-found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a file-exists error.
    pub fn file_exists(path: impl Into<String>) -> Self {
        Self::FileExists { path: path.into() }
    }

    /// Creates an incomplete-file error.
    pub fn file_is_new(path: impl Into<String>) -> Self {
        Self::FileIsNew { path: path.into() }
    }

    /// Creates an invalid-arguments error.
    pub fn invalid_args(reason: impl Into<String>) -> Self {
        Self::InvalidArgs {
            reason: reason.into(),
        }
    }

    /// Creates a no-pool-online error.
    pub fn no_pool_available(pool_manager: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NoPoolAvailable {
            pool_manager: pool_manager.into(),
            code: ErrorCode::NO_POOL_ONLINE,
            reason: reason.into(),
        }
    }

    /// Creates an error for a pool manager without any configured pool for the request.
    pub fn no_pool_configured(pool_manager: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NoPoolAvailable {
            pool_manager: pool_manager.into(),
            code: ErrorCode::NO_POOL_CONFIGURED,
            reason: reason.into(),
        }
    }

    /// Creates a pool-disabled error.
    pub fn pool_disabled(pool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PoolUnavailable {
            pool: pool.into(),
            code: ErrorCode::POOL_DISABLED,
            reason: reason.into(),
        }
    }

    /// Creates an error for a pool whose selection went out of date.
    pub fn out_of_date(pool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PoolUnavailable {
            pool: pool.into(),
            code: ErrorCode::OUT_OF_DATE,
            reason: reason.into(),
        }
    }

    /// Creates a file-not-in-pool error.
    pub fn file_not_in_pool(pool: impl Into<String>, pnfs_id: impl Into<String>) -> Self {
        Self::FileNotInPool {
            pool: pool.into(),
            pnfs_id: pnfs_id.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(target: impl Into<String>, operation: &'static str) -> Self {
        Self::Timeout {
            target: target.into(),
            operation,
        }
    }

    /// Creates a no-route error.
    pub fn no_route(target: impl Into<String>) -> Self {
        Self::NoRoute {
            target: target.into(),
        }
    }

    /// Creates an illegal-state error.
    pub fn illegal_state(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::IllegalState {
            operation,
            reason: reason.into(),
        }
    }

    /// Creates an interrupted error.
    pub fn interrupted(operation: &'static str) -> Self {
        Self::Interrupted { operation }
    }

    /// Creates an error from a return-code/message pair.
    ///
    /// Returns `None` for the success code.
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Option<Self> {
        if code.is_ok() {
            None
        } else {
            Some(Self::Remote {
                code,
                message: message.into(),
            })
        }
    }

    /// Returns the numeric result code reported for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::PermissionDenied { .. } => ErrorCode::PERMISSION_DENIED,
            Self::NotRegularFile { .. } => ErrorCode::NOT_FILE,
            Self::FileNotFound { .. } => ErrorCode::FILE_NOT_FOUND,
            Self::FileExists { .. } => ErrorCode::FILE_EXISTS,
            Self::FileIsNew { .. } => ErrorCode::FILE_IS_NEW,
            Self::InvalidArgs { .. } => ErrorCode::INVALID_ARGS,
            Self::NoPoolAvailable { code, .. }
            | Self::PoolUnavailable { code, .. }
            | Self::Remote { code, .. } => *code,
            Self::FileNotInPool { .. } => ErrorCode::FILE_NOT_IN_REPOSITORY,
            // An unroutable request is indistinguishable from a silent peer.
            Self::Timeout { .. } | Self::NoRoute { .. } => ErrorCode::TIMEOUT,
            Self::IllegalState { .. } => ErrorCode::ILLEGAL_STATE,
            Self::Interrupted { .. } => ErrorCode::INTERRUPTED,
        }
    }

    /// Returns true for errors that indicate a programming error in the door.
    #[must_use]
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState { .. })
    }
}

// Note: there are no `From` conversions from foreign error types. Every variant
// needs the path, pool or operation it happened in, which only the caller knows.

/// Classification of a transfer failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Resource temporarily unavailable; may succeed after a delay.
    ///
    /// Examples: no pool online, pool manager timeout, mover-start timeout.
    Transient,

    /// The pool selection is out of date; a fresh selection may succeed at once.
    ///
    /// Examples: pool disabled, file no longer in the selected pool.
    Stale,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: permission denied, not a regular file, malformed request.
    Permanent,

    /// Operations were called out of order. Indicates a bug in the caller.
    IllegalState,

    /// The waiting caller was interrupted.
    Interrupted,
}

impl FailureType {
    /// Returns true if a retry loop may attempt the operation again.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Stale)
    }
}

/// Classifies a transfer error into a failure type for retry decisions.
///
/// # Classification
///
/// | Code | Type |
/// |------|------|
/// | `OUT_OF_DATE`, `POOL_DISABLED`, `FILE_NOT_IN_REPOSITORY` | Stale |
/// | `PERMISSION_DENIED`, `NOT_FILE`, `INVALID_ARGS`, `FILE_NOT_FOUND` | Permanent |
/// | `FILE_EXISTS`, `FILE_IS_NEW`, `FILE_IN_CACHE`, `NOT_DIR` | Permanent |
/// | `NO_POOL_CONFIGURED` | Permanent |
/// | `TIMEOUT`, `NO_POOL_ONLINE`, `POOL_UNAVAILABLE` | Transient |
/// | `ILLEGAL_STATE` | IllegalState |
/// | `INTERRUPTED` | Interrupted |
/// | anything else | Transient |
#[instrument(level = "trace")]
pub fn classify_error(error: &TransferError) -> FailureType {
    match error {
        TransferError::IllegalState { .. } => return FailureType::IllegalState,
        TransferError::Interrupted { .. } => return FailureType::Interrupted,
        _ => {}
    }
    classify_code(error.code())
}

/// Classifies a raw return code.
#[allow(clippy::match_same_arms)]
fn classify_code(code: ErrorCode) -> FailureType {
    match code {
        ErrorCode::OUT_OF_DATE | ErrorCode::POOL_DISABLED | ErrorCode::FILE_NOT_IN_REPOSITORY => {
            FailureType::Stale
        }

        ErrorCode::PERMISSION_DENIED
        | ErrorCode::NOT_FILE
        | ErrorCode::INVALID_ARGS
        | ErrorCode::FILE_NOT_FOUND
        | ErrorCode::FILE_EXISTS
        | ErrorCode::FILE_IS_NEW
        | ErrorCode::FILE_IN_CACHE
        | ErrorCode::NOT_DIR
        | ErrorCode::NO_POOL_CONFIGURED => FailureType::Permanent,

        ErrorCode::TIMEOUT | ErrorCode::NO_POOL_ONLINE | ErrorCode::POOL_UNAVAILABLE => {
            FailureType::Transient
        }

        ErrorCode::ILLEGAL_STATE => FailureType::IllegalState,
        ErrorCode::INTERRUPTED => FailureType::Interrupted,

        // Unknown pool-side failures are worth another selection.
        _ => FailureType::Transient,
    }
}
