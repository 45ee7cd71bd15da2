//! Pool selection and mover control interfaces.
//!
//! A door first asks the pool manager ([`PoolSelector`]) for a pool that can
//! serve a file, then asks that pool ([`MoverController`]) to start a mover.
//! The mover-creation request is routed through the pool manager's address
//! with the pool appended ([`MoverRoute`]), so any affinity the transport
//! keeps per destination is preserved.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{ErrorCode, TransferError};
use crate::namespace::{FileAttributes, PnfsId};
use crate::session::SessionId;
use crate::subject::Subject;

/// Protocol-specific description of how the pool and client will talk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolInfo {
    /// Protocol name, e.g. `Xrootd` or `Http`.
    pub protocol: String,
    pub major_version: u32,
    pub minor_version: u32,
    /// Address of the client on the data channel, if known.
    pub client_address: Option<SocketAddr>,
    /// Protocol specific properties.
    pub properties: BTreeMap<String, String>,
}

impl ProtocolInfo {
    /// Creates a descriptor without properties.
    pub fn new(protocol: impl Into<String>, major_version: u32, minor_version: u32) -> Self {
        Self {
            protocol: protocol.into(),
            major_version,
            minor_version,
            client_address: None,
            properties: BTreeMap::new(),
        }
    }

    /// Sets the client address.
    #[must_use]
    pub fn with_client_address(mut self, address: Option<SocketAddr>) -> Self {
        self.client_address = address;
        self
    }

    /// Adds a protocol specific property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ProtocolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}.{}",
            self.protocol, self.major_version, self.minor_version
        )?;
        if let Some(address) = self.client_address {
            write!(f, ":{address}")?;
        }
        Ok(())
    }
}

/// Request to the pool manager for a read or write pool.
#[derive(Debug, Clone)]
pub struct PoolSelectRequest {
    pub session_id: SessionId,
    pub pnfs_id: PnfsId,
    pub attributes: FileAttributes,
    pub protocol_info: ProtocolInfo,
    pub is_write: bool,
    /// Allocation (uploads) or file size (downloads), if known.
    pub expected_size: Option<u64>,
    pub path: String,
    pub subject: Subject,
    pub io_queue: Option<String>,
    /// Hosts whose pools failed earlier attempts of this transfer.
    pub excluded_hosts: Vec<String>,
    /// Whether the pool manager may stage the file from tertiary storage.
    pub allow_stage: bool,
}

/// A pool chosen by the pool manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedPool {
    /// Pool name.
    pub name: String,
    /// Routing address of the pool cell.
    pub address: String,
}

impl SelectedPool {
    /// Creates a pool whose address equals its name.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            address: name.clone(),
            name,
        }
    }
}

impl fmt::Display for SelectedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The pool manager.
#[async_trait]
pub trait PoolSelector: Send + Sync {
    /// Name of the pool manager, used in errors and routes.
    fn name(&self) -> &str;

    /// Selects a pool for `request`.
    ///
    /// The reply may carry refreshed file attributes. Fails with
    /// [`TransferError::NoPoolAvailable`] when no pool can serve the request,
    /// and with [`TransferError::Timeout`] when no reply arrives in `timeout`.
    async fn select_pool(
        &self,
        request: PoolSelectRequest,
        timeout: Duration,
    ) -> Result<(SelectedPool, FileAttributes), TransferError>;
}

/// Shape of the mover-creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoverKind {
    /// Upload: the mover accepts data from the client.
    Accept,
    /// Download: the mover delivers data to the client.
    Deliver,
}

/// Route of a mover-creation request: the pool manager, then the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoverRoute(Vec<String>);

impl MoverRoute {
    /// Route through `pool_manager` to `pool`.
    pub fn via(pool_manager: impl Into<String>, pool: &SelectedPool) -> Self {
        Self(vec![pool_manager.into(), pool.address.clone()])
    }

    /// Hops in order.
    #[must_use]
    pub fn hops(&self) -> &[String] {
        &self.0
    }

    /// Final destination.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

impl fmt::Display for MoverRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(":"))
    }
}

/// Request to a pool to start a mover.
#[derive(Debug, Clone)]
pub struct MoverRequest {
    pub kind: MoverKind,
    pub pool: SelectedPool,
    pub pnfs_id: PnfsId,
    pub protocol_info: ProtocolInfo,
    pub attributes: FileAttributes,
    pub io_queue: Option<String>,
    /// Transaction string of the initiating transfer.
    pub initiator: String,
    pub session_id: SessionId,
    pub route: MoverRoute,
}

/// Handle of a mover on its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MoverId(i32);

impl MoverId {
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for MoverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status snapshot of a running mover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoverInfo {
    pub mover_id: MoverId,
    pub pool: String,
    /// Pool-side state, e.g. `RUNNING` or `QUEUED`.
    pub state: String,
    pub bytes_transferred: u64,
    pub started_at: SystemTime,
    pub last_transferred_at: Option<SystemTime>,
}

/// Notification sent by a pool when a mover ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoverFinished {
    /// Session of the transfer the mover served.
    pub session_id: SessionId,
    pub pool: String,
    pub mover_id: MoverId,
    /// Zero on success.
    pub return_code: ErrorCode,
    pub message: String,
    /// File attributes as known to the pool after the transfer.
    pub attributes: Option<FileAttributes>,
    /// Protocol information as updated by the mover.
    pub protocol_info: Option<ProtocolInfo>,
}

impl MoverFinished {
    /// The outcome this notification reports.
    ///
    /// # Errors
    ///
    /// Returns a [`TransferError::Remote`] carrying the return code when the
    /// mover failed.
    pub fn result(&self) -> Result<(), TransferError> {
        match TransferError::from_code(self.return_code, self.message.clone()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// The pools.
#[async_trait]
pub trait MoverController: Send + Sync {
    /// Starts a mover and returns its handle.
    async fn start_mover(
        &self,
        request: MoverRequest,
        timeout: Duration,
    ) -> Result<MoverId, TransferError>;

    /// Asks `pool` to kill `mover_id`. No reply is expected; an error means
    /// the request could not be routed.
    async fn kill_mover(
        &self,
        pool: &SelectedPool,
        mover_id: MoverId,
        explanation: &str,
    ) -> Result<(), TransferError>;

    /// Queries the state of `mover_id` on `pool`.
    async fn query_mover(
        &self,
        pool: &SelectedPool,
        mover_id: MoverId,
        timeout: Duration,
    ) -> Result<MoverInfo, TransferError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_route_goes_through_pool_manager() {
        let pool = SelectedPool {
            name: "pool-1".into(),
            address: "pool-1@poolDomain".into(),
        };
        let route = MoverRoute::via("PoolManager", &pool);
        assert_eq!(route.hops(), ["PoolManager", "pool-1@poolDomain"]);
        assert_eq!(route.destination(), Some("pool-1@poolDomain"));
        assert_eq!(route.to_string(), "PoolManager:pool-1@poolDomain");
    }

    #[test]
    fn test_protocol_info_display() {
        let address: SocketAddr = "192.0.2.7:1094".parse().unwrap();
        let info = ProtocolInfo::new("Xrootd", 2, 7).with_client_address(Some(address));
        assert_eq!(info.to_string(), "Xrootd-2.7:192.0.2.7:1094");
        assert_eq!(ProtocolInfo::new("Http", 1, 1).to_string(), "Http-1.1");
    }

    #[test]
    fn test_mover_finished_result() {
        let mut message = MoverFinished {
            session_id: SessionId::new(1),
            pool: "pool-1".into(),
            mover_id: MoverId::new(42),
            return_code: ErrorCode::OK,
            message: String::new(),
            attributes: None,
            protocol_info: None,
        };
        assert!(message.result().is_ok());

        message.return_code = ErrorCode::new(204);
        message.message = "disk I/O error".into();
        let error = message.result().unwrap_err();
        assert_eq!(error.code().as_i32(), 204);
    }

    #[test]
    fn test_selected_pool_named() {
        let pool = SelectedPool::named("pool-2");
        assert_eq!(pool.address, "pool-2");
        assert_eq!(pool.to_string(), "pool-2");
    }
}
