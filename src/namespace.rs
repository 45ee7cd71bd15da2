//! Name-space (attribute store) interface.
//!
//! The name space maps logical paths to file identities and their storage
//! attributes. Transfers consume it through [`AttributeStore`]; the concrete
//! store (a remote name-space service, or the in-memory one in
//! [`crate::sim`]) is injected by the door.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::TransferError;

/// Opaque identity of a name-space entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PnfsId(String);

impl PnfsId {
    /// Creates an id from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidArgs`] for an empty or non-hex id.
    pub fn new(id: impl Into<String>) -> Result<Self, TransferError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TransferError::invalid_args("empty pnfs id"));
        }
        if !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TransferError::invalid_args(format!(
                "pnfs id is not hexadecimal: {id}"
            )));
        }
        Ok(Self(id.to_ascii_uppercase()))
    }

    /// Builds the 24-digit id of the `n`th entry of a name space.
    #[must_use]
    pub fn from_sequence(n: u64) -> Self {
        Self(format!("{n:024X}"))
    }

    /// Returns the string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PnfsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a name-space entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Regular,
    Dir,
    Link,
    Special,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLatency {
    Online,
    Nearline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetentionPolicy {
    Custodial,
    Output,
    Replica,
}

/// Storage attributes of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    /// Storage class, e.g. `test:disk`.
    pub storage_class: String,
    /// Name of the tertiary storage system, e.g. `osm`.
    pub hsm: String,
    pub access_latency: AccessLatency,
    pub retention_policy: RetentionPolicy,
    /// Expected or actual size in bytes.
    pub file_size: u64,
    /// Set while the file has been created but its upload has not completed.
    pub is_new: bool,
    /// Free-form storage system specific keys.
    pub keys: BTreeMap<String, String>,
}

impl Default for StorageInfo {
    fn default() -> Self {
        Self {
            storage_class: "test:disk".to_string(),
            hsm: "osm".to_string(),
            access_latency: AccessLatency::Online,
            retention_policy: RetentionPolicy::Replica,
            file_size: 0,
            is_new: false,
            keys: BTreeMap::new(),
        }
    }
}

/// Attributes of a name-space entry. Every field may be undefined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileAttributes {
    pub pnfs_id: Option<PnfsId>,
    pub file_type: Option<FileType>,
    pub size: Option<u64>,
    pub owner: Option<u32>,
    pub group: Option<u32>,
    /// Permission bits (`0o7777` range).
    pub mode: Option<u32>,
    pub storage_info: Option<StorageInfo>,
}

impl FileAttributes {
    /// Attributes of a directory, as used when creating entries below it.
    #[must_use]
    pub fn directory(owner: u32, group: u32, mode: u32) -> Self {
        Self {
            file_type: Some(FileType::Dir),
            owner: Some(owner),
            group: Some(group),
            mode: Some(mode),
            ..Self::default()
        }
    }
}

/// Access the caller intends to perform on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMask {
    ReadData,
    WriteData,
}

/// Attribute requested from [`AttributeStore::get_attributes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestedAttribute {
    PnfsId,
    Type,
    Size,
    Owner,
    Group,
    Mode,
    StorageInfo,
}

impl RequestedAttribute {
    /// The attributes a transfer needs to read a file.
    pub const TRANSFER: &'static [Self] = &[
        Self::PnfsId,
        Self::Type,
        Self::Size,
        Self::StorageInfo,
    ];
}

/// How a name-space entry is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileTarget {
    Id(PnfsId),
    Path(String),
}

impl fmt::Display for FileTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Path(path) => f.write_str(path),
        }
    }
}

/// Remote name-space service.
///
/// Every call is bounded by `timeout`; an implementation reports a missed
/// deadline as [`TransferError::Timeout`].
#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Creates a regular file at `path` owned by `uid`/`gid` with `mode`.
    ///
    /// The entry is marked new until an upload completes. Returns the
    /// attributes of the created entry, including its identity.
    async fn create_entry(
        &self,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
        mode: u32,
        timeout: Duration,
    ) -> Result<FileAttributes, TransferError>;

    /// Reads attributes of `target` after checking `access` for `uid`/`gids`.
    async fn get_attributes(
        &self,
        target: &FileTarget,
        requested: &[RequestedAttribute],
        access: &[AccessMask],
        uid: Option<u32>,
        gids: &[u32],
        timeout: Duration,
    ) -> Result<FileAttributes, TransferError>;

    /// Deletes the entry `pnfs_id` found at `path`.
    async fn delete_entry(
        &self,
        pnfs_id: &PnfsId,
        path: &str,
        timeout: Duration,
    ) -> Result<(), TransferError>;

    /// Deletes the entry at `path` if its type is one of `allowed`.
    async fn delete_path(
        &self,
        path: &str,
        allowed: &[FileType],
        timeout: Duration,
    ) -> Result<(), TransferError>;

    /// Creates `path` and any missing ancestors as directories.
    async fn create_directories(
        &self,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
        timeout: Duration,
    ) -> Result<(), TransferError>;
}

/// Returns the parent directory of an absolute path (`/` for top-level entries).
#[must_use]
pub fn parent_of(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pnfs_id_normalized_to_upper_case() {
        let id = PnfsId::new("0000abcdef").unwrap();
        assert_eq!(id.as_str(), "0000ABCDEF");
        assert_eq!(id.to_string(), "0000ABCDEF");
    }

    #[test]
    fn test_pnfs_id_rejects_empty_and_garbage() {
        assert!(PnfsId::new("").is_err());
        let error = PnfsId::new("not-hex").unwrap_err();
        let msg = error.to_string();
        assert!(msg.contains("not-hex"), "Expected id in: {msg}");
    }

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("/data/x"), "/data");
        assert_eq!(parent_of("/data/sub/x"), "/data/sub");
        assert_eq!(parent_of("/x"), "/");
        assert_eq!(parent_of("/"), "/");
        assert_eq!(parent_of("/data/sub/"), "/data");
    }

    #[test]
    fn test_file_target_display() {
        let id = PnfsId::new("0001").unwrap();
        assert_eq!(FileTarget::Id(id).to_string(), "0001");
        assert_eq!(FileTarget::Path("/data/x".into()).to_string(), "/data/x");
    }

    #[test]
    fn test_storage_info_serializes_enums() {
        let json = serde_json::to_string(&StorageInfo::default()).unwrap();
        assert!(json.contains("\"ONLINE\""), "Expected latency in: {json}");
        assert!(json.contains("\"REPLICA\""), "Expected retention in: {json}");
    }
}
