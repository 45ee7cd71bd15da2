use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ErrorCode, TransferError};
use crate::namespace::{
    AccessMask, AttributeStore, FileAttributes, FileTarget, FileType, PnfsId, RequestedAttribute,
    StorageInfo, parent_of,
};

const READ: u32 = 0o4;
const WRITE: u32 = 0o2;
const EXECUTE: u32 = 0o1;

#[derive(Debug, Clone)]
struct Entry {
    pnfs_id: PnfsId,
    file_type: FileType,
    owner: u32,
    group: u32,
    mode: u32,
    size: Option<u64>,
    storage_info: StorageInfo,
}

impl Entry {
    /// Checks `bits` (rwx as 0o7) for the caller; root may do anything.
    fn permits(&self, uid: Option<u32>, gids: &[u32], bits: u32) -> bool {
        if uid == Some(0) {
            return true;
        }
        let granted = if uid == Some(self.owner) {
            self.mode >> 6
        } else if gids.contains(&self.group) {
            self.mode >> 3
        } else {
            self.mode
        };
        granted & bits == bits
    }

    fn attributes(&self, requested: &[RequestedAttribute]) -> FileAttributes {
        let wants = |attribute| requested.contains(&attribute);
        FileAttributes {
            pnfs_id: wants(RequestedAttribute::PnfsId).then(|| self.pnfs_id.clone()),
            file_type: wants(RequestedAttribute::Type).then_some(self.file_type),
            size: if wants(RequestedAttribute::Size) { self.size } else { None },
            owner: wants(RequestedAttribute::Owner).then_some(self.owner),
            group: wants(RequestedAttribute::Group).then_some(self.group),
            mode: wants(RequestedAttribute::Mode).then_some(self.mode),
            storage_info: wants(RequestedAttribute::StorageInfo).then(|| self.storage_info.clone()),
        }
    }

    fn all_attributes(&self) -> FileAttributes {
        self.attributes(&[
            RequestedAttribute::PnfsId,
            RequestedAttribute::Type,
            RequestedAttribute::Size,
            RequestedAttribute::Owner,
            RequestedAttribute::Group,
            RequestedAttribute::Mode,
            RequestedAttribute::StorageInfo,
        ])
    }
}

/// In-memory name space with Unix permission checks.
///
/// Starts with a root directory owned by `0:0` with mode `0755`.
#[derive(Debug)]
pub struct InMemoryNamespace {
    entries: Mutex<BTreeMap<String, Entry>>,
    next_id: AtomicU64,
    latency: Duration,
}

impl Default for InMemoryNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryNamespace {
    #[must_use]
    pub fn new() -> Self {
        let namespace = Self {
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            latency: Duration::ZERO,
        };
        namespace.insert("/", FileType::Dir, 0, 0, 0o755, None);
        namespace
    }

    /// Delays every request by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Adds (or replaces) a directory.
    pub fn add_directory(&self, path: &str, owner: u32, group: u32, mode: u32) -> PnfsId {
        self.insert(path, FileType::Dir, owner, group, mode, None)
    }

    /// Adds (or replaces) a complete regular file.
    pub fn add_file(&self, path: &str, owner: u32, group: u32, mode: u32, size: u64) -> PnfsId {
        self.insert(path, FileType::Regular, owner, group, mode, Some(size))
    }

    /// Adds (or replaces) a special file such as a device node.
    pub fn add_special(&self, path: &str) -> PnfsId {
        self.insert(path, FileType::Special, 0, 0, 0o666, None)
    }

    /// All attributes of the entry at `path`.
    #[must_use]
    pub fn attributes(&self, path: &str) -> Option<FileAttributes> {
        self.entries().get(path).map(Entry::all_attributes)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.entries().contains_key(path)
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn allocate_id(&self) -> PnfsId {
        PnfsId::from_sequence(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn insert(
        &self,
        path: &str,
        file_type: FileType,
        owner: u32,
        group: u32,
        mode: u32,
        size: Option<u64>,
    ) -> PnfsId {
        let pnfs_id = self.allocate_id();
        let storage_info = StorageInfo {
            file_size: size.unwrap_or(0),
            ..StorageInfo::default()
        };
        self.entries().insert(
            path.to_string(),
            Entry {
                pnfs_id: pnfs_id.clone(),
                file_type,
                owner,
                group,
                mode,
                size,
                storage_info,
            },
        );
        pnfs_id
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn not_a_directory(path: &str) -> TransferError {
    TransferError::Remote {
        code: ErrorCode::NOT_DIR,
        message: format!("not a directory: {path}"),
    }
}

#[async_trait]
impl AttributeStore for InMemoryNamespace {
    async fn create_entry(
        &self,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
        mode: u32,
        _timeout: Duration,
    ) -> Result<FileAttributes, TransferError> {
        self.delay().await;
        let mut entries = self.entries();

        let parent = entries
            .get(parent_of(path))
            .ok_or_else(|| TransferError::file_not_found(parent_of(path)))?;
        if parent.file_type != FileType::Dir {
            return Err(not_a_directory(parent_of(path)));
        }
        let gids: Vec<u32> = gid.into_iter().collect();
        if !parent.permits(uid, &gids, WRITE | EXECUTE) {
            return Err(TransferError::permission_denied(path));
        }
        if entries.contains_key(path) {
            return Err(TransferError::file_exists(path));
        }

        let entry = Entry {
            pnfs_id: self.allocate_id(),
            file_type: FileType::Regular,
            owner: uid.unwrap_or(0),
            group: gid.unwrap_or(0),
            mode,
            size: None,
            storage_info: StorageInfo {
                is_new: true,
                ..StorageInfo::default()
            },
        };
        let attributes = entry.all_attributes();
        debug!(path, pnfs_id = %entry.pnfs_id, "created entry");
        entries.insert(path.to_string(), entry);
        Ok(attributes)
    }

    async fn get_attributes(
        &self,
        target: &FileTarget,
        requested: &[RequestedAttribute],
        access: &[AccessMask],
        uid: Option<u32>,
        gids: &[u32],
        _timeout: Duration,
    ) -> Result<FileAttributes, TransferError> {
        self.delay().await;
        let entries = self.entries();

        let entry = match target {
            FileTarget::Path(path) => entries.get(path.as_str()),
            FileTarget::Id(pnfs_id) => entries.values().find(|entry| entry.pnfs_id == *pnfs_id),
        }
        .ok_or_else(|| TransferError::file_not_found(target.to_string()))?;

        for mask in access {
            let bits = match mask {
                AccessMask::ReadData => READ,
                AccessMask::WriteData => WRITE,
            };
            if !entry.permits(uid, gids, bits) {
                return Err(TransferError::permission_denied(target.to_string()));
            }
        }
        Ok(entry.attributes(requested))
    }

    async fn delete_entry(
        &self,
        pnfs_id: &PnfsId,
        path: &str,
        _timeout: Duration,
    ) -> Result<(), TransferError> {
        self.delay().await;
        let mut entries = self.entries();
        match entries.get(path) {
            Some(entry) if entry.pnfs_id == *pnfs_id => {
                entries.remove(path);
                debug!(path, pnfs_id = %pnfs_id, "deleted entry");
                Ok(())
            }
            _ => Err(TransferError::file_not_found(path)),
        }
    }

    async fn delete_path(
        &self,
        path: &str,
        allowed: &[FileType],
        _timeout: Duration,
    ) -> Result<(), TransferError> {
        self.delay().await;
        let mut entries = self.entries();
        let file_type = entries
            .get(path)
            .map(|entry| entry.file_type)
            .ok_or_else(|| TransferError::file_not_found(path))?;
        if !allowed.contains(&file_type) {
            return Err(TransferError::not_regular_file(path));
        }
        entries.remove(path);
        Ok(())
    }

    async fn create_directories(
        &self,
        path: &str,
        uid: Option<u32>,
        gid: Option<u32>,
        _timeout: Duration,
    ) -> Result<(), TransferError> {
        self.delay().await;
        let mut entries = self.entries();
        let mut current = String::new();
        for component in path.split('/').filter(|component| !component.is_empty()) {
            current.push('/');
            current.push_str(component);
            match entries.get(current.as_str()) {
                Some(entry) if entry.file_type == FileType::Dir => {}
                Some(_) => return Err(not_a_directory(&current)),
                None => {
                    let entry = Entry {
                        pnfs_id: self.allocate_id(),
                        file_type: FileType::Dir,
                        owner: uid.unwrap_or(0),
                        group: gid.unwrap_or(0),
                        mode: 0o755,
                        size: None,
                        storage_info: StorageInfo::default(),
                    };
                    entries.insert(current.clone(), entry);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_create_requires_write_permission_on_parent() {
        let namespace = InMemoryNamespace::new();
        namespace.add_directory("/data", 500, 100, 0o755);

        let error = namespace
            .create_entry("/data/x", Some(501), Some(200), 0o644, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(error, TransferError::PermissionDenied { .. }), "{error}");

        let created = namespace
            .create_entry("/data/x", Some(500), Some(100), 0o644, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(created.owner, Some(500));
        assert_eq!(created.mode, Some(0o644));
        assert!(created.storage_info.unwrap().is_new);
    }

    #[tokio::test]
    async fn test_create_twice_reports_file_exists() {
        let namespace = InMemoryNamespace::new();
        namespace.add_directory("/data", 0, 0, 0o777);
        namespace
            .create_entry("/data/x", Some(1), Some(1), 0o644, TIMEOUT)
            .await
            .unwrap();
        let error = namespace
            .create_entry("/data/x", Some(1), Some(1), 0o644, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(error, TransferError::file_exists("/data/x"));
    }

    #[tokio::test]
    async fn test_create_without_parent_reports_not_found() {
        let namespace = InMemoryNamespace::new();
        let error = namespace
            .create_entry("/missing/x", Some(0), Some(0), 0o644, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(error, TransferError::file_not_found("/missing"));
    }

    #[tokio::test]
    async fn test_get_attributes_checks_read_access_and_filters() {
        let namespace = InMemoryNamespace::new();
        namespace.add_directory("/data", 0, 0, 0o755);
        namespace.add_file("/data/private", 500, 100, 0o600, 10);

        let target = FileTarget::Path("/data/private".into());
        let denied = namespace
            .get_attributes(&target, RequestedAttribute::TRANSFER, &[AccessMask::ReadData], Some(501), &[100], TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(denied, TransferError::PermissionDenied { .. }));

        let attributes = namespace
            .get_attributes(&target, RequestedAttribute::TRANSFER, &[AccessMask::ReadData], Some(500), &[100], TIMEOUT)
            .await
            .unwrap();
        assert_eq!(attributes.size, Some(10));
        assert_eq!(attributes.file_type, Some(FileType::Regular));
        assert_eq!(attributes.owner, None, "owner was not requested");
    }

    #[tokio::test]
    async fn test_get_attributes_by_id() {
        let namespace = InMemoryNamespace::new();
        let pnfs_id = namespace.add_file("/f", 0, 0, 0o644, 1);
        let attributes = namespace
            .get_attributes(&FileTarget::Id(pnfs_id.clone()), RequestedAttribute::TRANSFER, &[], None, &[], TIMEOUT)
            .await
            .unwrap();
        assert_eq!(attributes.pnfs_id, Some(pnfs_id));
    }

    #[tokio::test]
    async fn test_delete_entry_checks_identity() {
        let namespace = InMemoryNamespace::new();
        let pnfs_id = namespace.add_file("/f", 0, 0, 0o644, 1);
        let other = PnfsId::new("FFFF").unwrap();

        assert!(namespace.delete_entry(&other, "/f", TIMEOUT).await.is_err());
        namespace.delete_entry(&pnfs_id, "/f", TIMEOUT).await.unwrap();
        assert!(!namespace.contains("/f"));
    }

    #[tokio::test]
    async fn test_delete_path_respects_allowed_types() {
        let namespace = InMemoryNamespace::new();
        namespace.add_directory("/dir", 0, 0, 0o755);
        let error = namespace
            .delete_path("/dir", &[FileType::Regular], TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(error, TransferError::NotRegularFile { .. }));
        assert!(namespace.contains("/dir"));
    }

    #[tokio::test]
    async fn test_create_directories_creates_all_ancestors() {
        let namespace = InMemoryNamespace::new();
        namespace
            .create_directories("/a/b/c", Some(7), Some(8), TIMEOUT)
            .await
            .unwrap();
        for path in ["/a", "/a/b", "/a/b/c"] {
            let attributes = namespace.attributes(path).unwrap();
            assert_eq!(attributes.file_type, Some(FileType::Dir), "{path}");
            assert_eq!(attributes.owner, Some(7));
        }
    }

    #[tokio::test]
    async fn test_anonymous_access_uses_other_bits() {
        let namespace = InMemoryNamespace::new();
        namespace.add_directory("/public", 0, 0, 0o777);
        namespace
            .create_entry("/public/x", None, None, 0o666, TIMEOUT)
            .await
            .unwrap();
        let attributes = namespace.attributes("/public/x").unwrap();
        assert_eq!(attributes.owner, Some(0));
    }
}
