//! Name-space operations of a transfer.

use std::time::Duration;

use tracing::{debug, info, instrument};

use super::{Transfer, TransferState};
use crate::error::TransferError;
use crate::namespace::{AccessMask, FileAttributes, FileTarget, FileType, RequestedAttribute, parent_of};

/// Name used for the name-space service in errors.
pub(super) const NAMESPACE_SERVICE: &str = "PnfsManager";

impl Transfer {
    /// Creates the name-space entry of an upload below `parent`.
    ///
    /// The entry is owned by the subject, or by the owner of `parent` for
    /// anonymous subjects, and gets the permission bits `umask & parent mode`.
    /// On success the transfer knows the file's identity and is an upload.
    ///
    /// # Errors
    ///
    /// Propagates the name-space failure, e.g. [`TransferError::PermissionDenied`]
    /// or [`TransferError::FileExists`] if overwriting is not allowed.
    #[instrument(skip(self, parent), fields(session_id = %self.session_id, path = %self.path))]
    pub async fn create_name_space_entry(&self, parent: &FileAttributes) -> Result<(), TransferError> {
        let uid = self.subject.uid.or(parent.owner);
        let gid = self.subject.primary_gid().or(parent.group);
        let umask = self.subject.umask();
        let mode = parent.mode.map_or(umask, |parent_mode| umask & parent_mode);
        let overwrite_allowed = self.lock().overwrite_allowed;

        let previous = self.state();
        self.set_state(TransferState::ResolvingNameSpace);
        let _status = self.status_until("PnfsManager: Creating name space entry");

        let created = self.create_or_replace(uid, gid, mode, overwrite_allowed).await;

        let attributes = match created {
            Ok(attributes) => attributes,
            Err(e) => {
                self.set_state(previous);
                return Err(e);
            }
        };

        let mut inner = self.lock();
        if let Some(pnfs_id) = attributes.pnfs_id.clone() {
            inner.set_pnfs_id(pnfs_id)?;
        }
        info!(pnfs_id = ?inner.pnfs_id, mode = %format!("{mode:o}"), "created name space entry");
        inner.attributes = attributes;
        inner.is_write = true;
        inner.state = TransferState::NameSpaceResolved;
        Ok(())
    }

    async fn create_or_replace(
        &self,
        uid: Option<u32>,
        gid: Option<u32>,
        mode: u32,
        overwrite_allowed: bool,
    ) -> Result<FileAttributes, TransferError> {
        let timeout = self.ctx.timeouts.namespace;
        match self.create_entry(uid, gid, mode, timeout).await {
            Err(TransferError::FileExists { .. }) if overwrite_allowed => {
                debug!("replacing existing file");
                self.call_remote(
                    NAMESPACE_SERVICE,
                    "delete entry",
                    timeout,
                    self.ctx
                        .namespace
                        .delete_path(&self.path, &[FileType::Regular], timeout),
                )
                .await?;
                self.create_entry(uid, gid, mode, timeout).await
            }
            other => other,
        }
    }

    async fn create_entry(
        &self,
        uid: Option<u32>,
        gid: Option<u32>,
        mode: u32,
        timeout: Duration,
    ) -> Result<FileAttributes, TransferError> {
        self.call_remote(
            NAMESPACE_SERVICE,
            "create entry",
            timeout,
            self.ctx
                .namespace
                .create_entry(&self.path, uid, gid, mode, timeout),
        )
        .await
    }

    /// Like [`create_name_space_entry`](Self::create_name_space_entry), but
    /// creates missing parent directories first.
    ///
    /// # Errors
    ///
    /// Propagates the name-space failure.
    pub async fn create_name_space_entry_with_parents(
        &self,
        parent: &FileAttributes,
    ) -> Result<(), TransferError> {
        match self.create_name_space_entry(parent).await {
            Err(TransferError::FileNotFound { .. }) => {
                let directory = parent_of(&self.path);
                debug!(directory, "creating parent directories");
                let timeout = self.ctx.timeouts.namespace;
                self.call_remote(
                    NAMESPACE_SERVICE,
                    "create directories",
                    timeout,
                    self.ctx.namespace.create_directories(
                        directory,
                        self.subject.uid.or(parent.owner),
                        self.subject.primary_gid().or(parent.group),
                        timeout,
                    ),
                )
                .await?;
                self.create_name_space_entry(parent).await
            }
            other => other,
        }
    }

    /// Reads the name-space entry of the file to transfer.
    ///
    /// A file whose upload has not completed is opened for writing when
    /// `allow_write` is set; any other file makes this a download.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotRegularFile`] for directories and special
    /// files, [`TransferError::FileIsNew`] for an incomplete file when writing
    /// is not allowed, and propagates name-space failures.
    pub async fn read_name_space_entry(&self, allow_write: bool) -> Result<(), TransferError> {
        self.read_name_space_entry_within(allow_write, self.ctx.timeouts.namespace)
            .await
    }

    #[instrument(skip(self), fields(session_id = %self.session_id, path = %self.path))]
    pub(super) async fn read_name_space_entry_within(
        &self,
        allow_write: bool,
        timeout: Duration,
    ) -> Result<(), TransferError> {
        let access: &[AccessMask] = if allow_write {
            &[AccessMask::ReadData, AccessMask::WriteData]
        } else {
            &[AccessMask::ReadData]
        };
        let target = match self.pnfs_id() {
            Some(pnfs_id) => FileTarget::Id(pnfs_id),
            None => FileTarget::Path(self.path.clone()),
        };

        let previous = self.state();
        self.set_state(TransferState::ResolvingNameSpace);
        let status = self.status_until("PnfsManager: Fetching storage info");
        let fetched = self
            .call_remote(
                NAMESPACE_SERVICE,
                "get attributes",
                timeout,
                self.ctx.namespace.get_attributes(
                    &target,
                    RequestedAttribute::TRANSFER,
                    access,
                    self.subject.uid,
                    &self.subject.gids,
                    timeout,
                ),
            )
            .await;
        drop(status);

        let resolved = fetched.and_then(|attributes| self.check_readable(attributes, allow_write));
        let (attributes, is_write) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                self.set_state(previous);
                return Err(e);
            }
        };

        let mut inner = self.lock();
        if let Some(pnfs_id) = attributes.pnfs_id.clone() {
            inner.set_pnfs_id(pnfs_id)?;
        }
        inner.attributes = attributes;
        inner.is_write = is_write;
        inner.state = TransferState::NameSpaceResolved;
        debug!(pnfs_id = ?inner.pnfs_id, is_write, "read name space entry");
        Ok(())
    }

    /// Checks that `attributes` describe a transferable file and picks the I/O mode.
    fn check_readable(
        &self,
        attributes: FileAttributes,
        allow_write: bool,
    ) -> Result<(FileAttributes, bool), TransferError> {
        if matches!(attributes.file_type, Some(FileType::Dir | FileType::Special)) {
            return Err(TransferError::not_regular_file(&self.path));
        }

        let is_new = attributes
            .storage_info
            .as_ref()
            .is_some_and(|storage_info| storage_info.is_new);
        match (is_new, allow_write) {
            (false, _) => Ok((attributes, false)),
            (true, true) => Ok((attributes, true)),
            (true, false) => Err(TransferError::file_is_new(&self.path)),
        }
    }
}
