/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Configuration file store and write-if-changed sync.
//!
//! The provisioning run decides *what* a file should contain; the store
//! decides *how* it lands on disk.  [`sync_file`] ties the two together and is
//! what makes a second run with unchanged hardware a no-op: identical content
//! is never rewritten, so no service restart follows.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::unistd::{chown, Group, User};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::ProvisionError;

/// Owner applied to a managed file after writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOwner {
    pub user: String,
    pub group: String,
}

/// A file gpsclock owns: path, mode and optional owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedFile {
    pub path: PathBuf,
    pub mode: u32,
    pub owner: Option<FileOwner>,
}

impl ManagedFile {
    /// World-readable configuration owned by whoever runs gpsclock.
    pub fn config(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: 0o644,
            owner: None,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }
}

pub trait ConfigStore {
    /// Current content, or `None` when the file does not exist.
    fn read_if_exists(&self, path: &Path) -> io::Result<Option<String>>;

    /// Replaces `path` so readers see either the old or the new content.
    fn write_atomic(&self, path: &Path, content: &str) -> io::Result<()>;

    fn set_permissions(&self, file: &ManagedFile) -> Result<(), ProvisionError>;
}

/// Writes `content` to `file` unless it is already there.
///
/// Returns `true` when the file was (re)written.  `force` rewrites even
/// identical content, for operators who edited a managed file by hand.
pub fn sync_file(
    store: &dyn ConfigStore,
    file: &ManagedFile,
    content: &str,
    force: bool,
) -> Result<bool, ProvisionError> {
    let current = store
        .read_if_exists(&file.path)
        .map_err(|e| ProvisionError::store(&file.path, e))?;

    if !force && current.as_deref() == Some(content) {
        debug!(path = %file.path.display(), "content unchanged");
        return Ok(false);
    }

    store
        .write_atomic(&file.path, content)
        .map_err(|e| ProvisionError::store(&file.path, e))?;
    store.set_permissions(file)?;
    info!(path = %file.path.display(), "wrote");
    Ok(true)
}

// ── FsStore ───────────────────────────────────────────────────────────────────

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStore;

impl ConfigStore for FsStore {
    fn read_if_exists(&self, path: &Path) -> io::Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_atomic(&self, path: &Path, content: &str) -> io::Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn set_permissions(&self, file: &ManagedFile) -> Result<(), ProvisionError> {
        fs::set_permissions(&file.path, fs::Permissions::from_mode(file.mode))
            .map_err(|e| ProvisionError::store(&file.path, e))?;

        if let Some(owner) = &file.owner {
            let user = User::from_name(&owner.user)
                .map_err(|e| ProvisionError::store(&file.path, e.into()))?
                .ok_or_else(|| ProvisionError::UnknownOwner {
                    kind: "user",
                    name: owner.user.clone(),
                })?;
            let group = Group::from_name(&owner.group)
                .map_err(|e| ProvisionError::store(&file.path, e.into()))?
                .ok_or_else(|| ProvisionError::UnknownOwner {
                    kind: "group",
                    name: owner.group.clone(),
                })?;
            chown(file.path.as_path(), Some(user.uid), Some(group.gid))
                .map_err(|e| ProvisionError::store(&file.path, e.into()))?;
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
