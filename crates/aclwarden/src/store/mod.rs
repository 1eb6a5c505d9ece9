// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Permission store abstraction
//!
//! Defines the trait for backends that read and write ownership and access
//! rules on filesystem objects.
//!
//! # Implementations
//!
//! - [`PosixStore`] -- mode bits and ownership on Unix
//! - [`MemoryStore`] -- in-memory objects, for tests and previews
//! - [`DryRunStore`] -- wraps another store, reports writes instead of doing them

mod dry_run;
mod memory;
#[cfg(unix)]
mod posix;

pub use dry_run::DryRunStore;
pub use memory::MemoryStore;
#[cfg(unix)]
pub use posix::PosixStore;

use crate::acl::{ObjectKind, Principal, RuleSet};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{}: no such file or directory", .path.display())]
    NotFound { path: PathBuf },

    #[error("{}: access denied", .path.display())]
    AccessDenied { path: PathBuf },

    #[error("{}: expected a {expected}, found a {found}", .path.display())]
    KindMismatch {
        path: PathBuf,
        expected: ObjectKind,
        found: ObjectKind,
    },

    #[error("unknown principal '{0}'")]
    UnknownPrincipal(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    /// Classify an I/O error raised while operating on `path`.
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound {
                path: path.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => StoreError::AccessDenied {
                path: path.to_path_buf(),
            },
            _ => StoreError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Read/write access to ownership and rules of filesystem objects.
///
/// Rule operations take the kind the caller believes the object has and fail
/// with [`StoreError::KindMismatch`] when it is something else (a file
/// replaced by a directory between the event and the call).
pub trait PermissionStore: Send + Sync {
    /// Current rules, protection flag and owner.
    fn get_rules(&self, path: &Path, kind: ObjectKind) -> Result<RuleSet, StoreError>;

    /// Replace rules and protection flag. The owner field is ignored; use
    /// [`PermissionStore::set_owner`].
    fn set_rules(&self, path: &Path, kind: ObjectKind, rules: &RuleSet) -> Result<(), StoreError>;

    fn get_owner(&self, path: &Path) -> Result<Principal, StoreError>;

    fn set_owner(&self, path: &Path, owner: &Principal) -> Result<(), StoreError>;

    /// Check that `principal` can be handed ownership by this backend.
    fn resolve_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        let _ = principal;
        Ok(())
    }

    /// True when writes are reported instead of performed.
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Kind of the object at `path`. Symbolic links are not followed.
    fn object_kind(&self, path: &Path) -> Result<ObjectKind, StoreError> {
        let meta = std::fs::symlink_metadata(path).map_err(|e| StoreError::from_io(path, e))?;
        Ok(if meta.is_dir() {
            ObjectKind::Directory
        } else {
            ObjectKind::File
        })
    }

    /// Immediate subdirectories of `dir`, without following symbolic links.
    fn subdirectories(&self, dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let entries = std::fs::read_dir(dir).map_err(|e| StoreError::from_io(dir, e))?;
        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::from_io(dir, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| StoreError::from_io(&entry.path(), e))?;
            if file_type.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

impl<T: PermissionStore + ?Sized> PermissionStore for Box<T> {
    fn get_rules(&self, path: &Path, kind: ObjectKind) -> Result<RuleSet, StoreError> {
        (**self).get_rules(path, kind)
    }

    fn set_rules(&self, path: &Path, kind: ObjectKind, rules: &RuleSet) -> Result<(), StoreError> {
        (**self).set_rules(path, kind, rules)
    }

    fn get_owner(&self, path: &Path) -> Result<Principal, StoreError> {
        (**self).get_owner(path)
    }

    fn set_owner(&self, path: &Path, owner: &Principal) -> Result<(), StoreError> {
        (**self).set_owner(path, owner)
    }

    fn resolve_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        (**self).resolve_principal(principal)
    }

    fn is_dry_run(&self) -> bool {
        (**self).is_dry_run()
    }

    fn object_kind(&self, path: &Path) -> Result<ObjectKind, StoreError> {
        (**self).object_kind(path)
    }

    fn subdirectories(&self, dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        (**self).subdirectories(dir)
    }
}

/// Store backing the platform's own permission model. `broad` is the
/// principal that stands for "everyone else" in the policy. On Unix the
/// default privileged principal (`Administrators`) stands for root.
pub fn native_store(broad: &Principal) -> Result<Box<dyn PermissionStore>, StoreError> {
    #[cfg(unix)]
    {
        Ok(Box::new(PosixStore::new().with_other_alias(broad.clone())))
    }
    #[cfg(not(unix))]
    {
        let _ = broad;
        Err(StoreError::Unsupported(
            "no native permission backend for this platform".into(),
        ))
    }
}
