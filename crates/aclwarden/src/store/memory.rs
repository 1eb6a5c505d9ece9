// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory permission store.

use super::{PermissionStore, StoreError};
use crate::acl::{ObjectKind, Principal, RuleSet};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
struct Entry {
    kind: ObjectKind,
    rules: RuleSet,
}

/// Thread-safe map of path to object, with injectable access failures.
///
/// Objects must be registered with [`MemoryStore::insert_file`] or
/// [`MemoryStore::insert_dir`] before use; anything else is `NotFound`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<PathBuf, Entry>>,
    denied: RwLock<HashSet<PathBuf>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_file(&self, path: impl Into<PathBuf>, rules: RuleSet) {
        self.insert(path.into(), ObjectKind::File, rules);
    }

    pub fn insert_dir(&self, path: impl Into<PathBuf>, rules: RuleSet) {
        self.insert(path.into(), ObjectKind::Directory, rules);
    }

    fn insert(&self, path: PathBuf, kind: ObjectKind, rules: RuleSet) {
        self.objects.write().insert(path, Entry { kind, rules });
    }

    pub fn remove(&self, path: &Path) {
        self.objects.write().remove(path);
    }

    /// Make every operation on `path` fail with `AccessDenied`.
    pub fn deny(&self, path: impl Into<PathBuf>) {
        self.denied.write().insert(path.into());
    }

    /// Snapshot of the stored rule set.
    pub fn rules(&self, path: &Path) -> Option<RuleSet> {
        self.objects.read().get(path).map(|e| e.rules.clone())
    }

    /// Number of successful `set_rules` and `set_owner` calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn check(&self, path: &Path) -> Result<(), StoreError> {
        if self.denied.read().contains(path) {
            return Err(StoreError::AccessDenied {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    fn with_entry<T>(
        &self,
        path: &Path,
        f: impl FnOnce(&mut Entry) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.check(path)?;
        let mut objects = self.objects.write();
        let entry = objects.get_mut(path).ok_or_else(|| StoreError::NotFound {
            path: path.to_path_buf(),
        })?;
        f(entry)
    }
}

fn expect_kind(path: &Path, entry: &Entry, expected: ObjectKind) -> Result<(), StoreError> {
    if entry.kind != expected {
        return Err(StoreError::KindMismatch {
            path: path.to_path_buf(),
            expected,
            found: entry.kind,
        });
    }
    Ok(())
}

impl PermissionStore for MemoryStore {
    fn get_rules(&self, path: &Path, kind: ObjectKind) -> Result<RuleSet, StoreError> {
        self.with_entry(path, |entry| {
            expect_kind(path, entry, kind)?;
            Ok(entry.rules.clone())
        })
    }

    fn set_rules(&self, path: &Path, kind: ObjectKind, rules: &RuleSet) -> Result<(), StoreError> {
        self.with_entry(path, |entry| {
            expect_kind(path, entry, kind)?;
            entry.rules.rules = rules.rules.clone();
            entry.rules.protected = rules.protected;
            Ok(())
        })?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get_owner(&self, path: &Path) -> Result<Principal, StoreError> {
        self.with_entry(path, |entry| {
            entry
                .rules
                .owner
                .clone()
                .ok_or_else(|| StoreError::UnknownPrincipal(format!("owner of {}", path.display())))
        })
    }

    fn set_owner(&self, path: &Path, owner: &Principal) -> Result<(), StoreError> {
        self.with_entry(path, |entry| {
            entry.rules.owner = Some(owner.clone());
            Ok(())
        })?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn object_kind(&self, path: &Path) -> Result<ObjectKind, StoreError> {
        self.with_entry(path, |entry| Ok(entry.kind))
    }

    fn subdirectories(&self, dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        self.with_entry(dir, |entry| expect_kind(dir, entry, ObjectKind::Directory))?;
        let mut dirs: Vec<PathBuf> = self
            .objects
            .read()
            .iter()
            .filter(|(p, e)| e.kind == ObjectKind::Directory && p.parent() == Some(dir))
            .map(|(p, _)| p.clone())
            .collect();
        dirs.sort();
        Ok(dirs)
    }
}
