// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read-through store that only reports writes.

use super::{PermissionStore, StoreError};
use crate::acl::{ObjectKind, Principal, RuleSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Delegates reads to the wrapped store and logs every write instead of
/// performing it.
pub struct DryRunStore<S> {
    inner: S,
    suppressed: AtomicU64,
}

impl<S: PermissionStore> DryRunStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            suppressed: AtomicU64::new(0),
        }
    }

    /// Writes that were reported but not performed.
    pub fn suppressed_writes(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: PermissionStore> PermissionStore for DryRunStore<S> {
    fn get_rules(&self, path: &Path, kind: ObjectKind) -> Result<RuleSet, StoreError> {
        self.inner.get_rules(path, kind)
    }

    fn set_rules(&self, path: &Path, kind: ObjectKind, rules: &RuleSet) -> Result<(), StoreError> {
        // Still surface vanished or retyped objects.
        self.inner.get_rules(path, kind)?;
        self.suppressed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            path = %path.display(),
            kind = %kind,
            protected = rules.protected,
            rules = rules.rules.len(),
            "dry-run: would set rules"
        );
        for rule in &rules.rules {
            tracing::debug!(path = %path.display(), rule = %rule, "dry-run: rule");
        }
        Ok(())
    }

    fn get_owner(&self, path: &Path) -> Result<Principal, StoreError> {
        self.inner.get_owner(path)
    }

    fn set_owner(&self, path: &Path, owner: &Principal) -> Result<(), StoreError> {
        self.inner.get_owner(path)?;
        self.suppressed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(path = %path.display(), owner = %owner, "dry-run: would set owner");
        Ok(())
    }

    fn resolve_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        self.inner.resolve_principal(principal)
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    fn object_kind(&self, path: &Path) -> Result<ObjectKind, StoreError> {
        self.inner.object_kind(path)
    }

    fn subdirectories(&self, dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        self.inner.subdirectories(dir)
    }
}
