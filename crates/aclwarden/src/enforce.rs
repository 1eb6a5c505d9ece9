// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read, transform, write back: one policy application on one object.

use crate::acl::ObjectKind;
use crate::audit::AuditLog;
use crate::config::KindPolicy;
use crate::policy::{PolicyEngine, PolicyOutcome};
use crate::store::{PermissionStore, StoreError};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Audit wording for performed and previewed mutations.
struct Phrases {
    owner: &'static str,
    protect: &'static str,
    remove: &'static str,
    add: &'static str,
    update: &'static str,
}

const APPLIED: Phrases = Phrases {
    owner: "Took ownership of",
    protect: "Disabled inheritance on",
    remove: "Removed rule from",
    add: "Added rule to",
    update: "Updated permissions for:",
};

const PREVIEW: Phrases = Phrases {
    owner: "Would take ownership of",
    protect: "Would disable inheritance on",
    remove: "Would remove rule from",
    add: "Would add rule to",
    update: "Would update permissions for:",
};

/// Paths with a get-then-set round trip in progress.
#[derive(Default)]
struct InFlight {
    paths: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl InFlight {
    /// Block until no other caller holds `path`, then hold it.
    fn claim(&self, path: &Path) -> Claim<'_> {
        let mut paths = self.paths.lock();
        while paths.contains(path) {
            self.released.wait(&mut paths);
        }
        paths.insert(path.to_path_buf());
        Claim {
            in_flight: self,
            path: path.to_path_buf(),
        }
    }
}

struct Claim<'a> {
    in_flight: &'a InFlight,
    path: PathBuf,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.in_flight.paths.lock().remove(&self.path);
        self.in_flight.released.notify_all();
    }
}

/// Applies the policy engine through a permission store and records every
/// mutation to the audit log.
///
/// Rules are read fresh on each call. Round trips on one path are serialized
/// across every caller sharing this enforcer (watch workers and the
/// propagator alike); nothing guards against writers in other processes.
pub struct Enforcer {
    store: Arc<dyn PermissionStore>,
    policy: PolicyEngine,
    audit: Arc<AuditLog>,
    in_flight: InFlight,
}

impl Enforcer {
    pub fn new(store: Arc<dyn PermissionStore>, policy: PolicyEngine, audit: Arc<AuditLog>) -> Self {
        Self {
            store,
            policy,
            audit,
            in_flight: InFlight::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PermissionStore> {
        &self.store
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Normalize an object that was just created. Ownership is changed
    /// before the rules so that backends keyed on the owner see the final
    /// owner.
    pub fn enforce(&self, path: &Path, kind: ObjectKind) -> Result<PolicyOutcome, StoreError> {
        let kind_policy = self.policy.kind_policy(kind);
        self.enforce_with(path, kind, kind_policy)
    }

    /// Normalize a directory reached by propagation.
    pub fn enforce_propagated(&self, dir: &Path) -> Result<PolicyOutcome, StoreError> {
        let kind_policy = self.policy.config().propagated;
        self.enforce_with(dir, ObjectKind::Directory, kind_policy)
    }

    fn enforce_with(
        &self,
        path: &Path,
        kind: ObjectKind,
        kind_policy: KindPolicy,
    ) -> Result<PolicyOutcome, StoreError> {
        let _claim = self.in_flight.claim(path);

        let current = self.store.get_rules(path, kind)?;
        let outcome = self.policy.apply_with(&current, kind_policy);

        if outcome.is_noop() {
            tracing::debug!(path = %path.display(), kind = %kind, "already compliant");
            return Ok(outcome);
        }

        let phrases = if self.store.is_dry_run() {
            &PREVIEW
        } else {
            &APPLIED
        };
        let shown = path.display();

        if let Some(owner) = outcome.new_owner() {
            self.store.set_owner(path, owner)?;
            self.audit
                .record(format!("{} {} for {}", phrases.owner, shown, owner));
        }

        if outcome.rules_changed() {
            self.store.set_rules(path, kind, &outcome.rules)?;
            if outcome.protection_changed && outcome.rules.protected {
                self.audit.record(format!("{} {}", phrases.protect, shown));
            }
            for rule in &outcome.removed {
                self.audit
                    .record(format!("{} {}: {}", phrases.remove, shown, rule));
            }
            for rule in &outcome.added {
                self.audit
                    .record(format!("{} {}: {}", phrases.add, shown, rule));
            }
            self.audit.record(format!("{} {}", phrases.update, shown));
        }

        tracing::debug!(
            path = %path.display(),
            kind = %kind,
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            owner_changed = outcome.owner_changed,
            "enforced"
        );
        Ok(outcome)
    }
}
