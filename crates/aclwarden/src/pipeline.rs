// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-path normalization: readiness, enforcement, propagation.
//!
//! Shared by the watch workers and the one-shot `apply` command. Every
//! terminal state is written to the audit log before [`Pipeline::normalize`]
//! returns.

use crate::acl::ObjectKind;
use crate::audit::AuditLog;
use crate::config::WardenConfig;
use crate::enforce::Enforcer;
use crate::policy::PolicyEngine;
use crate::propagate::{PropagationReport, Propagator};
use crate::readiness::{Readiness, ReadinessGate};
use crate::store::{PermissionStore, StoreError};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Terminal state of one event.
#[derive(Debug)]
pub enum EventOutcome {
    /// Already claimed by an earlier notification.
    Duplicate,
    /// Not an event we act on (disabled kind, audit log files).
    Ignored,
    /// Still held by its creator after every readiness attempt.
    TimedOut { attempts: u32 },
    /// Gone before it could be handled.
    Vanished,
    /// Reading or writing the object's permissions failed.
    StoreFailed(StoreError),
    /// Object normalized; propagation may still be partial.
    Normalized {
        kind: ObjectKind,
        changed: bool,
        propagation: PropagationReport,
    },
}

impl EventOutcome {
    pub fn is_normalized(&self) -> bool {
        matches!(self, EventOutcome::Normalized { .. })
    }

    /// Normalized, but some related directory failed.
    pub fn is_partial(&self) -> bool {
        matches!(self, EventOutcome::Normalized { propagation, .. } if propagation.is_partial())
    }
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventOutcome::Duplicate => f.write_str("duplicate"),
            EventOutcome::Ignored => f.write_str("ignored"),
            EventOutcome::TimedOut { attempts } => {
                write!(f, "still in use after {} attempts", attempts)
            }
            EventOutcome::Vanished => f.write_str("no longer exists"),
            EventOutcome::StoreFailed(e) => write!(f, "store error: {}", e),
            EventOutcome::Normalized {
                kind, propagation, ..
            } => {
                write!(f, "{} normalized", kind)?;
                if propagation.is_partial() {
                    write!(
                        f,
                        ", {} of {} related directories failed",
                        propagation.failed.len(),
                        propagation.visited()
                    )?;
                }
                Ok(())
            }
        }
    }
}

pub struct Pipeline {
    gate: ReadinessGate,
    enforcer: Arc<Enforcer>,
    propagator: Propagator,
}

impl Pipeline {
    pub fn new(config: &WardenConfig, store: Arc<dyn PermissionStore>, audit: Arc<AuditLog>) -> Self {
        Self::with_gate(config, store, audit, ReadinessGate::new(&config.readiness))
    }

    pub fn with_gate(
        config: &WardenConfig,
        store: Arc<dyn PermissionStore>,
        audit: Arc<AuditLog>,
        gate: ReadinessGate,
    ) -> Self {
        let enforcer = Arc::new(Enforcer::new(
            store,
            PolicyEngine::new(config.policy.clone()),
            audit,
        ));
        let propagator = Propagator::new(
            enforcer.clone(),
            config.watch.roots.clone(),
            config.propagation.clone(),
        );
        Self {
            gate,
            enforcer,
            propagator,
        }
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        self.enforcer.audit()
    }

    pub fn propagator(&self) -> &Propagator {
        &self.propagator
    }

    /// Wait for the object, normalize it, then propagate.
    pub fn normalize(&self, path: &Path) -> EventOutcome {
        let audit = self.audit();

        match self.gate.wait_until_ready(path) {
            Readiness::Ready { attempts } => {
                tracing::debug!(path = %path.display(), attempts, "object ready");
            }
            Readiness::TimedOut { attempts } => {
                audit.record(format!(
                    "Gave up on {} after {} attempts: still in use",
                    path.display(),
                    attempts
                ));
                return EventOutcome::TimedOut { attempts };
            }
            Readiness::Vanished { .. } => {
                audit.record(format!("Skipped {}: no longer exists", path.display()));
                return EventOutcome::Vanished;
            }
        }

        let kind = match self.enforcer.store().object_kind(path) {
            Ok(kind) => kind,
            Err(e) => return self.store_failure(path, e),
        };
        audit.record(format!("Processing new {}: {}", kind, path.display()));

        let changed = match self.enforcer.enforce(path, kind) {
            Ok(outcome) => !outcome.is_noop(),
            Err(e) => return self.store_failure(path, e),
        };

        let propagation = self.propagator.propagate(path, kind);
        if propagation.is_partial() {
            audit.record(format!(
                "Propagation from {} partially failed: {} of {} directories",
                path.display(),
                propagation.failed.len(),
                propagation.visited()
            ));
        } else if !propagation.is_empty() {
            audit.record(format!(
                "Propagated permissions from {} to {} directories",
                path.display(),
                propagation.applied.len()
            ));
        }

        EventOutcome::Normalized {
            kind,
            changed,
            propagation,
        }
    }

    /// One-shot normalization of a directory and everything below it.
    pub fn normalize_subtree(&self, dir: &Path) -> PropagationReport {
        let report = self.propagator.apply_recursively_to_subtree(dir);
        let audit = self.audit();
        if report.is_partial() {
            audit.record(format!(
                "Subtree {} partially normalized: {} of {} directories failed",
                dir.display(),
                report.failed.len(),
                report.visited()
            ));
        } else {
            audit.record(format!(
                "Subtree {} normalized: {} directories",
                dir.display(),
                report.applied.len()
            ));
        }
        report
    }

    fn store_failure(&self, path: &Path, e: StoreError) -> EventOutcome {
        if e.is_not_found() {
            self.audit()
                .record(format!("Skipped {}: no longer exists", path.display()));
            return EventOutcome::Vanished;
        }
        self.audit().record(format!(
            "Error applying permissions to {}: {}",
            path.display(),
            e
        ));
        tracing::warn!(path = %path.display(), error = %e, "normalization failed");
        EventOutcome::StoreFailed(e)
    }
}
