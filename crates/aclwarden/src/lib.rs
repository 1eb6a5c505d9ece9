// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! aclwarden - filesystem permission normalizer
//!
//! Watches directory trees and re-applies an access policy to every object
//! that appears in them, then to the related directories.
//!
//! # Features
//!
//! - **Readiness gate**: waits until the creator has released a new file
//! - **Deduplication**: one normalization per burst of notifications
//! - **Policies**: additive, subtractive and rebuild modes with ownership takeover
//! - **Propagation**: ancestor and/or subtree walks that survive single failures
//! - **Audit log**: rotating, cross-process safe record of every mutation
//!
//! # Example
//!
//! ```rust,ignore
//! use aclwarden::{AuditLog, MemoryStore, PolicyMode, WardenConfig, WatchEvent, WatchLoop};
//! use std::sync::Arc;
//!
//! let config = WardenConfig::builder()
//!     .root("/srv/share")
//!     .mode(PolicyMode::Subtractive)
//!     .build();
//!
//! let audit = Arc::new(AuditLog::open(&config.audit));
//! let watch_loop = WatchLoop::new(&config, Arc::new(MemoryStore::new()), audit);
//!
//! let (tx, rx) = crossbeam::channel::unbounded();
//! tx.send(WatchEvent::created("/srv/share/report.docx"))?;
//! drop(tx);
//! let stats = watch_loop.run(rx)?;
//! ```

pub mod acl;
pub mod audit;
pub mod config;
pub mod dedup;
pub mod enforce;
pub mod pipeline;
pub mod policy;
pub mod propagate;
pub mod readiness;
pub mod store;
pub mod watch;

pub use acl::{Effect, ObjectKind, PermissionRule, Principal, Rights, RuleSet};
pub use audit::{AuditError, AuditLog};
pub use config::{
    AuditConfig, ConfigError, DedupConfig, Direction, KindPolicy, PolicyConfig, PolicyMode,
    PropagationConfig, ReadinessConfig, WardenConfig, WardenConfigBuilder, WatchConfig,
};
pub use dedup::EventDeduplicator;
pub use enforce::Enforcer;
pub use pipeline::{EventOutcome, Pipeline};
pub use policy::{PolicyEngine, PolicyOutcome};
pub use propagate::{PropagationReport, Propagator};
pub use readiness::{ExclusiveOpenProbe, Probe, ProbeResult, Readiness, ReadinessGate};
pub use store::{native_store, DryRunStore, MemoryStore, PermissionStore, StoreError};
#[cfg(unix)]
pub use store::PosixStore;
pub use watch::{
    check_roots, EventKind, NotifySource, StopHandle, WatchError, WatchEvent, WatchLoop,
    WatchStats,
};
