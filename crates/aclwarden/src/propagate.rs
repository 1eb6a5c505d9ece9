// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Directory propagation: ancestors up to the watched root, or a whole subtree.
//!
//! Both walks apply the propagated-directory policy to each visited
//! directory and keep going past individual failures. One inaccessible
//! directory never prevents its siblings from being normalized; it only
//! makes the report partial.

use crate::acl::ObjectKind;
use crate::config::{Direction, PropagationConfig};
use crate::enforce::Enforcer;
use crate::store::StoreError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a walk touched.
#[derive(Debug, Default)]
pub struct PropagationReport {
    pub applied: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, StoreError)>,
}

impl PropagationReport {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.failed.is_empty()
    }

    /// Directories visited.
    pub fn visited(&self) -> usize {
        self.applied.len() + self.failed.len()
    }

    pub fn merge(&mut self, other: PropagationReport) {
        self.applied.extend(other.applied);
        self.failed.extend(other.failed);
    }

    fn has_failed(&self, dir: &Path) -> bool {
        self.failed.iter().any(|(p, _)| p == dir)
    }
}

pub struct Propagator {
    enforcer: Arc<Enforcer>,
    roots: Vec<PathBuf>,
    config: PropagationConfig,
}

impl Propagator {
    pub fn new(enforcer: Arc<Enforcer>, roots: Vec<PathBuf>, config: PropagationConfig) -> Self {
        Self {
            enforcer,
            roots,
            config,
        }
    }

    pub fn direction(&self) -> Direction {
        self.config.direction
    }

    /// Deepest watched root containing `path`.
    pub fn containing_root(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }

    /// Run the configured walks for an object that was just normalized.
    pub fn propagate(&self, path: &Path, kind: ObjectKind) -> PropagationReport {
        let direction = self.config.direction;
        let mut report = PropagationReport::default();

        if direction.ancestors() {
            report.merge(self.apply_to_ancestors(path));
        }
        if direction.descendants() {
            match kind {
                // The directory itself was already handled by the caller.
                ObjectKind::Directory => report.merge(self.walk(path, false)),
                ObjectKind::File => {
                    if let Some(parent) = path.parent() {
                        report.merge(self.walk(parent, !direction.ancestors()));
                    }
                }
            }
        }
        report
    }

    /// Apply the propagated policy to each parent of `leaf`, walking up until
    /// the watched root (excluded unless configured). Without a containing
    /// root only the immediate parent is visited.
    pub fn apply_to_ancestors(&self, leaf: &Path) -> PropagationReport {
        let mut report = PropagationReport::default();
        let root = self.containing_root(leaf);

        let mut current = leaf.parent();
        while let Some(dir) = current {
            match root {
                Some(root) if dir == root => {
                    if self.config.include_root {
                        self.apply_one(dir, &mut report);
                    }
                    break;
                }
                Some(root) if !dir.starts_with(root) => break,
                Some(_) => self.apply_one(dir, &mut report),
                None => {
                    self.apply_one(dir, &mut report);
                    break;
                }
            }
            current = dir.parent();
        }
        report
    }

    /// Apply the propagated policy to `dir` and every directory below it,
    /// depth-first. Symbolic links are not followed.
    pub fn apply_recursively_to_subtree(&self, dir: &Path) -> PropagationReport {
        self.walk(dir, true)
    }

    fn walk(&self, dir: &Path, include_self: bool) -> PropagationReport {
        let mut report = PropagationReport::default();
        let mut stack: Vec<(PathBuf, bool)> = vec![(dir.to_path_buf(), include_self)];

        while let Some((current, apply)) = stack.pop() {
            if apply {
                self.apply_one(&current, &mut report);
            }
            match self.enforcer.store().subdirectories(&current) {
                Ok(children) => {
                    // Reverse so the lexically first child is visited first.
                    stack.extend(children.into_iter().rev().map(|c| (c, true)));
                }
                Err(e) => {
                    if !report.has_failed(&current) {
                        self.enforcer
                            .audit()
                            .record(format!("Error listing {}: {}", current.display(), e));
                        tracing::warn!(dir = %current.display(), error = %e, "cannot list directory");
                        report.failed.push((current, e));
                    }
                }
            }
        }
        report
    }

    fn apply_one(&self, dir: &Path, report: &mut PropagationReport) {
        match self.enforcer.enforce_propagated(dir) {
            Ok(_) => report.applied.push(dir.to_path_buf()),
            Err(e) => {
                self.enforcer.audit().record(format!(
                    "Error applying permissions to {}: {}",
                    dir.display(),
                    e
                ));
                tracing::warn!(dir = %dir.display(), error = %e, "propagation step failed");
                report.failed.push((dir.to_path_buf(), e));
            }
        }
    }
}
