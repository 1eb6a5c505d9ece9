// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Duplicate-notification suppression.
//!
//! Creating one file typically produces a burst of notifications (create,
//! several writes, attribute changes). The deduplicator admits the first one
//! and rejects the rest while the path is claimed.
//!
//! A claim is `Pending` from admission until the worker calls
//! [`EventDeduplicator::complete`]; pending claims never expire, so a slow
//! normalization cannot be overtaken by a late duplicate. Completed claims
//! expire after the retention window. Capacity is enforced by evicting the
//! least recently claimed completed entries.

use crate::config::DedupConfig;
use lru::LruCache;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Pending,
    Done(Instant),
}

/// Lock-guarded, time-bounded set of claimed paths.
pub struct EventDeduplicator {
    claims: Mutex<LruCache<PathBuf, Claim>>,
    retention: Duration,
    capacity: usize,
}

impl EventDeduplicator {
    pub fn new(config: &DedupConfig) -> Self {
        Self::with_limits(config.retention(), config.capacity)
    }

    pub fn with_limits(retention: Duration, capacity: usize) -> Self {
        Self {
            claims: Mutex::new(LruCache::unbounded()),
            retention,
            capacity: capacity.max(1),
        }
    }

    /// Atomic check-and-claim. Returns true exactly once per path until the
    /// claim is completed and has expired.
    pub fn should_process(&self, path: &Path) -> bool {
        self.should_process_at(path, Instant::now())
    }

    pub fn should_process_at(&self, path: &Path, now: Instant) -> bool {
        let mut claims = self.claims.lock();
        self.purge_expired(&mut claims, now);

        if let Some(claim) = claims.get(path) {
            match *claim {
                Claim::Pending => return false,
                Claim::Done(at) if now.saturating_duration_since(at) < self.retention => {
                    return false
                }
                Claim::Done(_) => {}
            }
        }

        claims.put(path.to_path_buf(), Claim::Pending);
        self.enforce_capacity(&mut claims);
        true
    }

    /// Mark handling of `path` as finished; the retention window starts now.
    pub fn complete(&self, path: &Path) {
        self.complete_at(path, Instant::now());
    }

    pub fn complete_at(&self, path: &Path, now: Instant) {
        if let Some(claim) = self.claims.lock().peek_mut(path) {
            *claim = Claim::Done(now);
        }
    }

    /// Drop the claim entirely, e.g. for an event that was never handled.
    pub fn release(&self, path: &Path) {
        self.claims.lock().pop(path);
    }

    /// Tracked paths, pending and completed.
    pub fn len(&self) -> usize {
        self.claims.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&self, claims: &mut LruCache<PathBuf, Claim>, now: Instant) {
        let expired: Vec<PathBuf> = claims
            .iter()
            .filter(|(_, claim)| match claim {
                Claim::Done(at) => now.saturating_duration_since(*at) >= self.retention,
                Claim::Pending => false,
            })
            .map(|(path, _)| path.clone())
            .collect();
        for path in expired {
            claims.pop(&path);
        }
    }

    fn enforce_capacity(&self, claims: &mut LruCache<PathBuf, Claim>) {
        while claims.len() > self.capacity {
            let victim = claims
                .iter()
                .rev()
                .find(|(_, claim)| matches!(claim, Claim::Done(_)))
                .map(|(path, _)| path.clone());
            match victim {
                Some(path) => {
                    claims.pop(&path);
                }
                None => {
                    tracing::debug!(
                        pending = claims.len(),
                        capacity = self.capacity,
                        "dedup capacity exceeded by pending claims"
                    );
                    break;
                }
            }
        }
    }
}
