// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Watch loop - receives events, deduplicates them and normalizes each path
//! on a pool of worker threads.
//!
//! The dispatcher never blocks on a path: it only filters, claims and queues.
//! Readiness waits and store round trips happen on the workers, so up to
//! `watch.workers` paths can be waiting for their creators at once. Further
//! accepted paths wait in the queue.
//!
//! On stop, in-flight normalizations finish; queued paths that no worker has
//! started yet are dropped and counted.

mod event;
mod source;

pub use event::{EventKind, WatchEvent};
pub use source::{translate, NotifySource};

use crate::audit::AuditLog;
use crate::config::{WardenConfig, WatchConfig};
use crate::dedup::EventDeduplicator;
use crate::pipeline::{EventOutcome, Pipeline};
use crate::readiness::ReadinessGate;
use crate::store::PermissionStore;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// How often blocked receivers re-check the running flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors that keep the watch loop from starting.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watched root does not exist: {}", .0.display())]
    RootMissing(PathBuf),

    #[error("watched root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("notification backend error: {0}")]
    Notify(#[from] notify::Error),

    #[error("cannot watch {}: {source}", .root.display())]
    Register {
        root: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("cannot spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Every configured root must be an existing directory.
pub fn check_roots(config: &WatchConfig) -> Result<(), WatchError> {
    for root in &config.roots {
        match std::fs::metadata(root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(WatchError::NotADirectory(root.clone())),
            Err(_) => return Err(WatchError::RootMissing(root.clone())),
        }
    }
    Ok(())
}

/// Handle to stop a running [`WatchLoop`] from another thread.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request shutdown.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Watch loop statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    /// Events received from the source.
    pub received: u64,
    /// Rejected by the deduplicator.
    pub duplicates: u64,
    /// Event kind not enabled, or the audit log's own files.
    pub ignored: u64,
    /// Normalized, propagation included.
    pub normalized: u64,
    /// Normalized with at least one propagation failure.
    pub partial: u64,
    /// Still busy after every readiness attempt.
    pub timed_out: u64,
    /// Gone before it could be handled.
    pub vanished: u64,
    /// Store operation failed on the object itself.
    pub failed: u64,
    /// Accepted but never started because of shutdown.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    duplicates: AtomicU64,
    ignored: AtomicU64,
    normalized: AtomicU64,
    partial: AtomicU64,
    timed_out: AtomicU64,
    vanished: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn observe(&self, outcome: &EventOutcome) {
        let counter = match outcome {
            EventOutcome::Duplicate => &self.duplicates,
            EventOutcome::Ignored => &self.ignored,
            EventOutcome::TimedOut { .. } => &self.timed_out,
            EventOutcome::Vanished => &self.vanished,
            EventOutcome::StoreFailed(_) => &self.failed,
            EventOutcome::Normalized { .. } => {
                if outcome.is_partial() {
                    self.partial.fetch_add(1, Ordering::Relaxed);
                }
                &self.normalized
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WatchStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        WatchStats {
            received: load(&self.received),
            duplicates: load(&self.duplicates),
            ignored: load(&self.ignored),
            normalized: load(&self.normalized),
            partial: load(&self.partial),
            timed_out: load(&self.timed_out),
            vanished: load(&self.vanished),
            failed: load(&self.failed),
            dropped: load(&self.dropped),
        }
    }
}

/// Orchestrates deduplication, readiness, enforcement and propagation.
pub struct WatchLoop {
    watch: WatchConfig,
    pipeline: Arc<Pipeline>,
    dedup: Arc<EventDeduplicator>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl WatchLoop {
    pub fn new(config: &WardenConfig, store: Arc<dyn PermissionStore>, audit: Arc<AuditLog>) -> Self {
        Self::from_pipeline(config, Pipeline::new(config, store, audit))
    }

    /// Same as [`WatchLoop::new`] with a custom readiness gate.
    pub fn with_gate(
        config: &WardenConfig,
        store: Arc<dyn PermissionStore>,
        audit: Arc<AuditLog>,
        gate: ReadinessGate,
    ) -> Self {
        Self::from_pipeline(config, Pipeline::with_gate(config, store, audit, gate))
    }

    fn from_pipeline(config: &WardenConfig, pipeline: Pipeline) -> Self {
        Self {
            watch: config.watch.clone(),
            pipeline: Arc::new(pipeline),
            dedup: Arc::new(EventDeduplicator::new(&config.dedup)),
            running: Arc::new(AtomicBool::new(true)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WatchStats {
        self.counters.snapshot()
    }

    /// Decide whether `event` goes to a worker. `None` means it was claimed.
    fn admit(&self, event: &WatchEvent) -> Option<EventOutcome> {
        let enabled = match event.kind {
            EventKind::Created => true,
            EventKind::Modified => self.watch.reprocess_on_modify,
            EventKind::Renamed => self.watch.reprocess_on_rename,
        };
        if !enabled || self.pipeline.audit().owns_path(&event.path) {
            return Some(EventOutcome::Ignored);
        }
        if !self.dedup.should_process(&event.path) {
            return Some(EventOutcome::Duplicate);
        }
        None
    }

    /// Run until stopped or until the event source disconnects. Returns the
    /// final statistics.
    pub fn run(&self, events: Receiver<WatchEvent>) -> Result<WatchStats, WatchError> {
        let audit = self.pipeline.audit().clone();
        for root in &self.watch.roots {
            audit.record(format!("Started monitoring {}", root.display()));
        }
        tracing::info!(
            roots = self.watch.roots.len(),
            workers = self.watch.workers,
            "watch loop started"
        );

        let (work_tx, work_rx) = channel::unbounded::<PathBuf>();
        let mut workers = Vec::with_capacity(self.watch.workers.max(1));
        for id in 0..self.watch.workers.max(1) {
            let rx = work_rx.clone();
            let pipeline = self.pipeline.clone();
            let dedup = self.dedup.clone();
            let running = self.running.clone();
            let counters = self.counters.clone();
            let spawned = thread::Builder::new()
                .name(format!("aclwarden-worker-{}", id))
                .spawn(move || worker(rx, pipeline, dedup, running, counters));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    drop(work_tx);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(WatchError::Spawn(e));
                }
            }
        }

        let mut disconnected = false;
        while self.running.load(Ordering::SeqCst) {
            let event = match events.recv_timeout(POLL_INTERVAL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            };
            self.counters.received.fetch_add(1, Ordering::Relaxed);

            if let Some(rejected) = self.admit(&event) {
                tracing::debug!(
                    path = %event.path.display(),
                    kind = %event.kind,
                    outcome = ?rejected,
                    "event skipped"
                );
                self.counters.observe(&rejected);
                continue;
            }

            tracing::debug!(path = %event.path.display(), kind = %event.kind, "event accepted");
            if let Err(e) = work_tx.send(event.path) {
                // Only possible once every worker has exited.
                self.dedup.release(&e.0);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        drop(work_tx);
        if disconnected {
            tracing::info!("event source closed, draining queue");
        }
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }

        let dropped = work_rx.try_iter().count() as u64;
        self.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
        self.running.store(false, Ordering::SeqCst);

        let stats = self.stats();
        audit.record(format!(
            "Stopped monitoring: {} normalized, {} duplicates, {} timed out, {} failed, {} dropped",
            stats.normalized, stats.duplicates, stats.timed_out, stats.failed, stats.dropped
        ));
        tracing::info!(
            received = stats.received,
            normalized = stats.normalized,
            partial = stats.partial,
            dropped = stats.dropped,
            "watch loop stopped"
        );
        Ok(stats)
    }
}

fn worker(
    rx: Receiver<PathBuf>,
    pipeline: Arc<Pipeline>,
    dedup: Arc<EventDeduplicator>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    while running.load(Ordering::SeqCst) {
        let path = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(path) => path,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if !running.load(Ordering::SeqCst) {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            break;
        }

        let outcome = pipeline.normalize(&path);
        dedup.complete(&path);
        tracing::debug!(path = %path.display(), outcome = ?outcome, "event handled");
        counters.observe(&outcome);
    }
}
