// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic

//! End-to-end watch loop scenarios.
//!
//! Objects exist on disk (so the real readiness probe can see them) while
//! their permissions live in a `MemoryStore` keyed by the same paths.

use aclwarden::{
    AuditLog, Direction, MemoryStore, ObjectKind, PermissionRule, PermissionStore, PolicyMode,
    Principal, Probe, ProbeResult, ReadinessGate, Rights, RuleSet, StoreError, WardenConfig,
    WatchEvent, WatchLoop,
};
use crossbeam::channel;
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Tree {
    temp_dir: TempDir,
    root: PathBuf,
    store: Arc<MemoryStore>,
}

impl Tree {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("watch");
        let store = Arc::new(MemoryStore::new());
        let tree = Self {
            temp_dir,
            root,
            store,
        };
        tree.dir("");
        tree
    }

    fn path(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    /// Directory on disk, writable by bob in the store.
    fn dir(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(&path).unwrap();
        self.store.insert_dir(
            path.clone(),
            RuleSet::new().with_rule(PermissionRule::allow("bob", Rights::MODIFY)),
        );
        path
    }

    /// File on disk with typical creator-granted rules in the store.
    fn file(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        fs::write(&path, b"payload").unwrap();
        self.store.insert_file(
            path.clone(),
            RuleSet::new()
                .with_owner("alice")
                .with_rule(PermissionRule::allow("SYSTEM", Rights::FULL_CONTROL))
                .with_rule(PermissionRule::allow("alice", Rights::MODIFY))
                .with_rule(PermissionRule::allow("Everyone", Rights::READ)),
        );
        path
    }

    fn audit_path(&self) -> PathBuf {
        self.temp_dir.path().join("logs").join("aclwarden.log")
    }

    fn config(&self) -> WardenConfig {
        WardenConfig::builder()
            .root(self.root.clone())
            .mode(PolicyMode::Subtractive)
            .allow_list(["SYSTEM"])
            .propagation(Direction::Ancestors)
            .workers(2)
            .audit_path(self.audit_path())
            .audit_console(false)
            .build()
    }

    fn audit(&self, config: &WardenConfig) -> Arc<AuditLog> {
        Arc::new(AuditLog::open(&config.audit))
    }

    fn audit_lines(&self) -> Vec<String> {
        fs::read_to_string(self.audit_path())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn stripped(&self, path: &Path) -> bool {
        self.store.rules(path).unwrap().rules.is_empty()
    }
}

struct NeverReady;

impl Probe for NeverReady {
    fn probe(&self, _: &Path) -> ProbeResult {
        ProbeResult::Busy
    }
}

#[test]
fn test_new_file_held_then_released_is_normalized() {
    let tree = Tree::new();
    tree.dir("a");
    let dir_b = tree.dir("a/b");
    let new_file = tree.file("a/b/new.txt");

    let config = tree.config();
    config.validate().unwrap();
    let watch_loop = WatchLoop::new(&config, tree.store.clone(), tree.audit(&config));

    // The creator still holds the file for 1.2 s.
    let holder = File::open(&new_file).unwrap();
    holder.lock_exclusive().unwrap();
    let release = thread::spawn(move || {
        thread::sleep(Duration::from_millis(1200));
        holder.unlock().unwrap();
        drop(holder);
        Instant::now()
    });

    let (tx, rx) = channel::unbounded();
    tx.send(WatchEvent::created(new_file.clone())).unwrap();
    tx.send(WatchEvent::created(new_file.clone())).unwrap();
    drop(tx);

    let stats = watch_loop.run(rx).unwrap();
    let finished = Instant::now();
    let released_at = release.join().unwrap();

    assert!(finished.saturating_duration_since(released_at) < Duration::from_secs(5));
    assert_eq!(stats.received, 2);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.normalized, 1);
    assert_eq!(stats.timed_out, 0);

    // Write access stripped from alice; SYSTEM and Everyone's read survive.
    let rules = tree.store.rules(&new_file).unwrap();
    assert_eq!(
        rules.rules,
        vec![
            PermissionRule::allow("SYSTEM", Rights::FULL_CONTROL),
            PermissionRule::allow("Everyone", Rights::READ),
        ]
    );
    assert!(rules.protected);
    assert_eq!(rules.owner, Some(Principal::new("Administrators")));

    // Ancestors up to, not including, the root.
    assert!(tree.stripped(&dir_b));
    assert!(tree.stripped(&tree.path("a")));
    assert!(!tree.stripped(&tree.root));

    let lines = tree.audit_lines();
    assert!(lines.len() >= 3);
    let text = lines.join("\n");
    assert!(text.contains(&format!("Processing new file: {}", new_file.display())));
    assert!(text.contains(&format!(
        "Removed rule from {}: alice Allow Modify",
        new_file.display()
    )));
    assert!(text.contains(&format!("Updated permissions for: {}", dir_b.display())));
    assert!(text.contains("Stopped monitoring"));
}

/// Slow reads of one directory, counting how many overlap.
struct SlowDir {
    inner: Arc<MemoryStore>,
    dir: PathBuf,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl PermissionStore for SlowDir {
    fn get_rules(&self, path: &Path, kind: ObjectKind) -> Result<RuleSet, StoreError> {
        if path != self.dir {
            return self.inner.get_rules(path, kind);
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(150));
        let rules = self.inner.get_rules(path, kind);
        self.active.fetch_sub(1, Ordering::SeqCst);
        rules
    }

    fn set_rules(&self, path: &Path, kind: ObjectKind, rules: &RuleSet) -> Result<(), StoreError> {
        self.inner.set_rules(path, kind, rules)
    }

    fn get_owner(&self, path: &Path) -> Result<Principal, StoreError> {
        self.inner.get_owner(path)
    }

    fn set_owner(&self, path: &Path, owner: &Principal) -> Result<(), StoreError> {
        self.inner.set_owner(path, owner)
    }

    fn object_kind(&self, path: &Path) -> Result<ObjectKind, StoreError> {
        self.inner.object_kind(path)
    }
}

#[test]
fn test_shared_ancestor_is_never_changed_by_two_workers_at_once() {
    let tree = Tree::new();
    let dir_a = tree.dir("a");
    let x = tree.file("a/x.txt");
    let y = tree.file("a/y.txt");
    let store = Arc::new(SlowDir {
        inner: tree.store.clone(),
        dir: dir_a.clone(),
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });

    let config = tree.config();
    assert_eq!(config.watch.workers, 2);
    let watch_loop = WatchLoop::new(&config, store.clone(), tree.audit(&config));

    let (tx, rx) = channel::unbounded();
    tx.send(WatchEvent::created(x)).unwrap();
    tx.send(WatchEvent::created(y)).unwrap();
    drop(tx);

    let stats = watch_loop.run(rx).unwrap();
    assert_eq!(stats.normalized, 2);
    assert_eq!(store.peak.load(Ordering::SeqCst), 1);
    assert!(tree.stripped(&dir_a));
}

#[test]
fn test_busy_object_times_out_and_is_left_alone() {
    let tree = Tree::new();
    let held = tree.file("held.txt");

    let mut config = tree.config();
    config.readiness.max_attempts = 3;
    config.readiness.interval_ms = 20;
    let gate = ReadinessGate::with_probe(NeverReady, &config.readiness);
    let watch_loop = WatchLoop::with_gate(&config, tree.store.clone(), tree.audit(&config), gate);

    let (tx, rx) = channel::unbounded();
    tx.send(WatchEvent::created(held.clone())).unwrap();
    drop(tx);

    let stats = watch_loop.run(rx).unwrap();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.normalized, 0);
    assert_eq!(tree.store.write_count(), 0);
    assert_eq!(tree.store.rules(&held).unwrap().rules.len(), 3);

    let text = tree.audit_lines().join("\n");
    assert!(text.contains(&format!(
        "Gave up on {} after 3 attempts",
        held.display()
    )));
}

#[test]
fn test_store_failure_does_not_stop_the_loop() {
    let tree = Tree::new();
    let locked = tree.file("locked.txt");
    let fine = tree.file("fine.txt");
    tree.store.deny(locked.clone());

    let config = tree.config();
    let watch_loop = WatchLoop::new(&config, tree.store.clone(), tree.audit(&config));

    let (tx, rx) = channel::unbounded();
    tx.send(WatchEvent::created(locked.clone())).unwrap();
    tx.send(WatchEvent::created(fine.clone())).unwrap();
    drop(tx);

    let stats = watch_loop.run(rx).unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.normalized, 1);
    assert_eq!(
        tree.store.rules(&fine).unwrap().owner,
        Some(Principal::new("Administrators"))
    );

    let text = tree.audit_lines().join("\n");
    assert!(text.contains(&format!(
        "Error applying permissions to {}",
        locked.display()
    )));
}

#[test]
fn test_stop_drops_queued_events() {
    let tree = Tree::new();
    let files: Vec<PathBuf> = (0..5)
        .map(|i| tree.file(&format!("queued-{}.txt", i)))
        .collect();

    let mut config = tree.config();
    config.watch.workers = 1;
    config.readiness.max_attempts = 3;
    config.readiness.interval_ms = 200;
    let gate = ReadinessGate::with_probe(NeverReady, &config.readiness);
    let watch_loop = Arc::new(WatchLoop::with_gate(
        &config,
        tree.store.clone(),
        tree.audit(&config),
        gate,
    ));
    let stop = watch_loop.stop_handle();

    let (tx, rx) = channel::unbounded();
    for file in &files {
        tx.send(WatchEvent::created(file.clone())).unwrap();
    }

    let runner = {
        let watch_loop = watch_loop.clone();
        thread::spawn(move || watch_loop.run(rx).unwrap())
    };
    thread::sleep(Duration::from_millis(100));
    stop.stop();
    let stats = runner.join().unwrap();
    drop(tx);

    // the in-flight path finishes, the rest are never started
    assert_eq!(stats.received, 5);
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.dropped, 4);
    assert!(tree
        .audit_lines()
        .iter()
        .any(|l| l.contains("Stopped monitoring") && l.contains("4 dropped")));
}

#[test]
fn test_modify_events_only_when_enabled() {
    let tree = Tree::new();
    let file = tree.file("edited.txt");

    let mut config = tree.config();
    let (tx, rx) = channel::unbounded();
    tx.send(WatchEvent::modified(file.clone())).unwrap();
    drop(tx);
    let stats = WatchLoop::new(&config, tree.store.clone(), tree.audit(&config))
        .run(rx)
        .unwrap();
    assert_eq!(stats.ignored, 1);
    assert_eq!(tree.store.write_count(), 0);

    config.watch.reprocess_on_modify = true;
    let (tx, rx) = channel::unbounded();
    tx.send(WatchEvent::modified(file.clone())).unwrap();
    drop(tx);
    let stats = WatchLoop::new(&config, tree.store.clone(), tree.audit(&config))
        .run(rx)
        .unwrap();
    assert_eq!(stats.normalized, 1);
}

#[test]
fn test_audit_log_events_are_ignored() {
    let tree = Tree::new();
    let config = tree.config();
    let audit = tree.audit(&config);
    let watch_loop = WatchLoop::new(&config, tree.store.clone(), audit.clone());

    let (tx, rx) = channel::unbounded();
    tx.send(WatchEvent::created(audit.path().to_path_buf())).unwrap();
    drop(tx);

    let stats = watch_loop.run(rx).unwrap();
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.normalized, 0);
}

#[test]
fn test_notify_source_reports_creation() {
    use aclwarden::{EventKind, NotifySource};

    let temp_dir = TempDir::new().unwrap();
    let (tx, rx) = channel::unbounded();
    let _source = NotifySource::start(&[temp_dir.path().to_path_buf()], true, tx).unwrap();

    fs::write(temp_dir.path().join("fresh.txt"), b"x").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = false;
    while Instant::now() < deadline {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) if event.path.ends_with("fresh.txt") && event.kind == EventKind::Created => {
                seen = true;
                break;
            }
            _ => {}
        }
    }
    assert!(seen, "no creation event within 5 s");
}
