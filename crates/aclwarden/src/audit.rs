// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Append-only audit trail with size-based rotation.
//!
//! Every record is one line, `YYYY-MM-DD HH:MM:SS - message`, flushed before
//! [`AuditLog::record`] returns. When the active file has reached the size
//! ceiling it is renamed to `<stem>_<YYYYMMDD_HHMMSS>.<ext>` and a fresh file
//! is started at the original path.
//!
//! Rotation and append form one critical section: an in-process mutex plus an
//! exclusive lock on a `<file>.lock` sidecar, so several daemons sharing one
//! log never rotate concurrently. A writer that finds the active file changed
//! underneath it (rotated or appended by another process) reopens it first.
//!
//! Failures never propagate. They are reported to a fallback sink (stderr by
//! default) together with the record that could not be written.

use crate::config::AuditConfig;
use chrono::{DateTime, Local};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Record timestamp format.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Archive suffix format.
pub const ARCHIVE_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Audit write errors, reported to the fallback sink.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("cannot open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot rotate {} to {}: {source}", .from.display(), .to.display())]
    Rotate {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

type Fallback = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct ActiveFile {
    file: Option<File>,
    size: u64,
    sidecar: Option<File>,
}

/// Rotating audit log shared by all workers.
pub struct AuditLog {
    path: PathBuf,
    lock_path: PathBuf,
    max_bytes: u64,
    keep_archives: usize,
    console: bool,
    state: Mutex<ActiveFile>,
    fallback: Fallback,
    records: AtomicU64,
    failures: AtomicU64,
}

impl AuditLog {
    /// Open (or create) the log. Never fails: if the file cannot be opened
    /// now, every record goes to the fallback sink until it can.
    pub fn open(config: &AuditConfig) -> Self {
        let path = absolute(&config.path);
        let lock_path = sidecar_path(&path);
        let log = Self {
            path,
            lock_path,
            max_bytes: config.max_bytes.max(1),
            keep_archives: config.keep_archives,
            console: config.console,
            state: Mutex::new(ActiveFile::default()),
            fallback: Box::new(|line| eprintln!("{}", line)),
            records: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        };

        if let Some(parent) = log.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                log.report(&format!(
                    "Logging error: cannot create {}: {}",
                    parent.display(),
                    e
                ));
            }
        }
        {
            let mut state = log.state.lock();
            if let Err(e) = log.reopen(&mut state) {
                log.report(&format!("Logging error: {}", e));
            }
        }
        log
    }

    /// Replace the fallback sink (stderr by default).
    pub fn with_fallback(mut self, fallback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.fallback = Box::new(fallback);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written to disk.
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    /// Records that went to the fallback sink instead.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Whether `path` is the log itself, its lock file or one of its archives.
    /// Relative paths are resolved against the working directory first.
    pub fn owns_path(&self, path: &Path) -> bool {
        let path = absolute(path);
        let path = path.as_path();
        if path == self.path || path == self.lock_path {
            return true;
        }
        if path.parent() != self.path.parent() {
            return false;
        }
        let (stem, ext) = split_name(&self.path);
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| is_archive_name(&stem, &ext, name))
    }

    /// Append one record.
    pub fn record(&self, message: impl AsRef<str>) {
        self.record_with(message.as_ref(), Local::now);
    }

    #[cfg(test)]
    fn record_at(&self, message: &str, now: DateTime<Local>) {
        self.record_with(message, || now);
    }

    /// The clock is read under the state lock so lines land in time order.
    fn record_with(&self, message: &str, clock: impl FnOnce() -> DateTime<Local>) {
        if self.console {
            tracing::info!(target: "aclwarden::audit", "{}", message);
        }

        let mut state = self.state.lock();
        let now = clock();
        let line = format!("{} - {}", now.format(TIMESTAMP_FORMAT), message);
        match self.write_locked(&mut state, &line, now) {
            Ok(()) => {
                self.records.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                // Force a reopen on the next record.
                state.file = None;
                drop(state);
                self.report(&format!("Logging error: {}", e));
                self.report(&line);
            }
        }
    }

    fn report(&self, line: &str) {
        (self.fallback)(line);
    }

    fn write_locked(
        &self,
        state: &mut ActiveFile,
        line: &str,
        now: DateTime<Local>,
    ) -> Result<(), AuditError> {
        self.lock_sidecar(state)?;
        let result = self.append(state, line, now);
        if let Some(sidecar) = &state.sidecar {
            let _ = sidecar.unlock();
        }
        result
    }

    fn append(
        &self,
        state: &mut ActiveFile,
        line: &str,
        now: DateTime<Local>,
    ) -> Result<(), AuditError> {
        if self.changed_on_disk(state) {
            self.reopen(state)?;
        }
        if state.size >= self.max_bytes {
            self.rotate(state, now)?;
        }

        let write_err = |source| AuditError::Write {
            path: self.path.clone(),
            source,
        };
        if state.file.is_none() {
            self.reopen(state)?;
        }
        let file = state.file.as_mut().ok_or_else(|| {
            write_err(io::Error::new(io::ErrorKind::Other, "log file not open"))
        })?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf).map_err(write_err)?;
        file.flush().map_err(write_err)?;
        state.size += buf.len() as u64;
        Ok(())
    }

    fn lock_sidecar(&self, state: &mut ActiveFile) -> Result<(), AuditError> {
        let lock_err = |source| AuditError::Lock {
            path: self.lock_path.clone(),
            source,
        };
        if state.sidecar.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&self.lock_path)
                .map_err(lock_err)?;
            state.sidecar = Some(file);
        }
        match &state.sidecar {
            Some(sidecar) => sidecar.lock_exclusive().map_err(lock_err),
            None => Ok(()),
        }
    }

    /// True if the active path no longer refers to the file we hold or its
    /// length differs from what we wrote.
    fn changed_on_disk(&self, state: &ActiveFile) -> bool {
        let Some(file) = &state.file else {
            return true;
        };
        let on_disk = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(_) => return true,
        };
        if on_disk.len() != state.size {
            return true;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            match file.metadata() {
                Ok(held) => held.ino() != on_disk.ino() || held.dev() != on_disk.dev(),
                Err(_) => true,
            }
        }
        #[cfg(not(unix))]
        {
            let _ = file;
            false
        }
    }

    fn reopen(&self, state: &mut ActiveFile) -> Result<(), AuditError> {
        state.file = None;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| AuditError::Open {
                path: self.path.clone(),
                source,
            })?;
        state.size = file
            .metadata()
            .map_err(|source| AuditError::Open {
                path: self.path.clone(),
                source,
            })?
            .len();
        state.file = Some(file);
        Ok(())
    }

    fn rotate(&self, state: &mut ActiveFile, now: DateTime<Local>) -> Result<(), AuditError> {
        state.file = None;
        let archive = archive_path(&self.path, now);
        fs::rename(&self.path, &archive).map_err(|source| AuditError::Rotate {
            from: self.path.clone(),
            to: archive.clone(),
            source,
        })?;
        tracing::debug!(archive = %archive.display(), "audit log rotated");
        self.reopen(state)?;
        self.prune_archives();
        Ok(())
    }

    fn prune_archives(&self) {
        if self.keep_archives == 0 {
            return;
        }
        let archives = list_archives(&self.path);
        if archives.len() <= self.keep_archives {
            return;
        }
        for old in &archives[..archives.len() - self.keep_archives] {
            if let Err(e) = fs::remove_file(old) {
                self.report(&format!(
                    "Logging error: cannot remove archive {}: {}",
                    old.display(),
                    e
                ));
            }
        }
    }
}

/// `path` joined onto the working directory when relative. `.` components
/// drop out when paths are compared.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Stem and extension (with its dot, or empty).
fn split_name(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

/// First free `<stem>_<YYYYMMDD_HHMMSS>[_N]<ext>` next to `base`.
fn archive_path(base: &Path, now: DateTime<Local>) -> PathBuf {
    let (stem, ext) = split_name(base);
    let stamp = now.format(ARCHIVE_FORMAT);
    let candidate = base.with_file_name(format!("{}_{}{}", stem, stamp, ext));
    if !candidate.exists() {
        return candidate;
    }
    let mut n = 1u32;
    loop {
        let candidate = base.with_file_name(format!("{}_{}_{}{}", stem, stamp, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn is_archive_name(stem: &str, ext: &str, name: &str) -> bool {
    let Some(middle) = name
        .strip_prefix(stem)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_suffix(ext))
    else {
        return false;
    };
    let mut parts = middle.split('_');
    let date_ok = parts
        .next()
        .is_some_and(|p| p.len() == 8 && p.bytes().all(|b| b.is_ascii_digit()));
    let time_ok = parts
        .next()
        .is_some_and(|p| p.len() == 6 && p.bytes().all(|b| b.is_ascii_digit()));
    let suffix_ok = match parts.next() {
        None => true,
        Some(n) => !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()),
    };
    date_ok && time_ok && suffix_ok && parts.next().is_none()
}

/// Archives of `base`, oldest first.
pub fn list_archives(base: &Path) -> Vec<PathBuf> {
    let (stem, ext) = split_name(base);
    let dir = match base.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir.to_path_buf(),
        None => PathBuf::from("."),
    };
    let Ok(entries) = fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut archives: Vec<(String, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            is_archive_name(&stem, &ext, &name).then(|| (name, entry.path()))
        })
        .collect();
    archives.sort_by(|a, b| archive_order(&a.0).cmp(&archive_order(&b.0)));
    archives.into_iter().map(|(_, path)| path).collect()
}

/// Sort key: timestamp, then collision counter (unsuffixed first).
fn archive_order(name: &str) -> (String, u32) {
    let stem_end = name.rfind('.').unwrap_or(name.len());
    let body = &name[..stem_end];
    let parts: Vec<&str> = body.rsplit('_').collect();
    // parts is reversed: [suffix?, time, date, ...]
    match parts.as_slice() {
        [n, time, date, ..] if n.len() != 6 => {
            (format!("{}{}", date, time), n.parse().unwrap_or(0))
        }
        [time, date, ..] => (format!("{}{}", date, time), 0),
        _ => (name.to_string(), 0),
    }
}
