// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Readiness gate: waits until a new object is no longer held by its creator.
//!
//! A file that was just created is usually still open for writing. The gate
//! probes it with an exclusive open at a fixed interval and gives up after a
//! fixed number of attempts. Directories are ready immediately.

use crate::config::ReadinessConfig;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Duration;

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Exclusive access obtained (and released).
    Ready,
    /// Still held by someone else.
    Busy,
    /// Object no longer exists.
    Missing,
}

/// Outcome of [`ReadinessGate::wait_until_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
    Vanished { attempts: u32 },
}

impl Readiness {
    pub fn attempts(&self) -> u32 {
        match *self {
            Readiness::Ready { attempts }
            | Readiness::TimedOut { attempts }
            | Readiness::Vanished { attempts } => attempts,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// Single readiness check.
pub trait Probe: Send + Sync {
    fn probe(&self, path: &Path) -> ProbeResult;
}

/// Opens the object for reading without sharing and closes it again.
///
/// On Windows the share mode is 0, so the open fails while any other handle
/// is open. Elsewhere a non-blocking exclusive advisory lock is taken, which
/// fails while the creator holds a lock on the file.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExclusiveOpenProbe;

impl ExclusiveOpenProbe {
    #[cfg(windows)]
    fn open_exclusive(path: &Path) -> io::Result<File> {
        use std::os::windows::fs::OpenOptionsExt;
        fs::OpenOptions::new().read(true).share_mode(0).open(path)
    }

    #[cfg(not(windows))]
    fn open_exclusive(path: &Path) -> io::Result<File> {
        use fs2::FileExt;
        let file = File::open(path)?;
        file.try_lock_exclusive()?;
        file.unlock()?;
        Ok(file)
    }
}

impl Probe for ExclusiveOpenProbe {
    fn probe(&self, path: &Path) -> ProbeResult {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() || meta.file_type().is_symlink() => {
                return ProbeResult::Ready
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return ProbeResult::Missing,
            Err(_) => return ProbeResult::Busy,
        }

        match Self::open_exclusive(path) {
            Ok(_) => ProbeResult::Ready,
            Err(e) if e.kind() == io::ErrorKind::NotFound => ProbeResult::Missing,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                // Unreadable: nothing to wait for, let the store decide.
                tracing::debug!(path = %path.display(), "probe denied, treating as released");
                ProbeResult::Ready
            }
            Err(e) => {
                tracing::trace!(path = %path.display(), error = %e, "object busy");
                ProbeResult::Busy
            }
        }
    }
}

/// Bounded retry loop around a [`Probe`].
pub struct ReadinessGate {
    probe: Box<dyn Probe>,
    max_attempts: u32,
    interval: Duration,
}

impl ReadinessGate {
    pub fn new(config: &ReadinessConfig) -> Self {
        Self::with_probe(ExclusiveOpenProbe, config)
    }

    pub fn with_probe(probe: impl Probe + 'static, config: &ReadinessConfig) -> Self {
        Self {
            probe: Box::new(probe),
            max_attempts: config.max_attempts.max(1),
            interval: config.interval(),
        }
    }

    /// Probe until ready, vanished, or out of attempts. Blocks the calling
    /// thread between attempts; there is no sleep after the last one.
    pub fn wait_until_ready(&self, path: &Path) -> Readiness {
        for attempt in 1..=self.max_attempts {
            match self.probe.probe(path) {
                ProbeResult::Ready => return Readiness::Ready { attempts: attempt },
                ProbeResult::Missing => return Readiness::Vanished { attempts: attempt },
                ProbeResult::Busy if attempt < self.max_attempts => {
                    std::thread::sleep(self.interval)
                }
                ProbeResult::Busy => {}
            }
        }
        Readiness::TimedOut {
            attempts: self.max_attempts,
        }
    }
}
