// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Watch events as consumed by the watch loop.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

/// What happened to the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    /// Content written.
    Modified,
    /// Object arrived under this name by rename.
    Renamed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Created => f.write_str("created"),
            EventKind::Modified => f.write_str("modified"),
            EventKind::Renamed => f.write_str("renamed"),
        }
    }
}

/// One notification from the event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: EventKind,
    pub observed_at: DateTime<Utc>,
}

impl WatchEvent {
    pub fn new(path: impl Into<PathBuf>, kind: EventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            observed_at: Utc::now(),
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(path, EventKind::Created)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(path, EventKind::Modified)
    }

    pub fn renamed(path: impl Into<PathBuf>) -> Self {
        Self::new(path, EventKind::Renamed)
    }
}
