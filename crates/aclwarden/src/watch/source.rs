// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OS notification source backed by `notify`.

use super::event::WatchEvent;
use super::WatchError;
use crossbeam::channel::Sender;
use notify::event::{ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;

/// Keeps the platform watcher alive and forwards its events.
///
/// Dropping it unregisters every root; the receiving end then sees the
/// channel disconnect once the last sender is gone.
pub struct NotifySource {
    _watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl NotifySource {
    /// Register every root and start forwarding to `tx`.
    pub fn start(
        roots: &[PathBuf],
        recursive: bool,
        tx: Sender<WatchEvent>,
    ) -> Result<Self, WatchError> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    for ev in translate(event) {
                        if tx.send(ev).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "watch error"),
            }
        })?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        for root in roots {
            watcher
                .watch(root, mode)
                .map_err(|source| WatchError::Register {
                    root: root.clone(),
                    source,
                })?;
            tracing::info!(root = %root.display(), recursive, "watching");
        }

        Ok(Self {
            _watcher: watcher,
            roots: roots.to_vec(),
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// Map one `notify` event onto zero or more watch events. Metadata-only
/// changes are dropped so our own chmod/chown never re-triggers a path.
pub fn translate(event: notify::Event) -> Vec<WatchEvent> {
    use notify::EventKind as K;

    match event.kind {
        K::Create(_) => event.paths.into_iter().map(WatchEvent::created).collect(),
        K::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.into_iter().map(WatchEvent::renamed).collect()
        }
        K::Modify(ModifyKind::Name(RenameMode::Both)) => event
            .paths
            .into_iter()
            .last()
            .map(WatchEvent::renamed)
            .into_iter()
            .collect(),
        K::Modify(ModifyKind::Name(RenameMode::Any)) => event
            .paths
            .into_iter()
            .filter(|p| p.exists())
            .map(WatchEvent::renamed)
            .collect(),
        K::Modify(ModifyKind::Data(_)) | K::Modify(ModifyKind::Any) => {
            event.paths.into_iter().map(WatchEvent::modified).collect()
        }
        _ => Vec::new(),
    }
}
