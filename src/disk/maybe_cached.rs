//! The "maybe-cached" shortcut (spec §4.2/§9): an optimistic set of filenames, built
//! once from a directory listing on a background thread, used to short-circuit disk
//! misses without touching the filesystem.
//!
//! Per the spec's open question, this crate accepts the documented divergence (files
//! added/removed by other processes after init can cause false negatives) and exposes an
//! explicit, caller-triggered [`MaybeCached::refresh`] rather than re-scanning
//! automatically.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;

/// `None` until the background scan completes (or if it failed); callers fall back to a
/// real `exists?` check while unset.
#[derive(Clone)]
pub struct MaybeCached {
    root: PathBuf,
    names: Arc<RwLock<Option<HashSet<String>>>>,
}

impl MaybeCached {
    /// Spawns the initial background scan immediately.
    pub fn new(root: PathBuf) -> Self {
        let this = Self {
            root,
            names: Arc::new(RwLock::new(None)),
        };
        this.refresh();
        this
    }

    /// Re-scans `root` on a background thread, replacing the current set once it
    /// completes. Not called automatically; the spec's open question leaves this to the
    /// caller (e.g. on a `diskCacheCleaned` notification, or periodically by policy).
    pub fn refresh(&self) {
        let root = self.root.clone();
        let names = self.names.clone();
        thread::Builder::new()
            .name("maybe-cached-scan".into())
            .spawn(move || {
                let scanned = scan_directory(&root);
                *names.write() = scanned;
            })
            .expect("spawn maybe-cached scan thread");
    }

    /// `None` means "don't trust this, fall back to a filesystem check".
    pub fn might_contain(&self, filename: &str) -> Option<bool> {
        self.names.read().as_ref().map(|set| set.contains(filename))
    }

    pub fn note_created(&self, filename: &str) {
        if let Some(set) = self.names.write().as_mut() {
            set.insert(filename.to_owned());
        }
    }

    pub fn note_removed(&self, filename: &str) {
        if let Some(set) = self.names.write().as_mut() {
            set.remove(filename);
        }
    }

    pub fn note_cleared(&self) {
        if let Some(set) = self.names.write().as_mut() {
            set.clear();
        }
    }
}

fn scan_directory(root: &std::path::Path) -> Option<HashSet<String>> {
    let entries = std::fs::read_dir(root).ok()?;
    let mut names = HashSet::new();
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with('.') {
                continue;
            }
            names.insert(name.to_owned());
        }
    }
    Some(names)
}
