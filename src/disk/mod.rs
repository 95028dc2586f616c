//! `DiskStore`: a persistent bytes-store keyed by filename hash, with metadata riding
//! the file's `atime`/`mtime` (spec §3/§4.2/§6).
//!
//! This replaces the reference crate's sqlite-backed `L2` layer
//! (`src/image/cache/global/{mod,db}.rs`) with flat files, since the spec calls for
//! filesystem-attribute metadata rather than a database; the overall shape (load / store
//! / garbage-collect as separate concerns, a private executor owning the blocking I/O) is
//! kept from that module.

pub mod metadata;
pub mod maybe_cached;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::SystemTime;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::clock::{SystemClock, TimeSource};
use crate::config::DiskCacheOptions;
use crate::error::CacheError;
use crate::expiration::{ExpirationExtending, ExpirationPolicy};
use maybe_cached::MaybeCached;

/// A fully-resolved on-disk filename, computed per spec §4.2's deterministic rule
/// (testable property 10): `(key, forced_ext, path_extension, uses_hashed_filename,
/// auto_ext_after_hashed_filename)` in, filename out.
pub fn cache_file_name(key: &str, forced_ext: Option<&str>, options: &DiskCacheOptions) -> String {
    let ext = forced_ext
        .map(str::to_owned)
        .or_else(|| options.path_extension.clone())
        .or_else(|| {
            if options.auto_ext_after_hashed_filename {
                Path::new(key)
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(str::to_owned)
            } else {
                None
            }
        });

    let stem = if options.uses_hashed_filename {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex_encode(&hasher.finalize())
    } else {
        key.to_owned()
    };

    match ext {
        Some(ext) if !ext.is_empty() => format!("{stem}.{ext}"),
        _ => stem,
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String never fails");
    }
    out
}

struct EntrySnapshot {
    filename: String,
    meta: metadata::FileMetadata,
}

/// Persistent, filesystem-attribute-backed bytes cache for one named root.
pub struct DiskStore {
    root: PathBuf,
    options: DiskCacheOptions,
    clock: Arc<dyn TimeSource>,
    maybe_cached: MaybeCached,
    /// Guards every blocking filesystem mutation, standing in for the reference
    /// crate's "private serial executor" (spec §4.2 concurrency).
    io_lock: Mutex<()>,
}

impl DiskStore {
    pub fn new(name: &str, options: DiskCacheOptions, base_cache_dir: Option<PathBuf>) -> io::Result<Self> {
        Self::with_clock(name, options, base_cache_dir, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: &str,
        options: DiskCacheOptions,
        base_cache_dir: Option<PathBuf>,
        clock: Arc<dyn TimeSource>,
    ) -> io::Result<Self> {
        let root = match (&options.cache_path_hook, base_cache_dir) {
            (Some(hook), _) => hook(name),
            (None, Some(base)) => base.join(format!("com.picvault.ImageCache.{name}")),
            (None, None) => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(format!("com.picvault.ImageCache.{name}")),
        };
        fs::create_dir_all(&root)?;
        let maybe_cached = MaybeCached::new(root.clone());
        Ok(Self {
            root,
            options,
            clock,
            maybe_cached,
            io_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn cache_file_url(&self, key: &str, forced_ext: Option<&str>) -> PathBuf {
        self.path_for(&cache_file_name(key, forced_ext, &self.options))
    }

    /// Writes `bytes` under `key`, setting both filesystem-attribute fields. On a
    /// missing-directory write failure, recreates the directory once and retries once.
    pub fn store(
        &self,
        key: &str,
        bytes: &[u8],
        expiration: Option<ExpirationPolicy>,
        forced_ext: Option<&str>,
    ) -> Result<(), CacheError> {
        let start = std::time::Instant::now();
        let _guard = self.io_lock.lock();
        let filename = cache_file_name(key, forced_ext, &self.options);
        let path = self.path_for(&filename);

        let write_result = fs::write(&path, bytes).or_else(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                fs::create_dir_all(&self.root).map_err(|source| CacheError::CannotCreateDirectory {
                    path: self.root.clone(),
                    source,
                })?;
                fs::write(&path, bytes)
            } else {
                Err(err)
            }
        });

        if let Err(source) = write_result {
            let _ = fs::remove_file(&path);
            return Err(CacheError::CannotCreateCacheFile {
                path,
                key: key.to_owned(),
                source,
            });
        }

        let now = self.clock.now();
        let policy = expiration.unwrap_or(self.options.default_expiration);
        let estimated_expiration = policy.estimated_expiration(now).unwrap_or(
            now + std::time::Duration::from_secs(100 * 365 * 24 * 60 * 60),
        );

        if let Err(source) = metadata::set_attributes(&path, now, estimated_expiration) {
            let _ = fs::remove_file(&path);
            return Err(CacheError::CannotSetCacheFileAttribute { path, source });
        }

        self.maybe_cached.note_created(&filename);
        crate::metrics::Tag::CacheDiskWrite.record(start.elapsed());
        Ok(())
    }

    /// Reads bytes for `key` at `reference_date`, applying `extend` to the stored
    /// expiration on a hit.
    pub fn value(
        &self,
        key: &str,
        reference_date: Option<SystemTime>,
        extend: ExpirationExtending,
        forced_ext: Option<&str>,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        let reference = reference_date.unwrap_or_else(|| self.clock.now());
        let filename = cache_file_name(key, forced_ext, &self.options);

        if self.maybe_cached.might_contain(&filename) == Some(false) {
            return Ok(None);
        }

        let start = std::time::Instant::now();
        let _guard = self.io_lock.lock();
        let path = self.path_for(&filename);
        let meta = match metadata::read_attributes(&path) {
            Ok(meta) => meta,
            Err(_) => return Ok(None),
        };
        if metadata::is_expired(&meta, reference) {
            return Ok(None);
        }

        let bytes = fs::read(&path).map_err(|source| CacheError::CannotLoadDataFromDisk {
            path: path.clone(),
            source,
        })?;

        self.apply_extend(&path, &meta, extend, reference);
        crate::metrics::Tag::CacheDiskRead.record(start.elapsed());
        Ok(Some(bytes))
    }

    fn apply_extend(
        &self,
        path: &Path,
        meta: &metadata::FileMetadata,
        extend: ExpirationExtending,
        reference: SystemTime,
    ) {
        let new_expiration = match extend {
            ExpirationExtending::None => return,
            ExpirationExtending::CacheTime => {
                let ttl = metadata::original_ttl(meta);
                reference + ttl
            }
            ExpirationExtending::Expiration(policy) => policy
                .estimated_expiration(reference)
                .unwrap_or(meta.estimated_expiration),
        };
        let _ = metadata::set_attributes(path, reference, new_expiration);
    }

    /// No-read existence check, consulting the maybe-cached shortcut first.
    pub fn is_cached(&self, key: &str, reference_date: Option<SystemTime>, forced_ext: Option<&str>) -> bool {
        let filename = cache_file_name(key, forced_ext, &self.options);
        if let Some(hit) = self.maybe_cached.might_contain(&filename) {
            if !hit {
                return false;
            }
        }
        let reference = reference_date.unwrap_or_else(|| self.clock.now());
        let path = self.path_for(&filename);
        match metadata::read_attributes(&path) {
            Ok(meta) => !metadata::is_expired(&meta, reference),
            Err(_) => false,
        }
    }

    pub fn remove(&self, key: &str, forced_ext: Option<&str>) {
        let _guard = self.io_lock.lock();
        let filename = cache_file_name(key, forced_ext, &self.options);
        let path = self.path_for(&filename);
        let _ = fs::remove_file(&path);
        self.maybe_cached.note_removed(&filename);
    }

    pub fn remove_all(&self) {
        let _guard = self.io_lock.lock();
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                let _ = fs::remove_file(entry.path());
            }
        }
        self.maybe_cached.note_cleared();
    }

    fn list_entries(&self) -> Vec<EntrySnapshot> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|entry| {
                let file_type = entry.file_type().ok()?;
                if file_type.is_dir() {
                    return None;
                }
                let filename = entry.file_name().to_str()?.to_owned();
                if filename.starts_with('.') {
                    return None;
                }
                let meta = metadata::read_attributes(&entry.path()).ok()?;
                Some(EntrySnapshot { filename, meta })
            })
            .collect()
    }

    /// Walks the directory, removing every entry whose estimated expiration is before
    /// `reference`. Returns the removed filenames.
    pub fn remove_expired_values(&self, reference_date: Option<SystemTime>) -> Vec<String> {
        let reference = reference_date.unwrap_or_else(|| self.clock.now());
        let _guard = self.io_lock.lock();
        let mut removed = Vec::new();
        for entry in self.list_entries() {
            if metadata::is_expired(&entry.meta, reference) {
                let _ = fs::remove_file(self.path_for(&entry.filename));
                self.maybe_cached.note_removed(&entry.filename);
                removed.push(entry.filename);
            }
        }
        removed
    }

    /// If `size_limit` is set and total size exceeds it, removes least-recently-used
    /// entries (by `last_access`, ascending) until total size is at most half the limit.
    /// Returns the removed filenames.
    pub fn remove_size_exceeded_values(&self) -> Vec<String> {
        if self.options.size_limit == 0 {
            return Vec::new();
        }
        let _guard = self.io_lock.lock();
        let mut entries = self.list_entries();
        let total: u64 = entries.iter().map(|e| e.meta.size).sum();
        if total <= self.options.size_limit {
            return Vec::new();
        }

        entries.sort_by_key(|e| e.meta.last_access);
        let target = self.options.size_limit / 2;
        let mut remaining = total;
        let mut removed = Vec::new();
        for entry in entries {
            if remaining <= target {
                break;
            }
            let _ = fs::remove_file(self.path_for(&entry.filename));
            self.maybe_cached.note_removed(&entry.filename);
            remaining = remaining.saturating_sub(entry.meta.size);
            removed.push(entry.filename);
        }
        removed
    }

    pub fn total_size(&self) -> u64 {
        let _guard = self.io_lock.lock();
        self.list_entries().iter().map(|e| e.meta.size).sum()
    }
}

/// Spawns a background thread that periodically calls `remove_expired_values` on a
/// weakly-held `DiskStore`, stopping once the store is dropped.
pub fn spawn_expiry_sweep(store: Arc<DiskStore>, interval: std::time::Duration) -> thread::JoinHandle<()> {
    let weak: Weak<DiskStore> = Arc::downgrade(&store);
    drop(store);
    thread::Builder::new()
        .name("disk-store-sweep".into())
        .spawn(move || loop {
            thread::sleep(interval);
            match weak.upgrade() {
                Some(store) => {
                    store.remove_expired_values(None);
                }
                None => break,
            }
        })
        .expect("spawn disk store sweep thread")
}
