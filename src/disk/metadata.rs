//! Filesystem-attribute metadata (spec §3/§4.2/§6).
//!
//! True OS birthtime isn't settable cross-platform, so "creation date" is repurposed
//! onto `atime` (last access) and "modification date" onto `mtime` (estimated
//! expiration), both writable via `filetime`. This mirrors the reference crate's own
//! "repurpose an inode attribute rather than invent a sidecar format" approach to cache
//! metadata (`src/image/cache/global/db.rs` stores analogous fields in SQLite columns;
//! here they ride the inode instead, per the on-disk layout this crate targets).

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use filetime::FileTime;

/// The two attributes persisted per cache file.
#[derive(Debug, Clone, Copy)]
pub struct FileMetadata {
    /// Repurposed as "last access time".
    pub last_access: SystemTime,
    /// Repurposed as "estimated expiration time".
    pub estimated_expiration: SystemTime,
    pub size: u64,
}

/// Sets `atime` to `last_access` and `mtime` to `estimated_expiration`.
pub fn set_attributes(
    path: &Path,
    last_access: SystemTime,
    estimated_expiration: SystemTime,
) -> std::io::Result<()> {
    let atime = FileTime::from_system_time(last_access);
    let mtime = FileTime::from_system_time(estimated_expiration);
    filetime::set_file_times(path, atime, mtime)
}

/// Reads both attributes plus the file size. Readers tolerate missing/unreadable
/// attributes by treating the entry as expired (spec §6): callers should interpret an
/// `Err` here as "expired", not propagate it verbatim.
pub fn read_attributes(path: &Path) -> std::io::Result<FileMetadata> {
    let meta = fs::metadata(path)?;
    let last_access = filetime_to_system_time(FileTime::from_last_access_time(&meta));
    let estimated_expiration =
        filetime_to_system_time(FileTime::from_last_modification_time(&meta));
    Ok(FileMetadata {
        last_access,
        estimated_expiration,
        size: meta.len(),
    })
}

fn filetime_to_system_time(ft: FileTime) -> SystemTime {
    let seconds = ft.unix_seconds();
    let nanos = ft.nanoseconds();
    if seconds >= 0 {
        SystemTime::UNIX_EPOCH + Duration::new(seconds as u64, nanos)
    } else {
        SystemTime::UNIX_EPOCH - Duration::new((-seconds) as u64, 0) + Duration::from_nanos(u64::from(nanos))
    }
}

/// The original TTL, recovered as `estimated_expiration - last_access` (spec §4.2's
/// "cache-time" extend recomputes ttl from this delta). Saturates to zero rather than
/// going negative if the file is already past its expiration.
pub fn original_ttl(meta: &FileMetadata) -> Duration {
    meta.estimated_expiration
        .duration_since(meta.last_access)
        .unwrap_or(Duration::ZERO)
}

pub fn is_expired(meta: &FileMetadata, reference: SystemTime) -> bool {
    meta.estimated_expiration < reference
}
