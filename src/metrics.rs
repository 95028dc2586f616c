//! A small `metrics`-crate-based wrapper around the handful of timings worth watching:
//! decode cost, blocking disk I/O, and memory-store sweep cost (SPEC_FULL.md §C).
//!
//! Grounded on the reference crate's `Tag` enum (`src/metrics/hist.rs`): a closed set of
//! named histograms with a unit and description, registered once. Unlike the reference
//! crate (a binary that installs its own `metrics::Recorder`), this crate never installs
//! a recorder — the `histogram!` calls below are inert until an embedding application
//! installs one of its own.

pub use metrics::Unit;

/// The histograms this crate records. Mirrors the reference crate's `Tag` shape
/// (name/unit/description triple) scaled down to this crate's own timings.
#[derive(Clone, Copy, Debug)]
pub enum Tag {
    ImageDecode,
    CacheDiskRead,
    CacheDiskWrite,
    CacheMemorySweep,
}

impl Tag {
    const ALL: [Tag; 4] = [
        Tag::ImageDecode,
        Tag::CacheDiskRead,
        Tag::CacheDiskWrite,
        Tag::CacheMemorySweep,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::ImageDecode => "image.decode",
            Self::CacheDiskRead => "cache.disk.read",
            Self::CacheDiskWrite => "cache.disk.write",
            Self::CacheMemorySweep => "cache.memory.sweep",
        }
    }

    fn desc_text(self) -> &'static str {
        match self {
            Self::ImageDecode => "time decoding + lz4-compressing raw bytes into a CachedImage",
            Self::CacheDiskRead => "time spent on a blocking DiskStore read",
            Self::CacheDiskWrite => "time spent on a blocking DiskStore write",
            Self::CacheMemorySweep => "time spent walking MemoryStore's tracking set",
        }
    }

    /// Registers descriptions for every tag with whatever `metrics::Recorder` the host
    /// application installed, if any. Safe to call more than once.
    pub fn describe_all() {
        for tag in Self::ALL {
            metrics::describe_histogram!(tag.as_str(), Unit::Seconds, tag.desc_text());
        }
    }

    /// Records `elapsed` against this histogram.
    pub fn record(self, elapsed: std::time::Duration) {
        metrics::histogram!(self.as_str()).record(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describing_and_recording_without_a_recorder_does_not_panic() {
        Tag::describe_all();
        Tag::ImageDecode.record(std::time::Duration::from_millis(5));
        Tag::CacheDiskRead.record(std::time::Duration::from_micros(200));
    }
}
