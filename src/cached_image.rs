//! The default, swappable `Image` representation.
//!
//! Grounded on the reference crate's `ImageData` (`src/image/mod.rs`): pixels are kept
//! as an lz4-compressed RGBA8 blob plus dimensions. `cache_cost` is pixel count, exactly
//! matching spec §3's "pixel-count estimate".

use smart_debug::SmartDebug;

use crate::expiration::CacheCost;

#[derive(SmartDebug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    #[debug(wrapper = DebugBlobLen)]
    lz4_blob: Vec<u8>,
    width: u32,
    height: u32,
}

struct DebugBlobLen<'a>(&'a [u8]);

impl std::fmt::Debug for DebugBlobLen<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{} compressed bytes>", self.0.len())
    }
}

impl CachedImage {
    pub fn new(lz4_blob: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            lz4_blob,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba_byte_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    pub fn to_rgba_bytes(&self) -> anyhow::Result<Vec<u8>> {
        crate::decode::lz4_decompress(&self.lz4_blob, self.rgba_byte_size())
    }

    pub fn lz4_blob(&self) -> &[u8] {
        &self.lz4_blob
    }
}

impl CacheCost for CachedImage {
    fn cache_cost(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Applied to a memory-cache hit before it's handed back to the caller (spec §4.9 step
/// 1 "on hit, apply optional modifier"). Unlike [`crate::processor::Processor`], this
/// runs on every hit rather than being memoized per download, since it's a cheap,
/// per-call transform (e.g. tinting, cropping) rather than a decode step.
pub trait ImageModifier: Send + Sync {
    fn modify(&self, image: CachedImage) -> CachedImage;
}
