//! Configuration options (spec §6), grouped the way a caller actually constructs them.
//!
//! Each struct is `Default`-able with the literal defaults spec.md §6 calls out, the
//! same builder-default convention as the reference crate's `CacheOptions`/`SvgContext`
//! (`src/image/cache/mod.rs`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cached_image::ImageModifier;
use crate::downloader::{RedirectHandler, RequestModifier};
use crate::expiration::{ExpirationExtending, ExpirationPolicy};
use crate::processor::Processor;
use crate::retry::RetryStrategy;
use crate::serializer::CacheSerializer;

/// §6 Memory options.
#[derive(Clone)]
pub struct MemoryCacheOptions {
    /// Bytes (pixel-cost units). `0` means unlimited.
    pub total_cost_limit: usize,
    pub count_limit: usize,
    pub default_expiration: ExpirationPolicy,
    pub clean_interval: Duration,
    pub keep_when_backgrounded: bool,
}

impl Default for MemoryCacheOptions {
    fn default() -> Self {
        Self {
            total_cost_limit: 0,
            count_limit: usize::MAX,
            default_expiration: ExpirationPolicy::Seconds(Duration::from_secs(5 * 60)),
            clean_interval: Duration::from_secs(120),
            keep_when_backgrounded: false,
        }
    }
}

/// §6 Disk options.
#[derive(Clone)]
pub struct DiskCacheOptions {
    /// Bytes. `0` means unlimited.
    pub size_limit: u64,
    pub default_expiration: ExpirationPolicy,
    pub path_extension: Option<String>,
    pub uses_hashed_filename: bool,
    pub auto_ext_after_hashed_filename: bool,
    /// Overrides the default `<base_cache_dir>/com.picvault.ImageCache.<name>/` root.
    pub cache_path_hook: Option<Arc<dyn Fn(&str) -> PathBuf + Send + Sync>>,
}

impl Default for DiskCacheOptions {
    fn default() -> Self {
        Self {
            size_limit: 0,
            default_expiration: ExpirationPolicy::Days(7),
            path_extension: None,
            uses_hashed_filename: true,
            auto_ext_after_hashed_filename: false,
            cache_path_hook: None,
        }
    }
}

/// §6 Downloader options.
#[derive(Clone)]
pub struct DownloaderOptions {
    pub download_timeout: Duration,
    pub trusted_hosts: Option<Vec<String>>,
    pub requests_use_pipelining: bool,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            download_timeout: Duration::from_secs(15),
            trusted_hosts: None,
            requests_use_pipelining: false,
        }
    }
}

/// Per-request options (spec §6 "Retrieval options").
#[derive(Clone)]
pub struct RetrieveOptions {
    pub processor: Arc<dyn Processor>,
    pub serializer: Arc<dyn CacheSerializer>,
    pub memory_expiration: Option<ExpirationPolicy>,
    pub disk_expiration: Option<ExpirationPolicy>,
    pub memory_extend: ExpirationExtending,
    pub disk_extend: ExpirationExtending,
    pub background_decode: bool,
    pub from_memory_cache_or_refresh: bool,
    pub also_prefetch_to_memory: bool,
    pub force_refresh: bool,
    pub retry_strategy: Option<Arc<dyn RetryStrategy>>,
    pub store_to_disk: bool,
    pub load_disk_file_synchronously: bool,
    pub scale_factor: f32,
    /// Applied inline during request build (spec §4.5 step 4); a `None` result fails
    /// the build with `emptyRequest`.
    pub request_modifier: Option<Arc<dyn RequestModifier>>,
    /// Consulted on each redirect hop of this request (spec §4.4/§9).
    pub redirect_handler: Option<Arc<dyn RedirectHandler>>,
    /// Fired with each chunk as it arrives and the running total (spec §6 "on-data-received
    /// side-effects").
    pub on_data_received: Option<Arc<dyn Fn(&[u8], usize) + Send + Sync>>,
    /// Sets `allowsConstrainedNetworkAccess=false` on the built request (spec §4.5 step 3).
    pub low_data_mode: bool,
    /// Applied to a memory-cache hit before it's returned (spec §4.9 step 1).
    pub image_modifier: Option<Arc<dyn ImageModifier>>,
}

impl RetrieveOptions {
    pub fn new(processor: Arc<dyn Processor>, serializer: Arc<dyn CacheSerializer>) -> Self {
        Self {
            processor,
            serializer,
            memory_expiration: None,
            disk_expiration: None,
            memory_extend: ExpirationExtending::None,
            disk_extend: ExpirationExtending::None,
            background_decode: false,
            from_memory_cache_or_refresh: false,
            also_prefetch_to_memory: false,
            force_refresh: false,
            retry_strategy: None,
            store_to_disk: true,
            load_disk_file_synchronously: false,
            scale_factor: 1.0,
            request_modifier: None,
            redirect_handler: None,
            on_data_received: None,
            low_data_mode: false,
            image_modifier: None,
        }
    }
}
