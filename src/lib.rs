//! A hybrid two-tier (memory + disk) image cache with a deduplicating network
//! downloader and a retrieval coordinator.
//!
//! Layout mirrors the reference crate's flat `src/image/` module tree, generalized
//! from one fixed image pipeline into pluggable decode/process/serialize/retry seams:
//! [`memory`]/[`disk`] are the two cache tiers, [`session`]/[`downloader`] coalesce
//! concurrent fetches of the same url, [`processor`] turns bytes into images at most
//! once per distinct transform, and [`manager`] wires all of it into one
//! memory → disk → network pipeline. [`prefetcher`] drives that pipeline over a batch
//! of sources with bounded concurrency.

pub mod cached_image;
pub mod clock;
pub mod config;
pub mod decode;
pub mod disk;
pub mod downloader;
pub mod error;
pub mod expiration;
pub mod key;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod prefetcher;
pub mod processor;
pub mod request;
pub mod retry;
pub mod serializer;
pub mod session;

#[cfg(test)]
pub mod test_support;

pub use cached_image::{CachedImage, ImageModifier};
pub use clock::{SystemClock, TimeSource};
pub use config::{DiskCacheOptions, DownloaderOptions, MemoryCacheOptions, RetrieveOptions};
pub use decode::{Decoder, DefaultDecoder};
pub use disk::DiskStore;
pub use downloader::{
    AsyncRequestModifier, DefaultDelegate, Downloader, DownloaderDelegate, PlaceholderHandle,
    RedirectHandler, RequestModifier, ResponseDisposition, SubscriberOptions,
};
pub use error::{CacheError, ProcessorError, RequestError, ResponseError, RetrieveError};
pub use expiration::{CacheCost, ExpirationExtending, ExpirationPolicy};
pub use key::{CacheKey, DataProvider, EffectiveKey, ProviderId, Source};
pub use manager::{CacheType, Manager, RetrieveHandle, RetrieveResult};
pub use memory::MemoryStore;
pub use prefetcher::{PrefetchOutcome, PrefetchProgress, Prefetcher};
pub use processor::{DefaultProcessor, Processor, ProcessingRun};
pub use request::{ExecutedResponse, Request, RequestExecutor, UreqExecutor};
pub use retry::{
    DelayRetryStrategy, IntervalPolicy, NetworkAvailability, NetworkAvailabilityRetryStrategy,
    RetryContext, RetryDecision, RetryStrategy,
};
pub use serializer::{CacheSerializer, DefaultCacheSerializer, FormatIndicatedCacheSerializer, ImageFormat};
pub use session::{CancelToken, DownloadTask, SessionError, SessionManager, SessionResult, SessionTask};
