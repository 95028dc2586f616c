//! `Manager`: end-to-end image retrieval — memory → disk → network → process →
//! repopulate (spec §4.9).
//!
//! Grounded on the reference crate's `LayeredCacheWorker::fetch`/`L1Cont::finish`
//! (`src/image/cache/mod.rs`) for the memory→disk→network→repopulate order, generalized
//! from a fixed image pipeline to the spec's pluggable processor/serializer/retry seams.

use std::sync::mpsc;
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use crate::cached_image::CachedImage;
use crate::config::RetrieveOptions;
use crate::disk::DiskStore;
use crate::downloader::{Downloader, SubscriberOptions};
use crate::error::{ProcessorError, RequestError, ResponseError, RetrieveError};
use crate::key::{DataProvider, EffectiveKey, ProviderId, Source};
use crate::memory::MemoryStore;
use crate::processor::Processor;
use crate::retry::{RetryContext, RetryDecision, RetryStrategy};
use crate::session::{DownloadTask, SessionError};

/// A cancellable handle for one in-flight [`Manager::retrieve_cancellable`] call. The
/// plain [`Manager::retrieve`] has no way for a caller to reach back into a download
/// already underway; [`Prefetcher`](crate::prefetcher::Prefetcher) uses this so
/// stopping it actually aborts in-flight network fetches instead of only dropping
/// still-pending sources (spec §4.10 "Stop").
#[derive(Default)]
pub struct RetrieveHandle {
    download_task: Mutex<Option<DownloadTask>>,
}

impl RetrieveHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&self, task: DownloadTask) {
        *self.download_task.lock() = Some(task);
    }

    /// Cancels the download currently attached to this handle, if any. A no-op before
    /// the first network fetch starts, and after the retrieval has already finished.
    pub fn cancel(&self) {
        if let Some(task) = self.download_task.lock().as_ref() {
            task.cancel();
        }
    }
}

/// Where the returned image actually came from — surfaced as a distinct result type at
/// the public edge (spec §4.9 step 4).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetrieveResult {
    Memory(CachedImage),
    Disk(CachedImage),
    Network(CachedImage),
}

impl RetrieveResult {
    pub fn image(&self) -> &CachedImage {
        match self {
            Self::Memory(i) | Self::Disk(i) | Self::Network(i) => i,
        }
    }

    pub fn into_image(self) -> CachedImage {
        match self {
            Self::Memory(i) | Self::Disk(i) | Self::Network(i) => i,
        }
    }
}

/// The top-level coordinator (spec §4.9). Owns one `MemoryStore`, one `DiskStore`, and
/// one `Downloader`; a process typically owns one `Manager` per logical cache.
pub struct Manager {
    memory: Arc<MemoryStore<CachedImage>>,
    disk: Arc<DiskStore>,
    downloader: Arc<Downloader>,
    default_retry_strategy: Option<Arc<dyn RetryStrategy>>,
    provider: Option<Arc<dyn DataProvider>>,
}

impl Manager {
    pub fn new(
        memory: Arc<MemoryStore<CachedImage>>,
        disk: Arc<DiskStore>,
        downloader: Arc<Downloader>,
    ) -> Self {
        Self {
            memory,
            disk,
            downloader,
            default_retry_strategy: None,
            provider: None,
        }
    }

    pub fn with_default_retry_strategy(mut self, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.default_retry_strategy = Some(strategy);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn memory(&self) -> &MemoryStore<CachedImage> {
        &self.memory
    }

    pub fn disk(&self) -> &DiskStore {
        &self.disk
    }

    pub fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }

    /// Which layer currently has `source` cached for `options.processor`, without
    /// fetching or reading file contents. Used by the prefetcher (spec §4.10) to decide
    /// whether a source needs a network round trip at all.
    pub fn cache_type(&self, source: &Source, options: &RetrieveOptions) -> CacheType {
        let effective_key = EffectiveKey::compute(source.cache_key(), options.processor.identifier());
        if self.memory.is_cached(effective_key.as_str()) {
            return CacheType::Memory;
        }
        if self.disk.is_cached(effective_key.as_str(), None, None) {
            return CacheType::Disk;
        }
        CacheType::None
    }

    /// Runs the full retrieval pipeline (spec §4.9). `Ok(None)` means
    /// `options.from_memory_cache_or_refresh` was set and nothing was in memory.
    pub fn retrieve(
        &self,
        source: Source,
        options: &RetrieveOptions,
    ) -> Result<Option<RetrieveResult>, RetrieveError> {
        self.retrieve_cancellable(source, options, None)
    }

    /// Same pipeline as [`Self::retrieve`], but attaches the network fetch (if one
    /// happens) to `handle` as soon as it starts, so a caller holding the handle can
    /// cancel it mid-flight.
    pub fn retrieve_cancellable(
        &self,
        source: Source,
        options: &RetrieveOptions,
        handle: Option<&RetrieveHandle>,
    ) -> Result<Option<RetrieveResult>, RetrieveError> {
        let effective_key = EffectiveKey::compute(source.cache_key(), options.processor.identifier());

        if !options.force_refresh {
            if let Some(image) = self.memory.value(effective_key.as_str(), options.memory_extend) {
                let image = match &options.image_modifier {
                    Some(modifier) => modifier.modify(image),
                    None => image,
                };
                return Ok(Some(RetrieveResult::Memory(image)));
            }

            if options.from_memory_cache_or_refresh {
                return Ok(None);
            }

            if let Some(image) = self.load_from_disk(&effective_key, options)? {
                return Ok(Some(RetrieveResult::Disk(image)));
            }
        }

        self.fetch_with_retry(&source, &effective_key, options, handle)
            .map(|image| Some(RetrieveResult::Network(image)))
    }

    /// Step 3: disk hit → deserialize, repopulate memory (`to_disk=false`), return.
    fn load_from_disk(
        &self,
        effective_key: &EffectiveKey,
        options: &RetrieveOptions,
    ) -> Result<Option<CachedImage>, RetrieveError> {
        let Some(bytes) = self
            .disk
            .value(effective_key.as_str(), None, options.disk_extend, None)?
        else {
            return Ok(None);
        };
        let image = options.serializer.deserialize(effective_key.as_str(), &bytes)?;
        self.memory
            .store(effective_key.as_str(), image.clone(), options.memory_expiration);
        Ok(Some(image))
    }

    fn fetch_with_retry(
        &self,
        source: &Source,
        effective_key: &EffectiveKey,
        options: &RetrieveOptions,
        handle: Option<&RetrieveHandle>,
    ) -> Result<CachedImage, RetrieveError> {
        let mut retried_count = 0u32;
        loop {
            match self.fetch_and_process(source, effective_key, options, handle) {
                Ok(image) => return Ok(image),
                Err(err) => {
                    let Some(strategy) = options
                        .retry_strategy
                        .clone()
                        .or_else(|| self.default_retry_strategy.clone())
                    else {
                        return Err(err);
                    };
                    let context = RetryContext {
                        source: source.clone(),
                        error: Arc::new(err),
                        retried_count,
                    };
                    match strategy.should_retry(&context) {
                        RetryDecision::Stop => {
                            return Err(Arc::try_unwrap(context.error)
                                .unwrap_or(RetrieveError::Cancelled));
                        }
                        RetryDecision::Retry => {
                            let delay = strategy.delay(&context);
                            if !delay.is_zero() {
                                std::thread::sleep(delay);
                            }
                            retried_count += 1;
                        }
                    }
                }
            }
        }
    }

    fn fetch_and_process(
        &self,
        source: &Source,
        effective_key: &EffectiveKey,
        options: &RetrieveOptions,
        handle: Option<&RetrieveHandle>,
    ) -> Result<CachedImage, RetrieveError> {
        let (bytes, processing_run) = match source {
            Source::Network { url, .. } => self.fetch_network(url.clone(), options, handle)?,
            Source::Provider { provider, .. } => (self.fetch_provider(provider)?, None),
        };

        let image = match processing_run {
            Some(run) => run.run(options.processor.as_ref(), &bytes)?,
            None => options.processor.process(&bytes)?,
        };

        self.memory
            .store(effective_key.as_str(), image.clone(), options.memory_expiration);
        if options.store_to_disk {
            let encoded = options
                .serializer
                .serialize(effective_key.as_str(), &image, Some(&bytes))?;
            self.disk
                .store(effective_key.as_str(), &encoded, options.disk_expiration, None)?;
        }
        Ok(image)
    }

    fn fetch_network(
        &self,
        url: Url,
        options: &RetrieveOptions,
        handle: Option<&RetrieveHandle>,
    ) -> Result<(Arc<[u8]>, Option<Arc<crate::processor::ProcessingRun>>), RetrieveError> {
        let (tx, rx) = mpsc::channel();
        let on_data_received = options.on_data_received.clone();
        let download_task = self.downloader.download(
            url,
            options.request_modifier.as_deref(),
            options.low_data_mode,
            SubscriberOptions {
                on_completed: Box::new(move |result| {
                    let _ = tx.send(result);
                }),
                on_data_received: on_data_received.map(|hook| {
                    Box::new(move |chunk: &[u8], total: usize| hook(chunk, total))
                        as Box<dyn Fn(&[u8], usize) + Send + Sync>
                }),
                on_redirect: options.redirect_handler.clone(),
            },
        )?;
        if let Some(handle) = handle {
            handle.attach(download_task.clone());
        }
        let processing_run = download_task.task().processing_run();

        let bytes = rx
            .recv()
            .map_err(|_| RetrieveError::Cancelled)?
            .map_err(session_error_to_retrieve_error)?;
        Ok((bytes, Some(processing_run)))
    }

    fn fetch_provider(&self, provider: &ProviderId) -> Result<Arc<[u8]>, RetrieveError> {
        let provider_fetcher = self
            .provider
            .as_ref()
            .ok_or_else(|| RetrieveError::Request(RequestError::EmptyRequest))?;
        let bytes = provider_fetcher
            .fetch(provider)
            .map_err(|err| {
                RetrieveError::Response(Arc::new(ResponseError::UrlSessionError(err.to_string())))
            })?;
        Ok(Arc::from(bytes.into_boxed_slice()))
    }
}

fn session_error_to_retrieve_error(err: SessionError) -> RetrieveError {
    match err {
        SessionError::Request(req) => RetrieveError::Request(req),
        SessionError::Response(resp) => RetrieveError::Response(resp),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheType {
    None,
    Memory,
    Disk,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiskCacheOptions, DownloaderOptions, MemoryCacheOptions};
    use crate::processor::DefaultProcessor;
    use crate::request::UreqExecutor;
    use crate::serializer::DefaultCacheSerializer;
    use crate::test_support::server::{MockServer, ScriptedResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn manager_with(tempdir: &std::path::Path) -> Manager {
        let memory = Arc::new(MemoryStore::new(MemoryCacheOptions::default()));
        let disk = Arc::new(
            DiskStore::new("test", DiskCacheOptions::default(), Some(tempdir.to_owned())).unwrap(),
        );
        let downloader = Arc::new(Downloader::new(
            DownloaderOptions::default(),
            Arc::new(UreqExecutor::default()),
        ));
        Manager::new(memory, disk, downloader)
    }

    fn options() -> RetrieveOptions {
        RetrieveOptions::new(
            Arc::new(DefaultProcessor::default()),
            Arc::new(DefaultCacheSerializer),
        )
    }

    #[test]
    fn memory_hit_returns_memory_result() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path());
        let png = crate::test_support::image::tiny_png();
        let image = DefaultProcessor::default().process(&png).unwrap();
        manager.memory().store("a", image.clone(), None);

        let result = manager
            .retrieve(Source::network(Url::parse("https://example.com/a").unwrap()), &options())
            .unwrap()
            .unwrap();
        assert!(matches!(result, RetrieveResult::Memory(_)));
        assert_eq!(result.into_image(), image);
    }

    #[test]
    fn disk_hit_promotes_to_memory_and_returns_disk_result() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path());
        let png = crate::test_support::image::tiny_png();
        manager.disk().store("b", &png, None, None).unwrap();

        let source = Source::network(Url::parse("https://example.com/b").unwrap());
        let first = manager.retrieve(source.clone(), &options()).unwrap().unwrap();
        assert!(matches!(first, RetrieveResult::Disk(_)));

        let second = manager.retrieve(source, &options()).unwrap().unwrap();
        assert!(matches!(second, RetrieveResult::Memory(_)));
    }

    #[test]
    fn network_fetch_populates_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let png = crate::test_support::image::tiny_png();
        let server = MockServer::serve_once(ScriptedResponse::ok(png));
        let manager = manager_with(dir.path());
        let url = Url::parse(&server.url_for("/c")).unwrap();

        let result = manager
            .retrieve(Source::network(url.clone()), &options())
            .unwrap()
            .unwrap();
        assert!(matches!(result, RetrieveResult::Network(_)));
        assert_eq!(manager.cache_type(&Source::network(url), &options()), CacheType::Memory);
    }

    #[test]
    fn scoped_by_processor_identifier() {
        struct TaggedProcessor(&'static str, Arc<AtomicUsize>);
        impl crate::processor::Processor for TaggedProcessor {
            fn identifier(&self) -> &str {
                self.0
            }
            fn process(&self, data: &[u8]) -> Result<CachedImage, ProcessorError> {
                self.1.fetch_add(1, Ordering::SeqCst);
                Ok(CachedImage::new(data.to_vec(), 1, 1))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let png = crate::test_support::image::tiny_png();
        let server = MockServer::serve_once(ScriptedResponse::ok(png));
        let manager = manager_with(dir.path());
        let url = Url::parse(&server.url_for("/d")).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let mut opts1 = options();
        opts1.processor = Arc::new(TaggedProcessor("p1", calls.clone()));
        let mut opts2 = options();
        opts2.processor = Arc::new(TaggedProcessor("p2", calls.clone()));

        manager.retrieve(Source::network(url.clone()), &opts1).unwrap();
        manager.retrieve(Source::network(url), &opts2).unwrap();

        // Distinct processor identifiers must not share a cache entry (property 12).
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn retries_after_response_error_then_succeeds() {
        use crate::retry::{DelayRetryStrategy, IntervalPolicy};

        let dir = tempfile::tempdir().unwrap();
        let png = crate::test_support::image::tiny_png();
        let server = MockServer::serve_sequence(vec![ScriptedResponse::status(503), ScriptedResponse::ok(png)]);
        let manager = manager_with(dir.path())
            .with_default_retry_strategy(Arc::new(DelayRetryStrategy::new(1, IntervalPolicy::Seconds(Duration::ZERO))));
        let url = Url::parse(&server.url_for("/e")).unwrap();

        let result = manager.retrieve(Source::network(url), &options()).unwrap().unwrap();
        assert!(matches!(result, RetrieveResult::Network(_)));
        assert_eq!(server.hits(), 2);
    }
}
