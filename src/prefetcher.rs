//! `Prefetcher`: bounded-concurrency batch driver over `Manager` (spec §4.10).
//!
//! Atomic per-outcome counters are grounded on the pack's `DownloadStats`
//! (`other_examples/.../download-engine.rs`), adapted from an async/tokio worker pool to
//! a plain OS-thread pool since this crate has no async runtime.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::RetrieveOptions;
use crate::key::Source;
use crate::manager::{CacheType, Manager, RetrieveHandle};

/// Per-source terminal outcome (spec §4.10 "State").
#[derive(Clone, Debug)]
pub enum PrefetchOutcome {
    Completed,
    Failed(String),
    Skipped,
}

/// Snapshot handed to the progress callback after each terminal event.
#[derive(Clone, Debug)]
pub struct PrefetchProgress {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
}

impl PrefetchProgress {
    fn processed(&self) -> usize {
        self.completed + self.failed + self.skipped
    }
}

#[derive(Default)]
struct Counts {
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl Counts {
    fn snapshot(&self, total: usize) -> PrefetchProgress {
        PrefetchProgress {
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            total,
        }
    }
}

/// Bulk prefetch with bounded concurrency (spec §4.10).
pub struct Prefetcher {
    manager: Arc<Manager>,
    options: RetrieveOptions,
    max_concurrent_downloads: usize,
    pending: Mutex<VecDeque<Source>>,
    total: usize,
    counts: Arc<Counts>,
    stopped: Arc<AtomicBool>,
    progress: Arc<dyn Fn(PrefetchProgress) + Send + Sync>,
    completion: Mutex<Option<Box<dyn FnOnce(PrefetchProgress) + Send>>>,
    started: AtomicBool,
    /// Handles for sources currently past the cache-type check and into
    /// `Manager::retrieve_cancellable`, so `stop` can reach into each worker's
    /// in-flight network fetch instead of only draining `pending` (spec §4.10 "Stop").
    in_flight: Mutex<Vec<Arc<RetrieveHandle>>>,
}

impl Prefetcher {
    pub fn new(
        manager: Arc<Manager>,
        sources: Vec<Source>,
        options: RetrieveOptions,
        progress: impl Fn(PrefetchProgress) + Send + Sync + 'static,
        completion: impl FnOnce(PrefetchProgress) + Send + 'static,
    ) -> Self {
        let total = sources.len();
        Self {
            manager,
            options,
            max_concurrent_downloads: 5,
            pending: Mutex::new(sources.into()),
            total,
            counts: Arc::new(Counts::default()),
            stopped: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(progress),
            completion: Mutex::new(Some(Box::new(completion))),
            started: AtomicBool::new(false),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub fn max_concurrent_downloads(mut self, n: usize) -> Self {
        self.max_concurrent_downloads = n.max(1);
        self
    }

    /// Drains `min(|pending|, max_concurrent_downloads)` tasks to start. A no-op if
    /// already started.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.total == 0 {
            self.maybe_finish();
            return;
        }
        let workers = self.max_concurrent_downloads.min(self.total).max(1);
        for _ in 0..workers {
            self.spawn_worker();
        }
    }

    /// Marks the prefetcher stopped; in-flight sources still complete, but no new
    /// pending source is dequeued after they finish, and every still-pending source
    /// counts as failed before completion fires (spec §4.10 "Stop").
    pub fn stop(self: &Arc<Self>) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for handle in self.in_flight.lock().iter() {
            handle.cancel();
        }
        let mut pending = self.pending.lock();
        let remaining = pending.len();
        pending.clear();
        drop(pending);
        for _ in 0..remaining {
            self.counts.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.maybe_finish();
    }

    fn spawn_worker(self: &Arc<Self>) {
        let this = self.clone();
        std::thread::Builder::new()
            .name("picvault-prefetch-worker".into())
            .spawn(move || this.worker_loop())
            .expect("spawn prefetch worker thread");
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            let Some(source) = self.pending.lock().pop_front() else {
                return;
            };
            self.process_one(source);
            self.emit_progress();
        }
        // `maybe_finish` is invoked from `emit_progress` once every source has a
        // terminal outcome, regardless of which worker thread reaches it last.
    }

    fn process_one(&self, source: Source) {
        if self.options.force_refresh {
            self.download_and_cache(source);
            return;
        }
        match self.manager.cache_type(&source, &self.options) {
            CacheType::Memory => {
                self.counts.skipped.fetch_add(1, Ordering::SeqCst);
            }
            CacheType::Disk => {
                if self.options.also_prefetch_to_memory {
                    self.download_and_cache(source);
                } else {
                    self.counts.skipped.fetch_add(1, Ordering::SeqCst);
                }
            }
            CacheType::None => {
                self.download_and_cache(source);
            }
        }
    }

    fn download_and_cache(&self, source: Source) {
        let handle = Arc::new(RetrieveHandle::new());
        self.in_flight.lock().push(handle.clone());

        let result = self.manager.retrieve_cancellable(source, &self.options, Some(&handle));

        self.in_flight.lock().retain(|h| !Arc::ptr_eq(h, &handle));

        match result {
            Ok(_) => {
                self.counts.completed.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                self.counts.failed.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(error = %err, "prefetch source failed");
            }
        }
    }

    fn emit_progress(&self) {
        let snapshot = self.counts.snapshot(self.total);
        (self.progress)(snapshot.clone());
        if snapshot.processed() >= self.total {
            self.maybe_finish();
        }
    }

    fn maybe_finish(&self) {
        if let Some(completion) = self.completion.lock().take() {
            completion(self.counts.snapshot(self.total));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiskCacheOptions, DownloaderOptions, MemoryCacheOptions};
    use crate::disk::DiskStore;
    use crate::downloader::Downloader;
    use crate::memory::MemoryStore;
    use crate::processor::{DefaultProcessor, Processor};
    use crate::request::UreqExecutor;
    use crate::serializer::DefaultCacheSerializer;
    use crate::test_support::server::{MockServer, ScriptedResponse};
    use std::sync::mpsc;
    use std::time::Duration;
    use url::Url;

    fn manager_with(tempdir: &std::path::Path) -> Arc<Manager> {
        let memory = Arc::new(MemoryStore::new(MemoryCacheOptions::default()));
        let disk = Arc::new(
            DiskStore::new("test", DiskCacheOptions::default(), Some(tempdir.to_owned())).unwrap(),
        );
        let downloader = Arc::new(Downloader::new(
            DownloaderOptions::default(),
            Arc::new(UreqExecutor::default()),
        ));
        Arc::new(Manager::new(memory, disk, downloader))
    }

    fn options() -> RetrieveOptions {
        RetrieveOptions::new(
            Arc::new(DefaultProcessor::default()),
            Arc::new(DefaultCacheSerializer),
        )
    }

    #[test]
    fn downloads_every_fresh_source_and_fires_completion_once() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path());
        let png = crate::test_support::image::tiny_png();
        let server = MockServer::serve_sequence(vec![
            ScriptedResponse::ok(png.clone()),
            ScriptedResponse::ok(png.clone()),
            ScriptedResponse::ok(png),
        ]);
        let sources: Vec<Source> = (0..3)
            .map(|i| Source::network(Url::parse(&server.url_for(&format!("/{i}"))).unwrap()))
            .collect();

        let (tx, rx) = mpsc::channel();
        let prefetcher = Arc::new(Prefetcher::new(
            manager,
            sources,
            options(),
            |_progress| {},
            move |summary| {
                let _ = tx.send(summary);
            },
        ));
        prefetcher.start();

        let summary = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(server.hits(), 3);
    }

    #[test]
    fn skips_sources_already_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path());
        let url = Url::parse("https://example.com/already-cached.png").unwrap();
        let image = DefaultProcessor::default()
            .process(&crate::test_support::image::tiny_png())
            .unwrap();
        manager.memory().store(url.as_str(), image, None);

        let (tx, rx) = mpsc::channel();
        let prefetcher = Arc::new(Prefetcher::new(
            manager,
            vec![Source::network(url)],
            options(),
            |_| {},
            move |summary| {
                let _ = tx.send(summary);
            },
        ));
        prefetcher.start();

        let summary = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.completed, 0);
    }

    #[test]
    fn stop_cancels_in_flight_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path());
        let png = crate::test_support::image::tiny_png();
        let server =
            MockServer::serve_once(ScriptedResponse::ok(png).delayed(Duration::from_millis(300)));
        let url = Url::parse(&server.url_for("/slow")).unwrap();

        let (tx, rx) = mpsc::channel();
        let prefetcher = Arc::new(Prefetcher::new(
            manager,
            vec![Source::network(url)],
            options(),
            |_| {},
            move |summary| {
                let _ = tx.send(summary);
            },
        ));
        prefetcher.start();
        // give the worker time to pass the cache-type check and register its handle
        std::thread::sleep(Duration::from_millis(50));
        prefetcher.stop();

        let summary = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn empty_source_list_completes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path());
        let (tx, rx) = mpsc::channel();
        let prefetcher = Arc::new(Prefetcher::new(manager, vec![], options(), |_| {}, move |summary| {
            let _ = tx.send(summary);
        }));
        prefetcher.start();
        let summary = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(summary.total, 0);
    }
}
