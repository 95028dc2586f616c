//! Per-URL shared downloads with independent-cancellation subscribers (spec §4.3/§4.4).
//!
//! Grounded on the reference crate's cache registry (`src/image/cache/session.rs`) for
//! the "one entry per key behind a single lock" registry shape, generalized from a
//! read-through response cache into an in-flight fan-out session.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use crate::error::{RequestError, ResponseError};
use crate::processor::ProcessingRun;

/// Monotonically increasing per-[`SessionTask`] subscriber identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CancelToken(u64);

/// The terminal outcome delivered to one subscriber's completion hook.
pub type SessionResult = Result<Arc<[u8]>, SessionError>;

/// Error shapes a [`SessionTask`] can fan out. `Request` is always per-callback
/// (task-cancelled); `Response` is shared across every remaining subscriber, hence the
/// `Arc` rather than requiring `ResponseError: Clone`.
#[derive(Debug, Clone)]
pub enum SessionError {
    Request(RequestError),
    Response(Arc<ResponseError>),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request(e) => write!(f, "{e}"),
            Self::Response(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {}

type DataHook = Arc<dyn Fn(&[u8], usize) + Send + Sync>;
type CompletionHook = Arc<dyn Fn(SessionResult) + Send + Sync>;
type RedirectHook = Arc<dyn crate::downloader::RedirectHandler>;

struct Callback {
    on_completed: CompletionHook,
    on_data_received: Option<DataHook>,
    on_redirect: Option<RedirectHook>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

struct Inner {
    state: SessionState,
    accumulated: Vec<u8>,
    callbacks: BTreeMap<CancelToken, Callback>,
    next_token: u64,
    /// Lazily created by whichever subscriber (creator or joiner) asks first. Sharing
    /// one instance per `SessionTask` is what makes the processor pipeline's
    /// per-identifier memoization (spec §4.6) hold across every subscriber of the same
    /// download, without a separate URL-keyed registry that could race against
    /// `SessionManager::add_or_append`.
    processing_run: Option<Arc<ProcessingRun>>,
}

/// Accumulates bytes from a single URL fetch and fans the final result out to every
/// subscriber, each with its own cancel token.
pub struct SessionTask {
    pub url: Url,
    pub task_id: u64,
    inner: Mutex<Inner>,
}

impl SessionTask {
    fn new(url: Url, task_id: u64) -> Self {
        Self {
            url,
            task_id,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                accumulated: Vec::new(),
                callbacks: BTreeMap::new(),
                next_token: 0,
                processing_run: None,
            }),
        }
    }

    /// Returns this task's shared [`ProcessingRun`], creating it on first access.
    pub fn processing_run(&self) -> Arc<ProcessingRun> {
        let mut inner = self.inner.lock();
        inner
            .processing_run
            .get_or_insert_with(|| Arc::new(ProcessingRun::new()))
            .clone()
    }

    /// Enters `Running` exactly once; subsequent calls are no-ops.
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Idle {
            inner.state = SessionState::Running;
        }
    }

    /// Registers a subscriber, returning its cancel token, or `None` if the task has
    /// already reached a terminal state.
    fn add_callback(
        &self,
        on_completed: CompletionHook,
        on_data_received: Option<DataHook>,
        on_redirect: Option<RedirectHook>,
    ) -> Option<CancelToken> {
        let mut inner = self.inner.lock();
        if matches!(inner.state, SessionState::Completed | SessionState::Cancelled) {
            return None;
        }
        let token = CancelToken(inner.next_token);
        inner.next_token += 1;
        inner.callbacks.insert(
            token,
            Callback {
                on_completed,
                on_data_received,
                on_redirect,
            },
        );
        Some(token)
    }

    /// The redirect handler belonging to the most recently registered callback still on
    /// this task, consulted on each redirect hop (spec §4.4 "consult the last callback's
    /// redirect handler"). `BTreeMap<CancelToken, _>` orders by token, and tokens are
    /// monotonically increasing, so the last entry is the most recent subscriber.
    pub fn current_redirect_handler(&self) -> Option<RedirectHook> {
        self.inner
            .lock()
            .callbacks
            .values()
            .next_back()
            .and_then(|cb| cb.on_redirect.clone())
    }

    /// Appends `chunk` and invokes each subscriber's data-received hook, in
    /// registration order, with the newly arrived chunk and the running total.
    pub fn data_received(&self, chunk: &[u8]) {
        let to_notify: Vec<DataHook> = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Running {
                return;
            }
            inner.accumulated.extend_from_slice(chunk);
            inner
                .callbacks
                .values()
                .filter_map(|cb| cb.on_data_received.clone())
                .collect()
        };
        let total = {
            let inner = self.inner.lock();
            inner.accumulated.len()
        };
        for hook in to_notify {
            hook(chunk, total);
        }
    }

    /// Removes `token`'s callback, delivering it a `taskCancelled` error. Returns `true`
    /// if the callback set became empty as a result (the caller should abort the
    /// underlying HTTP request).
    pub fn cancel(&self, token: CancelToken) -> bool {
        let (removed, should_abort) = {
            let mut inner = self.inner.lock();
            let removed = inner.callbacks.remove(&token);
            let should_abort = inner.callbacks.is_empty();
            if should_abort && matches!(inner.state, SessionState::Idle | SessionState::Running) {
                inner.state = SessionState::Cancelled;
            }
            (removed, should_abort)
        };
        if let Some(cb) = removed {
            (cb.on_completed)(Err(SessionError::Request(RequestError::TaskCancelled {
                token,
            })));
        }
        should_abort
    }

    /// Cancels every registered token, in turn.
    pub fn force_cancel(&self) {
        let tokens: Vec<CancelToken> = {
            let inner = self.inner.lock();
            inner.callbacks.keys().copied().collect()
        };
        for token in tokens {
            self.cancel(token);
        }
    }

    /// Atomic terminal transition. Snapshots and clears the callback list, then fans
    /// `outcome` out to every subscriber in registration order. A no-op if the task is
    /// already terminal.
    pub fn complete(&self, outcome: Result<(), SessionError>) {
        let (callbacks, result): (Vec<CompletionHook>, SessionResult) = {
            let mut inner = self.inner.lock();
            if matches!(inner.state, SessionState::Completed | SessionState::Cancelled) {
                return;
            }
            inner.state = SessionState::Completed;
            let callbacks: Vec<CompletionHook> =
                inner.callbacks.values().map(|cb| cb.on_completed.clone()).collect();
            inner.callbacks.clear();
            let result = match outcome {
                Ok(()) => Ok(Arc::from(inner.accumulated.clone().into_boxed_slice())),
                Err(e) => Err(e),
            };
            (callbacks, result)
        };
        for hook in callbacks {
            hook(result.clone());
        }
    }

    /// True once the callback set is empty, making this task eligible for removal from
    /// its [`SessionManager`].
    pub fn is_removable(&self) -> bool {
        self.inner.lock().callbacks.is_empty()
    }
}

/// A caller-facing handle: a reference to a [`SessionTask`] plus this subscriber's
/// cancel token.
#[derive(Clone)]
pub struct DownloadTask {
    url: Url,
    task: Arc<SessionTask>,
    token: CancelToken,
}

impl DownloadTask {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn task(&self) -> &Arc<SessionTask> {
        &self.task
    }

    /// Idempotent: cancelling twice is a no-op the second time.
    pub fn cancel(&self) {
        self.task.cancel(self.token);
    }
}

/// Keyed registry of in-flight [`SessionTask`]s; the sole authority on "is there a
/// concurrent download for this URL already" (spec §5).
#[derive(Default)]
pub struct SessionManager {
    next_task_id: AtomicU64,
    tasks: Mutex<HashMap<Url, Arc<SessionTask>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh, `Idle` `SessionTask` for `url` and registers the first
    /// subscriber on it.
    pub fn add(
        &self,
        url: Url,
        on_completed: CompletionHook,
        on_data_received: Option<DataHook>,
        on_redirect: Option<RedirectHook>,
    ) -> DownloadTask {
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(SessionTask::new(url.clone(), task_id));
        let token = task
            .add_callback(on_completed, on_data_received, on_redirect)
            .expect("a freshly created task always accepts its first callback");
        self.tasks.lock().insert(url.clone(), task.clone());
        DownloadTask { url, task, token }
    }

    /// Adds a subscriber to an already-registered task. Returns `None` if the task has
    /// reached a terminal state between lookup and append.
    pub fn append(
        &self,
        task: &Arc<SessionTask>,
        on_completed: CompletionHook,
        on_data_received: Option<DataHook>,
        on_redirect: Option<RedirectHook>,
    ) -> Option<DownloadTask> {
        task.add_callback(on_completed, on_data_received, on_redirect)
            .map(|token| DownloadTask {
                url: task.url.clone(),
                task: task.clone(),
                token,
            })
    }

    /// Atomically joins `url`'s existing task or creates a fresh one, under a single
    /// lock acquisition — unlike a separate `task_for_url`-then-`add`/`append`, this
    /// can't race two concurrent first-callers into creating two `SessionTask`s for the
    /// same `url` (spec §3 "at most one SessionTask per url", testable property 1).
    /// Returns the caller's handle plus whether a brand-new task was created (the
    /// caller should only start the underlying fetch when this is `true`).
    pub fn add_or_append(
        &self,
        url: Url,
        on_completed: CompletionHook,
        on_data_received: Option<DataHook>,
        on_redirect: Option<RedirectHook>,
    ) -> (DownloadTask, bool) {
        let mut tasks = self.tasks.lock();
        if let Some(existing) = tasks.get(&url) {
            if let Some(token) = existing.add_callback(
                on_completed.clone(),
                on_data_received.clone(),
                on_redirect.clone(),
            ) {
                return (
                    DownloadTask {
                        url,
                        task: existing.clone(),
                        token,
                    },
                    false,
                );
            }
        }
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(SessionTask::new(url.clone(), task_id));
        let token = task
            .add_callback(on_completed, on_data_received, on_redirect)
            .expect("a freshly created task always accepts its first callback");
        tasks.insert(url.clone(), task.clone());
        (DownloadTask { url, task, token }, true)
    }

    pub fn task_for_url(&self, url: &Url) -> Option<Arc<SessionTask>> {
        self.tasks.lock().get(url).cloned()
    }

    pub fn cancel(&self, url: &Url) {
        let task = self.tasks.lock().get(url).cloned();
        if let Some(task) = task {
            task.force_cancel();
        }
        self.remove_if_removable(url);
    }

    pub fn cancel_all(&self) {
        let tasks: Vec<Arc<SessionTask>> = self.tasks.lock().values().cloned().collect();
        for task in &tasks {
            task.force_cancel();
        }
        self.tasks.lock().clear();
    }

    /// Drops `url` from the registry unconditionally. Callers should prefer
    /// [`Self::remove_if_removable`] unless the task is already known to be terminal.
    pub fn remove(&self, url: &Url) {
        self.tasks.lock().remove(url);
    }

    pub fn remove_if_removable(&self, url: &Url) {
        let mut guard = self.tasks.lock();
        let is_removable = guard.get(url).map(|t| t.is_removable()).unwrap_or(false);
        if is_removable {
            guard.remove(url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as StdMutex;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn fans_out_terminal_result_to_all_subscribers_in_registration_order() {
        let manager = SessionManager::new();
        let order: Arc<StdMutex<Vec<u32>>> = Arc::new(StdMutex::new(Vec::new()));

        let order1 = order.clone();
        let download1 = manager.add(
            url("https://example.com/a.png"),
            Arc::new(move |_result| order1.lock().push(1)),
            None,
            None,
        );
        let task = download1.task.clone();
        let order2 = order.clone();
        manager
            .append(&task, Arc::new(move |_result| order2.lock().push(2)), None, None)
            .unwrap();

        task.resume();
        task.data_received(b"hello");
        task.complete(Ok(()));

        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn cancelling_one_subscriber_does_not_affect_others() {
        let manager = SessionManager::new();
        let cancelled = Arc::new(StdMutex::new(false));
        let completed = Arc::new(StdMutex::new(false));

        let cancelled1 = cancelled.clone();
        let download1 = manager.add(
            url("https://example.com/a.png"),
            Arc::new(move |result| {
                if result.is_err() {
                    *cancelled1.lock() = true;
                }
            }),
            None,
            None,
        );
        let task = download1.task.clone();
        let completed2 = completed.clone();
        manager
            .append(
                &task,
                Arc::new(move |result| {
                    if result.is_ok() {
                        *completed2.lock() = true;
                    }
                }),
                None,
                None,
            )
            .unwrap();

        task.resume();
        let should_abort = download1.task.cancel(download1.token);
        assert!(!should_abort, "one remaining subscriber should keep the task alive");
        assert!(*cancelled.lock());

        task.complete(Ok(()));
        assert!(*completed.lock());
    }

    #[test]
    fn cancelling_last_subscriber_reports_abort() {
        let manager = SessionManager::new();
        let download = manager.add(url("https://example.com/a.png"), Arc::new(|_| {}), None, None);
        let should_abort = download.task.cancel(download.token);
        assert!(should_abort);
        assert!(download.task.is_removable());
    }

    #[test]
    fn no_callback_may_register_after_completion() {
        let manager = SessionManager::new();
        let download = manager.add(url("https://example.com/a.png"), Arc::new(|_| {}), None, None);
        download.task.resume();
        download.task.complete(Ok(()));
        assert!(manager.append(&download.task, Arc::new(|_| {}), None, None).is_none());
    }
}
