//! A throwaway `tiny_http` server for exercising the downloader without a real network.
//!
//! Adapted from the reference crate's `test_utils::server` (`mock_file_server`), trimmed
//! to what the downloader/retry tests need: a scripted sequence of responses, each
//! servable with an artificial delay, served in order and then held on the last entry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tiny_http::{Header, Response, Server};

/// One canned response in a [`MockServer`]'s sequence.
pub struct ScriptedResponse {
    status: u16,
    body: Vec<u8>,
    headers: Vec<(String, String)>,
    delay: Duration,
}

impl ScriptedResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            headers: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            headers: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }
}

/// Serves a fixed sequence of [`ScriptedResponse`]s on `127.0.0.1:0`, one per incoming
/// request, repeating the final entry once the sequence is exhausted (spec §8 property 9
/// needs this to exercise retry bounds past the scripted sequence length).
pub struct MockServer {
    base_url: String,
    hit_count: Arc<AtomicUsize>,
    _handle: thread::JoinHandle<()>,
}

impl MockServer {
    pub fn serve_sequence(responses: Vec<ScriptedResponse>) -> Self {
        assert!(!responses.is_empty(), "a mock server needs at least one response");
        let server = Server::http("127.0.0.1:0").expect("bind mock http server");
        let addr = server.server_addr().to_ip().expect("server bound to an ip");
        let base_url = format!("http://{addr}");
        let hit_count = Arc::new(AtomicUsize::new(0));
        let hit_count_thread = hit_count.clone();
        let responses = Arc::new(responses);

        let handle = thread::Builder::new()
            .name("mock-http-server".into())
            .spawn(move || {
                for request in server.incoming_requests() {
                    let index = hit_count_thread.fetch_add(1, Ordering::SeqCst);
                    let scripted = responses
                        .get(index)
                        .or_else(|| responses.last())
                        .expect("non-empty response sequence");

                    if !scripted.delay.is_zero() {
                        thread::sleep(scripted.delay);
                    }

                    let mut response =
                        Response::from_data(scripted.body.clone()).with_status_code(scripted.status);
                    for (name, value) in &scripted.headers {
                        if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                            response.add_header(header);
                        }
                    }
                    let _ = request.respond(response);
                }
            })
            .expect("spawn mock http server thread");

        Self {
            base_url,
            hit_count,
            _handle: handle,
        }
    }

    pub fn serve_once(response: ScriptedResponse) -> Self {
        Self::serve_sequence(vec![response])
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Requests served so far, useful for asserting at-most-one-inflight / retry-count
    /// properties.
    pub fn hits(&self) -> usize {
        self.hit_count.load(Ordering::SeqCst)
    }
}
