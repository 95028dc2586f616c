//! The HTTP request/response shapes and the pluggable executor that performs them
//! (spec §4.5/§6).
//!
//! Grounded on the reference crate's `StandardRequest`/`StandardResp`/`http_call_req`
//! (`src/image/cache/request.rs`): a thin adapter over `ureq`, carrying just the request
//! parts the spec cares about (method is always `GET`).

use std::time::Duration;

use http::{HeaderMap, Method, StatusCode};
use url::Url;

/// A fully-built request, the output of [`crate::downloader::Downloader`]'s strict
/// build order (spec §4.5).
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub timeout: Duration,
    pub pipelining: bool,
    pub allows_constrained_network_access: bool,
}

impl Request {
    pub fn get(url: Url, timeout: Duration) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            timeout,
            pipelining: false,
            allows_constrained_network_access: true,
        }
    }
}

pub struct ExecutedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Performs one already-built [`Request`], invoking `on_chunk` as body bytes arrive so
/// a caller can fan them into a `SessionTask`'s data-received side effects. `on_chunk`
/// returns `false` to abort the read early (the last subscriber cancelled); an
/// implementation must stop pulling from the connection as soon as that happens rather
/// than draining the rest of the body (testable property 8). The default implementation
/// is [`UreqExecutor`]; this seam exists so a caller can swap the transport in tests or
/// for a non-blocking client.
pub trait RequestExecutor: Send + Sync {
    fn execute(
        &self,
        request: &Request,
        on_chunk: &mut dyn FnMut(&[u8]) -> bool,
    ) -> anyhow::Result<ExecutedResponse>;
}

/// The default, blocking, `ureq`-backed executor. Intended to run on its own thread per
/// `SessionTask`, since the crate has no async runtime of its own.
pub struct UreqExecutor {
    agent: ureq::Agent,
}

impl Default for UreqExecutor {
    fn default() -> Self {
        Self {
            // Redirects are followed by `Downloader::spawn_fetch` instead of here, so
            // that a per-subscriber redirect handler (spec §4.4/§9) gets a chance to
            // inspect or veto each hop; `ureq`'s built-in following has no such seam.
            agent: ureq::AgentBuilder::new().redirects(0).build(),
        }
    }
}

impl UreqExecutor {
    pub fn new(agent: ureq::Agent) -> Self {
        Self { agent }
    }
}

const CHUNK_SIZE: usize = 8 * 1024;
/// Mirrors the reference crate's `http_call_req` body size cap.
const BODY_SIZE_LIMIT: u64 = 20 * 1024 * 1024;

impl RequestExecutor for UreqExecutor {
    fn execute(
        &self,
        request: &Request,
        on_chunk: &mut dyn FnMut(&[u8]) -> bool,
    ) -> anyhow::Result<ExecutedResponse> {
        tracing::debug!(url = %request.url, "dispatching request");

        let mut builder = self
            .agent
            .request_url("GET", &request.url)
            .timeout(request.timeout);
        for (name, value) in request.headers.iter() {
            if let Ok(value_str) = value.to_str() {
                builder = builder.set(name.as_str(), value_str);
            }
        }

        let response = match builder.call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(err) => return Err(err.into()),
        };

        let status = StatusCode::from_u16(response.status())?;
        let mut headers = HeaderMap::new();
        for name in response.headers_names() {
            if let Some(value) = response.header(&name) {
                if let (Ok(name), Ok(value)) = (
                    http::HeaderName::try_from(name.as_str()),
                    http::HeaderValue::from_str(value),
                ) {
                    headers.append(name, value);
                }
            }
        }

        let mut reader = response.into_reader().take(BODY_SIZE_LIMIT);
        let mut body = Vec::new();
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let read = std::io::Read::read(&mut reader, &mut buf)?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&buf[..read]);
            if !on_chunk(&buf[..read]) {
                // The subscriber set emptied mid-read; stop pulling from the
                // connection instead of draining a body nobody wants anymore.
                break;
            }
        }

        Ok(ExecutedResponse {
            status,
            headers,
            body,
        })
    }
}
