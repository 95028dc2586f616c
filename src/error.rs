//! The closed error kinds surfaced across component boundaries.
//!
//! Internal plumbing (filesystem glue, attribute parsing) still leans on
//! `anyhow::Result` the way the reference crate's disk code does; everything that
//! crosses a public boundary is converted into one of the enums below first.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::session::CancelToken;

/// Errors building or dispatching a request, before a response is ever seen.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("request modifier returned an empty request")]
    EmptyRequest,
    #[error("request modifier produced an invalid url: {0}")]
    InvalidUrl(String),
    #[error("task was cancelled (token {token:?})")]
    TaskCancelled { token: CancelToken },
}

/// Errors observed once a response (or a terminal session event) arrives.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response was not a valid http response for {url}")]
    InvalidUrlResponse { url: String },
    #[error("invalid http status code {status} for {url}")]
    InvalidHttpStatusCode { url: String, status: u16 },
    #[error("underlying http session failed: {0}")]
    UrlSessionError(String),
    #[error("no response was ever received for {url}")]
    NoUrlResponse { url: String },
    #[error("the data-modifying hook rejected the downloaded bytes for {url}")]
    DataModifyingFailed { url: String },
    #[error("delegate cancelled the response for {url}")]
    CancelledByDelegate { url: String },
}

/// Errors from the memory/disk cache layers.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed enumerating cache directory {0}")]
    FileEnumeratorCreationFailed(PathBuf),
    #[error("cache directory {0} contained an entry that could not be read")]
    InvalidFileEnumeratorContent(PathBuf),
    #[error("failed creating cache directory {path}: {source}")]
    CannotCreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed loading data from disk at {path}: {source}")]
    CannotLoadDataFromDisk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed converting value to bytes for key {key}: {source}")]
    CannotConvertToData {
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed creating cache file {path} for key {key}: {source}")]
    CannotCreateCacheFile {
        path: PathBuf,
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed setting cache file attributes on {path}: {source}")]
    CannotSetCacheFileAttribute {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed serializing image for key {key}")]
    CannotSerializeImage { key: String },
    #[error("disk storage for {key} is not ready")]
    DiskStorageNotReady { key: String },
    #[error("failed reading url resource metadata for key {key} at {path}: {source}")]
    InvalidUrlResource {
        key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from running a processor over downloaded bytes.
#[derive(Debug, Clone, Error)]
#[error("processor {processor} failed to process {item_len} bytes")]
pub struct ProcessorError {
    pub processor: String,
    pub item_len: usize,
}

/// The top-level error returned by `Manager`/`Downloader` public entry points.
///
/// `Response` carries an `Arc<ResponseError>` rather than an owned `ResponseError`:
/// a single `SessionTask` failure fans the same `Arc<ResponseError>` out to every
/// subscriber (spec §7 "a failure on a shared SessionTask fans out to all subscribers
/// identically"), so there is no single owning subscriber to move it out of.
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Response(Arc<ResponseError>),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error("retrieval was cancelled")]
    Cancelled,
}
