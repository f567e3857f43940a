//! # QR Generator Net
//!
//! Request/response model and HTTP loading for the offline worker.
//!
//! ## Design Goals
//!
//! 1. **Single-read bodies**: reading a response body consumes the response;
//!    copies are taken explicitly with [`Response::tee`]
//! 2. **Pluggable transport**: the worker talks to the network through the
//!    [`Fetcher`] trait so tests can script outcomes
//! 3. **Async HTTP**: [`ResourceLoader`] streams bodies from `reqwest`

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub use url::Url;

pub mod loader;

pub use loader::{LoaderConfig, ResourceLoader};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Body stream failed: {0}")]
    Body(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl NetError {
    /// Whether the error means the transport never produced a response.
    pub fn is_transport(&self) -> bool {
        match self {
            NetError::RequestFailed(_) => true,
            NetError::HttpError(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            NetError::InvalidUrl(_) | NetError::Body(_) => false,
        }
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Destination {
    /// No destination (fetch(), XHR, beacons).
    #[default]
    Empty,
    /// Top-level or nested document navigation.
    Document,
    Style,
    Script,
    Font,
    Image,
    Manifest,
    Audio,
    Video,
    Worker,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Empty => "",
            Destination::Document => "document",
            Destination::Style => "style",
            Destination::Script => "script",
            Destination::Font => "font",
            Destination::Image => "image",
            Destination::Manifest => "manifest",
            Destination::Audio => "audio",
            Destination::Video => "video",
            Destination::Worker => "worker",
        }
    }

    /// Full document navigation.
    pub fn is_document(&self) -> bool {
        matches!(self, Destination::Document)
    }
}

impl FromStr for Destination {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" => Destination::Empty,
            "document" => Destination::Document,
            "style" => Destination::Style,
            "script" => Destination::Script,
            "font" => Destination::Font,
            "image" => Destination::Image,
            "manifest" => Destination::Manifest,
            "audio" => Destination::Audio,
            "video" => Destination::Video,
            "worker" => Destination::Worker,
            other => {
                return Err(NetError::RequestFailed(format!(
                    "unknown request destination '{other}'"
                )))
            }
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP request.
///
/// `Clone` is the explicit duplication step: the worker fetches a clone
/// and keeps the original as the cache key.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub destination: Destination,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            destination: Destination::Empty,
            timeout: None,
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Create a document navigation request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).destination(Destination::Document)
    }

    /// Parse a URL and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// How the response relates to the requesting origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response, fully readable.
    #[default]
    Basic,
    /// Cross-origin response shared through CORS.
    Cors,
    /// Cross-origin response without CORS; contents unusable.
    Opaque,
    /// Network error placeholder.
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Basic => "basic",
            ResponseType::Cors => "cors",
            ResponseType::Opaque => "opaque",
            ResponseType::Error => "error",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response body variants.
#[derive(Debug)]
enum ResponseBody {
    /// Full body already loaded.
    Full(Bytes),
    /// Streaming body.
    Stream(mpsc::Receiver<Result<Bytes, NetError>>),
    /// Empty.
    Empty,
}

/// HTTP response.
///
/// The body can be read once: `bytes`, `text` and `json` take `self`.
#[derive(Debug)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    body: ResponseBody,
}

impl Response {
    /// Create a response with a fully loaded body.
    pub fn new(
        url: Url,
        status: StatusCode,
        headers: HeaderMap,
        response_type: ResponseType,
        body: Bytes,
    ) -> Self {
        let body = if body.is_empty() {
            ResponseBody::Empty
        } else {
            ResponseBody::Full(body)
        };
        Self {
            url,
            status,
            headers,
            response_type,
            body,
        }
    }

    /// Create a response whose body arrives on a channel.
    pub fn streaming(
        url: Url,
        status: StatusCode,
        headers: HeaderMap,
        response_type: ResponseType,
        chunks: mpsc::Receiver<Result<Bytes, NetError>>,
    ) -> Self {
        Self {
            url,
            status,
            headers,
            response_type,
            body: ResponseBody::Stream(chunks),
        }
    }

    /// Create a plain-text response.
    pub fn text_plain(url: Url, status: StatusCode, text: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );
        Self::new(
            url,
            status,
            headers,
            ResponseType::Basic,
            Bytes::from(text.into()),
        )
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Parsed `Content-Type` header.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Buffer the body and return a copy of it, leaving the response readable.
    ///
    /// If the stream fails, the response keeps a body that yields the chunks
    /// received so far followed by the original error, and the copy is
    /// abandoned.
    pub async fn tee(&mut self) -> Result<Bytes, NetError> {
        let body = std::mem::replace(&mut self.body, ResponseBody::Empty);
        let bytes = match body {
            ResponseBody::Full(b) => b,
            ResponseBody::Stream(rx) => match buffer_stream(rx).await {
                Ok(b) => b,
                Err((partial, error)) => {
                    let copy_error = NetError::Body(error.to_string());
                    self.body = ResponseBody::Stream(replay(partial, error));
                    return Err(copy_error);
                }
            },
            ResponseBody::Empty => Bytes::new(),
        };
        if !bytes.is_empty() {
            self.body = ResponseBody::Full(bytes.clone());
        }
        Ok(bytes)
    }

    /// Get the body as bytes.
    pub async fn bytes(self) -> Result<Bytes, NetError> {
        match self.body {
            ResponseBody::Full(b) => Ok(b),
            ResponseBody::Stream(rx) => collect_stream(rx).await,
            ResponseBody::Empty => Ok(Bytes::new()),
        }
    }

    /// Get the body as text.
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| NetError::Body(e.to_string()))
    }

    /// Get the body as JSON.
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| NetError::Body(e.to_string()))
    }
}

async fn collect_stream(rx: mpsc::Receiver<Result<Bytes, NetError>>) -> Result<Bytes, NetError> {
    buffer_stream(rx).await.map_err(|(_, error)| error)
}

/// Drain a body stream, keeping whatever arrived before a failure.
async fn buffer_stream(
    mut rx: mpsc::Receiver<Result<Bytes, NetError>>,
) -> Result<Bytes, (Bytes, NetError)> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = rx.recv().await {
        match chunk {
            Ok(bytes) => buf.extend_from_slice(&bytes),
            Err(error) => return Err((buf.freeze(), error)),
        }
    }
    Ok(buf.freeze())
}

/// A finished stream that yields `partial` and then fails with `error`.
fn replay(partial: Bytes, error: NetError) -> mpsc::Receiver<Result<Bytes, NetError>> {
    let (tx, rx) = mpsc::channel(2);
    if !partial.is_empty() {
        let _ = tx.try_send(Ok(partial));
    }
    let _ = tx.try_send(Err(error));
    rx
}

/// Transport the worker uses to reach the network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform a single network attempt.
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}
