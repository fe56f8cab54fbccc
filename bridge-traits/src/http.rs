//! HTTP Client Abstraction
//!
//! A single request/response exchange with a streamed response body,
//! progress reporting and cooperative cancellation.
//!
//! Cancellation is flag based: the [`HttpCallback`] carries a
//! [`CancellationToken`] that implementations check while sending and that
//! [`HttpResponse::bytes`] / [`HttpResponse::write_to`] check between chunks.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn bearer_token(self, token: impl Into<String>) -> Self {
        self.header("Authorization", format!("Bearer {}", token.into()))
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let json = serde_json::to_vec(body).map_err(|e| {
            BridgeError::OperationFailed(format!("JSON serialization failed: {}", e))
        })?;
        self.body = Some(Bytes::from(json));
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Progress callback receiving `(total, transferred)` byte counts.
///
/// `total` is zero when the size is not known up front.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Response body as a stream of chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Per-request cancellation flag and progress observers.
#[derive(Clone, Default)]
pub struct HttpCallback {
    cancel: CancellationToken,
    download_progress: Option<ProgressFn>,
    upload_progress: Option<ProgressFn>,
}

impl HttpCallback {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            download_progress: None,
            upload_progress: None,
        }
    }

    pub fn with_download_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.download_progress = progress;
        self
    }

    pub fn with_upload_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.upload_progress = progress;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once the owning operation has been cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn report_download(&self, total: u64, received: u64) {
        if let Some(progress) = &self.download_progress {
            progress(total, received);
        }
    }

    pub fn report_upload(&self, total: u64, sent: u64) {
        if let Some(progress) = &self.upload_progress {
            progress(total, sent);
        }
    }
}

impl fmt::Debug for HttpCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCallback")
            .field("cancelled", &self.is_cancelled())
            .field("download_progress", &self.download_progress.is_some())
            .field("upload_progress", &self.upload_progress.is_some())
            .finish()
    }
}

/// HTTP response with a streamed body
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ByteStream,
}

impl HttpResponse {
    pub fn new(status: u16, body: ByteStream) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    /// Response whose whole body is already in memory.
    pub fn from_bytes(status: u16, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        let length = body.len();
        let stream = if body.is_empty() {
            stream::empty().boxed()
        } else {
            stream::once(async move { Ok(body) }).boxed()
        };
        Self::new(status, stream).with_header("Content-Length", length.to_string())
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if response status indicates a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if response status indicates a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    pub fn content_length(&self) -> Option<u64> {
        find_header(&self.headers, "content-length").and_then(|v| v.trim().parse().ok())
    }

    /// Collects the body, checking the cancellation flag between chunks.
    pub async fn bytes(mut self, callback: &HttpCallback) -> Result<Bytes> {
        let total = self.content_length().unwrap_or(0);
        let mut buffer = BytesMut::new();
        while let Some(chunk) = next_chunk(&mut self.body, callback).await? {
            buffer.extend_from_slice(&chunk);
            callback.report_download(total, buffer.len() as u64);
        }
        Ok(buffer.freeze())
    }

    /// Collects the body and decodes it as JSON.
    pub async fn json<T: DeserializeOwned>(self, callback: &HttpCallback) -> Result<T> {
        let body = self.bytes(callback).await?;
        serde_json::from_slice(&body).map_err(|e| {
            BridgeError::OperationFailed(format!("JSON deserialization failed: {}", e))
        })
    }

    /// Streams the body into `writer`, returning the number of bytes written.
    pub async fn write_to<W>(mut self, writer: &mut W, callback: &HttpCallback) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let total = self.content_length().unwrap_or(0);
        let mut written = 0u64;
        while let Some(chunk) = next_chunk(&mut self.body, callback).await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
            callback.report_download(total, written);
        }
        writer.flush().await?;
        Ok(written)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

async fn next_chunk(body: &mut ByteStream, callback: &HttpCallback) -> Result<Option<Bytes>> {
    if callback.is_cancelled() {
        return Err(BridgeError::Aborted);
    }
    tokio::select! {
        biased;
        _ = callback.cancelled() => Err(BridgeError::Aborted),
        chunk = body.next() => chunk.transpose(),
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Async HTTP client trait
///
/// Implementations issue exactly one request per call: no retries, no token
/// handling. Authorization headers are attached by the caller.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpCallback, HttpClient, HttpMethod, HttpRequest};
///
/// async fn fetch(client: &dyn HttpClient) -> bridge_traits::error::Result<bytes::Bytes> {
///     let callback = HttpCallback::default();
///     let request = HttpRequest::new(HttpMethod::Get, "https://api.example.com/data")
///         .bearer_token("token");
///     client.send(request, callback.clone()).await?.bytes(&callback).await
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns once the response head is available.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Aborted`] when the callback is cancelled before
    /// the response arrives, and [`BridgeError::OperationFailed`] for
    /// transport failures. Non-2xx statuses are not errors.
    async fn send(&self, request: HttpRequest, callback: HttpCallback) -> Result<HttpResponse>;
}
