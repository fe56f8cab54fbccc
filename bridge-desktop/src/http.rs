//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpCallback, HttpClient, HttpMethod, HttpRequest, HttpResponse},
};
use bytes::Bytes;
use futures_util::{stream, StreamExt, TryStreamExt};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Upload bodies are handed to reqwest in chunks of this size so progress
/// and cancellation are observed while sending.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Reqwest-based HTTP client implementation
///
/// Sends each request exactly once. The response body is exposed as a
/// stream; the caller decides whether to buffer it or pipe it to a sink.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Self {
        Self::with_connect_timeout(Duration::from_secs(10))
    }

    /// Create a new HTTP client with a custom connect timeout.
    ///
    /// No overall request timeout is set: long transfers are bounded by
    /// cancellation instead.
    pub fn with_connect_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(timeout)
            .pool_max_idle_per_host(10)
            .user_agent(concat!("cloudstore/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });

        Self { client }
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    /// Build reqwest request from bridge request
    fn build_request(&self, request: HttpRequest, callback: &HttpCallback) -> reqwest::RequestBuilder {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        let has_length = request.header_value("content-length").is_some();
        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(body) = request.body {
            if !has_length {
                req = req.header(reqwest::header::CONTENT_LENGTH, body.len());
            }
            req = req.body(reqwest::Body::wrap_stream(upload_stream(body, callback.clone())));
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits an upload body into chunks, reporting progress and stopping once
/// the callback is cancelled.
fn upload_stream(
    body: Bytes,
    callback: HttpCallback,
) -> impl futures_util::Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    let total = body.len();
    let chunks: Vec<Bytes> = (0..total)
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| body.slice(start..(start + UPLOAD_CHUNK_SIZE).min(total)))
        .collect();

    let mut sent = 0usize;
    stream::iter(chunks).map(move |chunk| {
        if callback.is_cancelled() {
            return Err(std::io::Error::other("upload aborted"));
        }
        sent += chunk.len();
        callback.report_upload(total as u64, sent as u64);
        Ok(chunk)
    })
}

fn convert_error(error: reqwest::Error) -> BridgeError {
    if error.is_timeout() {
        BridgeError::OperationFailed("Request timed out".to_string())
    } else if error.is_connect() {
        BridgeError::OperationFailed(format!("Connection failed: {}", error))
    } else {
        BridgeError::OperationFailed(error.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest, callback: HttpCallback) -> Result<HttpResponse> {
        debug!(method = %request.method, url = %request.url, "Sending HTTP request");

        let builder = self.build_request(request, &callback);
        let response = tokio::select! {
            biased;
            _ = callback.cancelled() => return Err(BridgeError::Aborted),
            response = builder.send() => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(_) if callback.is_cancelled() => return Err(BridgeError::Aborted),
            Err(e) => {
                warn!(error = %e, "HTTP request failed");
                return Err(convert_error(e));
            }
        };

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        debug!(status, "Received HTTP response");

        let body = response.bytes_stream().map_err(convert_error).boxed();
        let mut response = HttpResponse::new(status, body);
        response.headers = headers;
        Ok(response)
    }
}
