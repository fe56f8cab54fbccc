//! Local HTTP Server Abstraction
//!
//! A minimal server used to receive OAuth redirects on `localhost`. Every
//! request, whatever its path, is handed to a single synchronous handler that
//! returns the HTML body to serve.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// An inbound request as seen by the handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackRequest {
    /// Request path without the query string, e.g. `/auth`.
    pub url: String,
    /// Decoded query arguments.
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

impl CallbackRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn query_arg(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

/// Handler invoked for every request; returns the response body.
pub type RequestHandler = Arc<dyn Fn(CallbackRequest) -> String + Send + Sync>;

/// A running server.
#[async_trait]
pub trait HttpServer: Send + Sync {
    /// Port the listener is bound to.
    fn port(&self) -> u16;

    /// Stops accepting requests and releases the listener.
    async fn stop(self: Box<Self>) -> Result<()>;
}

impl fmt::Debug for dyn HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("port", &self.port())
            .finish()
    }
}

/// Starts servers on demand.
///
/// Passing port `0` binds an ephemeral port; the chosen port is reported by
/// [`HttpServer::port`].
#[async_trait]
pub trait HttpServerFactory: Send + Sync {
    async fn start(&self, port: u16, handler: RequestHandler) -> Result<Box<dyn HttpServer>>;
}
