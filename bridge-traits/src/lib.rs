//! # Host Bridge Traits
//!
//! Capabilities the core consumes but does not implement itself.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - one request per call, streamed body,
//!   cooperative cancellation through [`HttpCallback`](http::HttpCallback)
//! - [`HttpServerFactory`](server::HttpServerFactory) - short-lived local
//!   server used to capture OAuth redirects
//! - [`LoggerSink`](logging::LoggerSink) - forward structured logs to the host
//!
//! Desktop implementations live in `bridge-desktop`. Other hosts inject
//! their own adapters through `core_runtime::config::ProviderConfig`, which
//! fails fast with a `CapabilityMissing` error when one is absent.
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert platform errors into it and report cancellation as
//! [`BridgeError::Aborted`](error::BridgeError::Aborted) rather than as a
//! generic failure.

pub mod error;
pub mod http;
pub mod logging;
pub mod server;

pub use error::BridgeError;

pub use http::{
    ByteStream, HttpCallback, HttpClient, HttpMethod, HttpRequest, HttpResponse, ProgressFn,
};
pub use logging::{LogEntry, LogLevel, LoggerSink};
pub use server::{CallbackRequest, HttpServer, HttpServerFactory, RequestHandler};
