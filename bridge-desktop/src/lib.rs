//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux):
//! - `HttpClient` using `reqwest` with streamed bodies and cancellation
//! - `HttpServerFactory` using `axum` on the loopback interface
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{AxumServerFactory, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! let http = Arc::new(ReqwestHttpClient::new());
//! let server = Arc::new(AxumServerFactory::new());
//! // Hand both to core_runtime::config::ProviderConfig::builder()
//! ```

mod http;
mod server;

pub use http::ReqwestHttpClient;
pub use server::{AxumCallbackServer, AxumServerFactory};
