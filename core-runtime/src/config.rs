//! # Provider Configuration
//!
//! Everything a cloud provider needs at construction time: the restored
//! session (token and hints) plus the host capabilities it runs on.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - issues API requests (desktop default: reqwest)
//! - `HttpServerFactory` - captures OAuth redirects (desktop default: axum)
//!
//! When the `desktop-shims` feature is enabled, desktop defaults are injected
//! automatically if not provided. Otherwise `build()` fails fast with
//! [`Error::CapabilityMissing`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::ProviderConfig;
//!
//! let config = ProviderConfig::builder()
//!     .token(saved_refresh_token)
//!     .hint("client_id", "my-client-id")
//!     .hint("redirect_uri_port", "8080")
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::EventBus;
use bridge_traits::{HttpClient, HttpServerFactory};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Provider-specific key/value configuration, persisted with the session.
pub type Hints = BTreeMap<String, String>;

/// Hint keys whose values are numeric.
const NUMERIC_HINTS: &[&str] = &["redirect_uri_port"];

/// Construction-time configuration for a cloud provider.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Refresh token restored from a previous session, if any.
    pub token: Option<String>,

    /// Provider hints (client credentials, redirect settings, page templates).
    pub hints: Hints,

    pub http_client: Arc<dyn HttpClient>,

    pub http_server: Arc<dyn HttpServerFactory>,

    /// Bus receiving authorization events.
    pub event_bus: EventBus,

    /// When false, authorization never starts the local callback server and
    /// fails once the refresh token is rejected.
    pub interactive_authorization: bool,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("hints", &self.hints.keys().collect::<Vec<_>>())
            .field("http_client", &"HttpClient { ... }")
            .field("http_server", &"HttpServerFactory { ... }")
            .field("event_bus", &self.event_bus)
            .field("interactive_authorization", &self.interactive_authorization)
            .finish()
    }
}

impl ProviderConfig {
    pub fn builder() -> ProviderConfigBuilder {
        ProviderConfigBuilder::default()
    }

    pub fn hint(&self, key: &str) -> Option<&str> {
        self.hints.get(key).map(String::as_str)
    }

    /// Validates hint keys and numeric hint values.
    pub fn validate(&self) -> Result<()> {
        if self.hints.keys().any(|key| key.is_empty()) {
            return Err(Error::Config("Hint keys cannot be empty".to_string()));
        }

        for key in NUMERIC_HINTS {
            if let Some(value) = self.hint(key) {
                value.parse::<u16>().map_err(|_| {
                    Error::Config(format!("Hint '{}' must be a port number, got '{}'", key, value))
                })?;
            }
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient. \
                 Other hosts: inject a platform-native adapter."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_server_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpServerFactory".to_string(),
        message: "No callback server implementation provided. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default AxumServerFactory. \
                 Other hosts: inject a factory able to bind a loopback port."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_server() -> Result<Arc<dyn HttpServerFactory>> {
    Ok(Arc::new(bridge_desktop::AxumServerFactory::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_server() -> Result<Arc<dyn HttpServerFactory>> {
    Err(http_server_missing_error())
}

/// Builder for constructing [`ProviderConfig`] instances.
#[derive(Default)]
pub struct ProviderConfigBuilder {
    token: Option<String>,
    hints: Hints,
    http_client: Option<Arc<dyn HttpClient>>,
    http_server: Option<Arc<dyn HttpServerFactory>>,
    event_bus: Option<EventBus>,
    interactive_authorization: Option<bool>,
}

impl ProviderConfigBuilder {
    /// Sets the refresh token restored from a saved session.
    ///
    /// Empty strings are treated as "no token".
    pub fn token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn hints(mut self, hints: Hints) -> Self {
        self.hints.extend(hints);
        self
    }

    pub fn hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn http_server(mut self, factory: Arc<dyn HttpServerFactory>) -> Self {
        self.http_server = Some(factory);
        self
    }

    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn interactive_authorization(mut self, enabled: bool) -> Self {
        self.interactive_authorization = Some(enabled);
        self
    }

    /// Builds the configuration, injecting platform defaults where allowed.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when a bridge is absent and no default
    ///   is available
    /// - [`Error::Config`] when a hint is malformed
    pub fn build(self) -> Result<ProviderConfig> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let http_server = match self.http_server {
            Some(factory) => factory,
            None => provide_default_http_server()?,
        };

        let config = ProviderConfig {
            token: self.token,
            hints: self.hints,
            http_client,
            http_server,
            event_bus: self.event_bus.unwrap_or_default(),
            interactive_authorization: self.interactive_authorization.unwrap_or(true),
        };

        config.validate()?;

        Ok(config)
    }
}
