//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP client and
//! OAuth callback server) into cloud providers. Desktop apps typically enable
//! the `desktop-shims` feature (which depends on `bridge-desktop`); other
//! hosts inject their own adapters through [`CoreDependencies::new`].

pub mod error;

pub use error::{CoreError, Result};

pub use core_auth::{deserialize_session, serialize_session, Token};
pub use core_request::{
    CloudBackend, CloudProvider, EitherError, Error, FileType, Item, OperationHandle, PageData,
    Range,
};
pub use core_runtime::config::{Hints, ProviderConfig};
pub use core_runtime::events::{AuthEvent, CoreEvent, EventBus};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bridge_traits::{HttpClient, HttpServerFactory};
use provider_google_drive::GoogleDriveConnector;
use provider_onedrive::OneDriveConnector;
use tracing::info;

/// Storage services a provider can be created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    GoogleDrive,
    OneDrive,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::GoogleDrive, ProviderKind::OneDrive];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GoogleDrive => "google",
            ProviderKind::OneDrive => "onedrive",
        }
    }

    fn backend(&self) -> Box<dyn CloudBackend> {
        match self {
            ProviderKind::GoogleDrive => Box::new(GoogleDriveConnector::new()),
            ProviderKind::OneDrive => Box::new(OneDriveConnector::new()),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "google" | "googledrive" | "google_drive" => Ok(ProviderKind::GoogleDrive),
            "onedrive" | "one_drive" => Ok(ProviderKind::OneDrive),
            _ => Err(CoreError::UnknownProvider(s.to_string())),
        }
    }
}

/// Creates a provider of `kind` from a complete configuration.
pub fn create_provider(kind: ProviderKind, config: ProviderConfig) -> Result<Arc<CloudProvider>> {
    config.validate()?;
    let provider = CloudProvider::new(kind.backend(), config)?;
    info!(provider = %kind, "Created cloud provider");
    Ok(provider)
}

/// Bridge handles shared by every provider the service creates.
#[derive(Clone)]
pub struct CoreDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub http_server: Arc<dyn HttpServerFactory>,
}

impl CoreDependencies {
    pub fn new(http_client: Arc<dyn HttpClient>, http_server: Arc<dyn HttpServerFactory>) -> Self {
        Self {
            http_client,
            http_server,
        }
    }

    /// reqwest client and axum callback server.
    #[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
    pub fn desktop() -> Self {
        Self::new(
            Arc::new(bridge_desktop::ReqwestHttpClient::new()),
            Arc::new(bridge_desktop::AxumServerFactory::new()),
        )
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    deps: CoreDependencies,
    events: EventBus,
    interactive_authorization: bool,
}

impl CoreService {
    pub fn new(deps: CoreDependencies) -> Self {
        Self {
            deps,
            events: EventBus::default(),
            interactive_authorization: true,
        }
    }

    /// Disables the browser flow for providers created afterwards.
    pub fn with_interactive_authorization(mut self, enabled: bool) -> Self {
        self.interactive_authorization = enabled;
        self
    }

    /// Bus shared by all providers of this service.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn dependencies(&self) -> &CoreDependencies {
        &self.deps
    }

    /// Creates a provider from a refresh token and hints.
    pub fn provider(
        &self,
        kind: ProviderKind,
        token: Option<String>,
        hints: Hints,
    ) -> Result<Arc<CloudProvider>> {
        let mut builder = ProviderConfig::builder()
            .hints(hints)
            .http_client(Arc::clone(&self.deps.http_client))
            .http_server(Arc::clone(&self.deps.http_server))
            .event_bus(self.events.clone())
            .interactive_authorization(self.interactive_authorization);
        if let Some(token) = token {
            builder = builder.token(token);
        }
        create_provider(kind, builder.build()?)
    }

    /// Recreates a provider from [`CloudProvider::serialize_session`] output.
    pub fn restore_provider(&self, kind: ProviderKind, session: &str) -> Result<Arc<CloudProvider>> {
        let (token, hints) = deserialize_session(session)?;
        let token = Some(token).filter(|token| !token.is_empty());
        self.provider(kind, token, hints)
    }
}
