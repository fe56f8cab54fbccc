use crate::error::{AuthError, Result};
use core_runtime::config::Hints;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default port of the local redirect listener.
pub const DEFAULT_REDIRECT_PORT: u16 = 8080;

/// Default path prefix the redirect listener answers on.
pub const DEFAULT_REDIRECT_PREFIX: &str = "/auth";

/// Application name shown on the callback pages.
pub const DEFAULT_APP_NAME: &str = "cloudstore";

/// Hint keys understood by [`AuthConfig::with_hints`].
pub mod hint {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const CLIENT_ID: &str = "client_id";
    pub const CLIENT_SECRET: &str = "client_secret";
    pub const REDIRECT_URI_PORT: &str = "redirect_uri_port";
    pub const REDIRECT_URI_PREFIX: &str = "redirect_uri_prefix";
    pub const STATE: &str = "state";
    pub const REQUESTING_APP_NAME: &str = "requesting_app_name";
    pub const LOGIN_PAGE: &str = "login_page";
    pub const SUCCESS_PAGE: &str = "success_page";
    pub const ERROR_PAGE: &str = "error_page";
}

/// OAuth token pair.
///
/// `expires_in` is the lifetime in seconds reported by the provider, or
/// [`Token::UNKNOWN_EXPIRY`] when it is unknown or the token never expires.
///
/// # Examples
///
/// ```
/// use core_auth::Token;
///
/// let token = Token::from_refresh_token("1//refresh");
/// assert!(token.access_token.is_empty());
/// assert_eq!(token.expires_in, Token::UNKNOWN_EXPIRY);
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

impl Token {
    pub const UNKNOWN_EXPIRY: i64 = -1;

    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_in,
        }
    }

    /// Token restored from a saved session: only the refresh token is known.
    pub fn from_refresh_token(refresh_token: impl Into<String>) -> Self {
        Self::new(String::new(), refresh_token, Self::UNKNOWN_EXPIRY)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Client credentials and redirect settings of one provider instance.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri_port: u16,
    pub redirect_uri_prefix: String,
    /// Fixed OAuth `state`; a random one is generated per flow when unset.
    pub state: Option<String>,
    pub requesting_app_name: String,
    pub login_page: Option<String>,
    pub success_page: Option<String>,
    pub error_page: Option<String>,
}

impl AuthConfig {
    pub fn new(client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_uri_port: DEFAULT_REDIRECT_PORT,
            redirect_uri_prefix: DEFAULT_REDIRECT_PREFIX.to_string(),
            state: None,
            requesting_app_name: DEFAULT_APP_NAME.to_string(),
            login_page: None,
            success_page: None,
            error_page: None,
        }
    }

    /// Applies hints on top of `self`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] when `redirect_uri_port` is not a
    /// port number.
    pub fn with_hints(mut self, hints: &Hints) -> Result<Self> {
        let get = |key: &str| hints.get(key).filter(|v| !v.is_empty()).cloned();

        if let Some(client_id) = get(hint::CLIENT_ID) {
            self.client_id = client_id;
        }
        if let Some(secret) = get(hint::CLIENT_SECRET) {
            self.client_secret = Some(secret);
        }
        if let Some(port) = get(hint::REDIRECT_URI_PORT) {
            self.redirect_uri_port = port.parse().map_err(|_| {
                AuthError::InvalidConfig(format!("redirect_uri_port '{}' is not a port", port))
            })?;
        }
        if let Some(prefix) = get(hint::REDIRECT_URI_PREFIX) {
            self.redirect_uri_prefix = normalize_prefix(&prefix);
        }
        if let Some(state) = get(hint::STATE) {
            self.state = Some(state);
        }
        if let Some(name) = get(hint::REQUESTING_APP_NAME) {
            self.requesting_app_name = name;
        }
        self.login_page = get(hint::LOGIN_PAGE).or(self.login_page);
        self.success_page = get(hint::SUCCESS_PAGE).or(self.success_page);
        self.error_page = get(hint::ERROR_PAGE).or(self.error_page);

        Ok(self)
    }

    /// Hints that recreate this configuration with [`AuthConfig::with_hints`].
    pub fn to_hints(&self) -> Hints {
        let mut hints = Hints::new();
        hints.insert(hint::CLIENT_ID.to_string(), self.client_id.clone());
        if let Some(secret) = &self.client_secret {
            hints.insert(hint::CLIENT_SECRET.to_string(), secret.clone());
        }
        hints.insert(
            hint::REDIRECT_URI_PORT.to_string(),
            self.redirect_uri_port.to_string(),
        );
        hints.insert(
            hint::REDIRECT_URI_PREFIX.to_string(),
            self.redirect_uri_prefix.clone(),
        );
        if let Some(state) = &self.state {
            hints.insert(hint::STATE.to_string(), state.clone());
        }
        hints
    }

    /// `http://localhost:{port}{prefix}`
    pub fn redirect_uri(&self) -> String {
        format!(
            "http://localhost:{}{}",
            self.redirect_uri_port, self.redirect_uri_prefix
        )
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("redirect_uri_port", &self.redirect_uri_port)
            .field("redirect_uri_prefix", &self.redirect_uri_prefix)
            .field("requesting_app_name", &self.requesting_app_name)
            .finish_non_exhaustive()
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Authorization state owned by a provider.
///
/// Only mutated while the provider's lock is held.
#[derive(Debug, Clone)]
pub struct Auth {
    pub config: AuthConfig,
    pub token: Option<Token>,
}

impl Auth {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            token: None,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.token
            .as_ref()
            .map(|t| t.access_token.as_str())
            .filter(|t| !t.is_empty())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.token
            .as_ref()
            .map(|t| t.refresh_token.as_str())
            .filter(|t| !t.is_empty())
    }
}
