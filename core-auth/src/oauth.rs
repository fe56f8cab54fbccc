//! OAuth 2.0 request shaping with PKCE support
//!
//! Builds the authorization URL and the token-endpoint requests for the
//! authorization-code and refresh-token grants (RFC 6749, RFC 7636), and
//! parses token responses. Sending is left to the caller so that token
//! requests share the cancellation of the operation that issues them.
//!
//! # Security
//!
//! - PKCE S256 challenge on every interactive flow
//! - Random `state` unless a fixed one is configured
//! - Codes, verifiers and tokens are never logged
//!
//! # Example
//!
//! ```
//! use core_auth::oauth::{OAuthEndpoints, OAuthFlowManager, PkceVerifier};
//! use core_auth::AuthConfig;
//!
//! let endpoints = OAuthEndpoints::new(
//!     "https://accounts.example.com/authorize",
//!     "https://accounts.example.com/token",
//! )
//! .with_scopes(["files.read"]);
//! let manager = OAuthFlowManager::new(AuthConfig::new("client-id", None), endpoints);
//!
//! let verifier = PkceVerifier::new();
//! let url = manager.build_auth_url(&verifier).unwrap();
//! assert!(url.contains("code_challenge_method=S256"));
//! ```

use crate::error::{AuthError, Result};
use crate::types::{AuthConfig, Token};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_traits::http::{HttpMethod, HttpRequest};
use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use url::Url;

/// Authorization server endpoints of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    /// Additional query parameters for the authorization URL.
    pub extra_auth_params: Vec<(String, String)>,
}

impl OAuthEndpoints {
    pub fn new(auth_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        Self {
            auth_url: auth_url.into(),
            token_url: token_url.into(),
            scopes: Vec::new(),
            extra_auth_params: Vec::new(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auth_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_auth_params.push((key.into(), value.into()));
        self
    }
}

/// PKCE (Proof Key for Code Exchange) verifier.
///
/// The verifier stays local; only its challenge is sent with the
/// authorization URL.
#[derive(Clone, PartialEq, Eq)]
pub struct PkceVerifier {
    /// The code verifier (base64-url-encoded random string)
    verifier: String,
    /// The state parameter for CSRF protection
    state: String,
}

impl PkceVerifier {
    /// Create a new PKCE verifier with a random verifier and state.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();

        // 32 bytes encode to 43 characters, the RFC 7636 minimum
        let mut verifier_bytes = [0u8; 32];
        rng.fill(&mut verifier_bytes);
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

        let mut state_bytes = [0u8; 16];
        rng.fill(&mut state_bytes);
        let state = URL_SAFE_NO_PAD.encode(state_bytes);

        Self { verifier, state }
    }

    /// Uses `state` instead of a random one.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// S256 challenge: BASE64URL(SHA256(code_verifier))
    pub fn challenge(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.verifier.as_bytes());
        let hash = hasher.finalize();
        URL_SAFE_NO_PAD.encode(hash)
    }
}

impl Default for PkceVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceVerifier")
            .field("verifier", &"[REDACTED]")
            .field("state", &self.state)
            .finish()
    }
}

/// Shapes OAuth requests for one provider instance.
#[derive(Debug, Clone)]
pub struct OAuthFlowManager {
    config: AuthConfig,
    endpoints: OAuthEndpoints,
}

impl OAuthFlowManager {
    pub fn new(config: AuthConfig, endpoints: OAuthEndpoints) -> Self {
        Self { config, endpoints }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Build the authorization URL the user has to visit.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if the authorization endpoint is
    /// not a valid URL.
    #[instrument(skip(self, verifier), fields(client_id = %self.config.client_id))]
    pub fn build_auth_url(&self, verifier: &PkceVerifier) -> Result<String> {
        let mut url = Url::parse(&self.endpoints.auth_url)
            .map_err(|e| AuthError::InvalidConfig(format!("Invalid auth URL: {}", e)))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("redirect_uri", &self.config.redirect_uri());
            query.append_pair("response_type", "code");
            if !self.endpoints.scopes.is_empty() {
                query.append_pair("scope", &self.endpoints.scopes.join(" "));
            }
            query.append_pair("state", verifier.state());
            query.append_pair("code_challenge", &verifier.challenge());
            query.append_pair("code_challenge_method", "S256");
            for (key, value) in &self.endpoints.extra_auth_params {
                query.append_pair(key, value);
            }
        }

        debug!("Built authorization URL");

        Ok(url.to_string())
    }

    /// Token request for the authorization-code grant.
    ///
    /// `verifier` is omitted when the code was obtained without PKCE.
    pub fn exchange_code_request(
        &self,
        code: &str,
        verifier: Option<&PkceVerifier>,
    ) -> Result<HttpRequest> {
        let redirect_uri = self.config.redirect_uri();
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(verifier) = verifier {
            params.push(("code_verifier", verifier.verifier()));
        }
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        debug!("Building authorization code exchange request");
        self.form_request(&params)
    }

    /// Token request for the refresh-token grant.
    pub fn refresh_token_request(&self, refresh_token: &str) -> Result<HttpRequest> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        debug!("Building refresh token request");
        self.form_request(&params)
    }

    fn form_request(&self, params: &[(&str, &str)]) -> Result<HttpRequest> {
        let encoded = serde_urlencoded::to_string(params).map_err(|e| {
            AuthError::InvalidConfig(format!("Failed to encode token request: {}", e))
        })?;

        Ok(
            HttpRequest::new(HttpMethod::Post, self.endpoints.token_url.clone())
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Bytes::from(encoded)),
        )
    }
}

/// Parses a token endpoint response.
///
/// A response without `refresh_token` keeps `previous_refresh_token`; a
/// missing `expires_in` becomes [`Token::UNKNOWN_EXPIRY`].
pub fn parse_token_response(body: &[u8], previous_refresh_token: Option<&str>) -> Result<Token> {
    let response: TokenResponse = serde_json::from_slice(body)
        .map_err(|e| AuthError::InvalidResponse(format!("Failed to parse token response: {}", e)))?;

    if response.access_token.is_empty() {
        return Err(AuthError::InvalidResponse(
            "Token response has an empty access_token".to_string(),
        ));
    }

    let refresh_token = response
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| previous_refresh_token.map(str::to_string))
        .unwrap_or_default();

    Ok(Token::new(
        response.access_token,
        refresh_token,
        response.expires_in.unwrap_or(Token::UNKNOWN_EXPIRY),
    ))
}

/// Token response from the OAuth provider.
#[derive(Debug, Deserialize, Serialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}
