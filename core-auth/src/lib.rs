//! # Authentication Module
//!
//! OAuth 2.0 building blocks shared by every cloud backend.
//!
//! ## Overview
//!
//! This crate holds the provider-independent half of authorization:
//!
//! - [`types`]: tokens, client configuration and the per-provider [`Auth`] state
//! - [`oauth`]: authorize URLs with PKCE, token request shaping and parsing
//! - [`callback`]: capture of the authorization code through a local server
//! - [`pages`]: HTML served to the browser during the redirect
//! - [`session`]: opaque session blobs for restoring a provider later
//!
//! Sending token requests and serializing re-authorization across concurrent
//! requests is left to `core-request`, so that both follow the cancellation
//! of the operation that triggered them.

pub mod callback;
pub mod error;
pub mod oauth;
pub mod pages;
pub mod session;
pub mod types;

pub use callback::{CallbackHandler, CodeCapture, CodeOutcome};
pub use error::{AuthError, Result};
pub use oauth::{parse_token_response, OAuthEndpoints, OAuthFlowManager, PkceVerifier};
pub use pages::AuthPages;
pub use session::{deserialize_session, serialize_session};
pub use types::{Auth, AuthConfig, Token};
