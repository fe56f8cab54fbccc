//! Wire-format hooks implemented by each storage backend.
//!
//! The provider never interprets payload bytes itself. For every operation a
//! backend supplies a `*_request` builder and, where the operation yields a
//! value, a `*_response` parser. Authorization hooks have OAuth 2.0 defaults
//! that a backend may override.

use crate::error::{EitherError, Error};
use crate::item::{Item, PageData, Range};
use bridge_traits::http::{HttpMethod, HttpRequest};
use bytes::Bytes;
use core_auth::{
    parse_token_response, Auth, AuthConfig, OAuthEndpoints, OAuthFlowManager, PkceVerifier, Token,
};

/// One storage service, selected when the provider is constructed.
pub trait CloudBackend: Send + Sync {
    /// Short identifier used in logs and events.
    fn name(&self) -> &'static str;

    fn oauth_endpoints(&self) -> OAuthEndpoints;

    /// Client configuration before hints are applied.
    fn default_auth_config(&self) -> AuthConfig;

    fn root_directory(&self) -> Item;

    /// Whether `status` means the access token was rejected.
    fn is_authorization_error(&self, status: u16) -> bool {
        status == 401
    }

    fn authorize_request(&self, request: HttpRequest, auth: &Auth) -> HttpRequest {
        match auth.access_token() {
            Some(token) => request.bearer_token(token),
            None => request,
        }
    }

    fn exchange_code_request(
        &self,
        oauth: &OAuthFlowManager,
        code: &str,
        verifier: Option<&PkceVerifier>,
    ) -> core_auth::Result<HttpRequest> {
        oauth.exchange_code_request(code, verifier)
    }

    fn refresh_token_request(
        &self,
        oauth: &OAuthFlowManager,
        refresh_token: &str,
    ) -> core_auth::Result<HttpRequest> {
        oauth.refresh_token_request(refresh_token)
    }

    fn token_response(
        &self,
        body: &[u8],
        previous_refresh_token: Option<&str>,
    ) -> core_auth::Result<Token> {
        parse_token_response(body, previous_refresh_token)
    }

    fn get_item_data_request(&self, id: &str) -> EitherError<HttpRequest>;

    fn get_item_data_response(&self, body: &[u8]) -> EitherError<Item>;

    fn list_directory_request(
        &self,
        directory: &Item,
        page_token: Option<&str>,
    ) -> EitherError<HttpRequest>;

    fn list_directory_response(&self, directory: &Item, body: &[u8]) -> EitherError<PageData>;

    fn download_file_request(&self, item: &Item, range: Range) -> EitherError<HttpRequest>;

    /// Preview image of `item`, by default fetched from its `thumbnail_url`.
    fn thumbnail_request(&self, item: &Item) -> EitherError<HttpRequest> {
        match &item.thumbnail_url {
            Some(url) => Ok(HttpRequest::new(HttpMethod::Get, url.clone())),
            None => Err(Error::status(404, format!("no thumbnail for {}", item.filename))),
        }
    }

    fn upload_file_request(
        &self,
        directory: &Item,
        filename: &str,
        content: Bytes,
    ) -> EitherError<HttpRequest>;

    fn upload_file_response(&self, body: &[u8]) -> EitherError<Item>;

    fn create_directory_request(&self, parent: &Item, name: &str) -> EitherError<HttpRequest>;

    fn create_directory_response(&self, body: &[u8]) -> EitherError<Item>;

    fn delete_item_request(&self, item: &Item) -> EitherError<HttpRequest>;

    fn move_item_request(&self, item: &Item, destination: &Item) -> EitherError<HttpRequest>;

    fn move_item_response(&self, body: &[u8]) -> EitherError<Item>;

    fn rename_item_request(&self, item: &Item, name: &str) -> EitherError<HttpRequest>;

    fn rename_item_response(&self, body: &[u8]) -> EitherError<Item>;
}
