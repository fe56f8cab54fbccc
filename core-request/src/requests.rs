//! HTTP plumbing shared by every operation: authorized sends with a single
//! transparent retry after re-authorization, and raw token-endpoint calls.

use crate::backend::CloudBackend;
use crate::error::{EitherError, Error};
use crate::operation::Operation;
use crate::provider::CloudProvider;
use bridge_traits::http::{HttpCallback, HttpRequest, HttpResponse};
use core_auth::Token;
use std::sync::Arc;
use tracing::{debug, instrument};

async fn error_body(response: HttpResponse, callback: &HttpCallback) -> EitherError<String> {
    let body = response.bytes(callback).await?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

impl<T> Operation<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Sends the request built by `factory` with the current access token.
    ///
    /// When the backend classifies the failure as an authorization error, the
    /// operation waits on the provider's authorization funnel and reissues
    /// the request once. The returned response is always 2xx; its body is
    /// left for the caller to consume with `callback`.
    ///
    /// # Errors
    ///
    /// - [`Error::Status`] for a non-2xx answer that is not retried, for a
    ///   failed retry, or when the authorization was aborted on behalf of
    ///   another operation
    /// - whatever the authorization failed with otherwise
    /// - [`Error::Aborted`] once this operation is cancelled
    #[instrument(skip_all, fields(id = %self.id(), name = self.name()))]
    pub async fn send_request<F>(&self, factory: F, callback: &HttpCallback) -> EitherError<HttpResponse>
    where
        F: Fn(&dyn CloudBackend) -> EitherError<HttpRequest> + Send + Sync,
    {
        let provider = self.provider().ok_or(Error::Aborted)?;

        let response = self.send_authorized(&provider, &factory, callback).await?;
        if response.is_success() {
            return Ok(response);
        }

        let code = response.status;
        let body = error_body(response, &self.http_callback()).await?;
        if !provider.backend().is_authorization_error(code) {
            return Err(Error::Status { code, body });
        }

        debug!(status = code, "Authorization error, waiting for reauthorization");
        match self.reauthorize(&provider).await {
            Ok(()) => {}
            Err(Error::Aborted) if !self.is_cancelled() => {
                return Err(Error::Status { code, body });
            }
            Err(e) => return Err(e),
        }

        debug!("Reauthorized, retrying request");
        let response = self.send_authorized(&provider, &factory, callback).await?;
        if response.is_success() {
            return Ok(response);
        }
        let code = response.status;
        let body = error_body(response, &self.http_callback()).await?;
        Err(Error::Status { code, body })
    }

    async fn send_authorized<F>(
        &self,
        provider: &CloudProvider,
        factory: &F,
        callback: &HttpCallback,
    ) -> EitherError<HttpResponse>
    where
        F: Fn(&dyn CloudBackend) -> EitherError<HttpRequest> + Send + Sync,
    {
        let request = factory(provider.backend())?;
        let request = provider.authorize_request(request);
        let response = provider.http_client().send(request, callback.clone()).await?;
        Ok(response)
    }

    async fn reauthorize(&self, provider: &Arc<CloudProvider>) -> EitherError<()> {
        let receiver = provider.request_authorization(self)?;
        receiver.await.unwrap_or(Err(Error::Aborted))
    }

    /// Calls the token endpoint without an access token or retry.
    pub(crate) async fn send_token_request(
        &self,
        provider: &CloudProvider,
        request: HttpRequest,
        previous_refresh_token: Option<&str>,
    ) -> EitherError<Token> {
        let callback = self.http_callback();
        let response = provider.http_client().send(request, callback.clone()).await?;
        let status = response.status;
        let success = response.is_success();
        let body = response.bytes(&callback).await?;
        if !success {
            return Err(Error::Authorization(format!(
                "Token endpoint returned {}: {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        Ok(provider
            .backend()
            .token_response(&body, previous_refresh_token)?)
    }
}
