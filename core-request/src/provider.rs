//! # Cloud Provider
//!
//! [`CloudProvider`] owns the authorization state of one account on one
//! backend and issues every operation against it.
//!
//! ## Authorization
//!
//! Requests carry the current access token. When a backend rejects it, the
//! failing operations queue in the provider's funnel and a single
//! authorization operation runs on their behalf:
//!
//! 1. the stored refresh token is exchanged for a new access token;
//! 2. failing that, and if the host allows it, the user is sent through the
//!    browser and the authorization code is captured on a local server;
//! 3. the new token is installed and every queued operation retries once.
//!
//! The provider lock guards the token and the funnel and is never held
//! across I/O.
//!
//! ## Usage
//!
//! ```ignore
//! let provider = CloudProvider::new(Box::new(backend), config)?;
//! let root = provider.root_directory();
//! let items = provider.list_directory(root).result().await?;
//! ```

use crate::backend::CloudBackend;
use crate::error::{EitherError, Error};
use crate::funnel::AuthFunnel;
use crate::item::{Item, PageData, Range};
use crate::operation::{GenericOperation, Operation, OperationHandle, OperationId};
use bridge_traits::http::{HttpClient, HttpRequest, ProgressFn};
use bridge_traits::server::HttpServerFactory;
use bytes::Bytes;
use core_auth::types::hint;
use core_auth::{serialize_session, Auth, CodeCapture, OAuthFlowManager, PkceVerifier, Token};
use core_runtime::config::{Hints, ProviderConfig};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

struct ProviderState {
    auth: Auth,
    funnel: AuthFunnel,
    /// Verifier of the last URL handed out by `authorize_url`.
    pending_verifier: Option<PkceVerifier>,
}

/// One authorized account on one storage backend.
pub struct CloudProvider {
    backend: Box<dyn CloudBackend>,
    http_client: Arc<dyn HttpClient>,
    http_server: Arc<dyn HttpServerFactory>,
    events: EventBus,
    interactive_authorization: bool,
    state: Mutex<ProviderState>,
    this: Weak<CloudProvider>,
}

impl fmt::Debug for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudProvider")
            .field("backend", &self.backend.name())
            .field("interactive_authorization", &self.interactive_authorization)
            .finish_non_exhaustive()
    }
}

impl CloudProvider {
    /// Creates a provider for `backend`, restoring the token and hints from
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns [`core_auth::AuthError::InvalidConfig`] when the hints do not
    /// form a valid client configuration.
    pub fn new(backend: Box<dyn CloudBackend>, config: ProviderConfig) -> core_auth::Result<Arc<Self>> {
        let auth_config = backend.default_auth_config().with_hints(&config.hints)?;
        let mut auth = Auth::new(auth_config);

        let refresh_token = config.token.clone().unwrap_or_default();
        let access_token = config.hint(hint::ACCESS_TOKEN).unwrap_or_default();
        if !refresh_token.is_empty() || !access_token.is_empty() {
            auth.token = Some(Token::new(access_token, refresh_token, Token::UNKNOWN_EXPIRY));
        }

        info!(
            provider = backend.name(),
            has_token = auth.token.is_some(),
            interactive = config.interactive_authorization,
            "Created cloud provider"
        );

        Ok(Arc::new_cyclic(|this| Self {
            backend,
            http_client: config.http_client,
            http_server: config.http_server,
            events: config.event_bus,
            interactive_authorization: config.interactive_authorization,
            state: Mutex::new(ProviderState {
                auth,
                funnel: AuthFunnel::default(),
                pending_verifier: None,
            }),
            this: this.clone(),
        }))
    }

    fn state(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn backend(&self) -> &dyn CloudBackend {
        self.backend.as_ref()
    }

    pub(crate) fn http_client(&self) -> &dyn HttpClient {
        self.http_client.as_ref()
    }

    pub fn root_directory(&self) -> Item {
        self.backend.root_directory()
    }

    /// Refresh token, empty when none is known.
    pub fn token(&self) -> String {
        self.state()
            .auth
            .refresh_token()
            .map(str::to_string)
            .unwrap_or_default()
    }

    /// Access token, empty when none is known.
    pub fn access_token(&self) -> String {
        self.state()
            .auth
            .access_token()
            .map(str::to_string)
            .unwrap_or_default()
    }

    /// Hints recreating this provider: client and redirect configuration
    /// plus the current access token.
    pub fn hints(&self) -> Hints {
        let state = self.state();
        let mut hints = state.auth.config.to_hints();
        if let Some(access_token) = state.auth.access_token() {
            hints.insert(hint::ACCESS_TOKEN.to_string(), access_token.to_string());
        }
        hints
    }

    pub fn serialize_session(&self) -> core_auth::Result<String> {
        serialize_session(&self.token(), &self.hints())
    }

    /// Whether an authorization operation is in flight.
    pub fn authorization_in_flight(&self) -> bool {
        self.state().funnel.current().is_some()
    }

    fn oauth(&self) -> OAuthFlowManager {
        OAuthFlowManager::new(self.state().auth.config.clone(), self.backend.oauth_endpoints())
    }

    fn new_verifier(&self) -> PkceVerifier {
        let verifier = PkceVerifier::new();
        match self.state().auth.config.state.clone() {
            Some(state) => verifier.with_state(state),
            None => verifier,
        }
    }

    /// URL the user opens to grant access. A code obtained through it can be
    /// passed to [`exchange_code`](CloudProvider::exchange_code).
    pub fn authorize_url(&self) -> EitherError<String> {
        let verifier = self.new_verifier();
        let url = self.oauth().build_auth_url(&verifier)?;
        self.state().pending_verifier = Some(verifier);
        Ok(url)
    }

    pub(crate) fn authorize_request(&self, request: HttpRequest) -> HttpRequest {
        let state = self.state();
        self.backend.authorize_request(request, &state.auth)
    }

    fn install_token(&self, token: Token) {
        self.state().auth.token = Some(token);
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.emit(CoreEvent::Auth(event));
    }

    fn emit_failure(&self, error: &Error) {
        if !error.is_aborted() {
            self.emit(AuthEvent::AuthorizationFailed {
                provider: self.name().to_string(),
                message: error.to_string(),
            });
        }
    }

    /// Queues a completion for `requester` in the funnel, starting an
    /// authorization when none is in flight.
    pub(crate) fn request_authorization(
        &self,
        requester: &dyn GenericOperation,
    ) -> EitherError<oneshot::Receiver<EitherError<()>>> {
        let mut state = self.state();
        // checked under the lock so a concurrent cancel() always sees the
        // registration it has to withdraw
        if requester.is_cancelled() {
            return Err(Error::Aborted);
        }
        let receiver = state.funnel.register(requester.id());
        // a cancelled authorization still winding down is joined as well;
        // complete_authorization starts a fresh one for its dependents
        if state.funnel.current().is_some() {
            debug!(requester = %requester.id(), "Joining in-flight authorization");
            return Ok(receiver);
        }

        let authorization = self.authorization_operation();
        state.funnel.set_current(authorization.clone());
        drop(state);

        debug!(requester = %requester.id(), "Requesting authorization");
        self.launch_authorization(authorization);
        Ok(receiver)
    }

    fn launch_authorization(&self, authorization: Operation<()>) {
        debug!(authorization = %authorization.id(), "Starting authorization");
        let this = self.this.clone();
        let authorization_id = authorization.id();
        authorization.on_complete(move |result| {
            if let Some(provider) = this.upgrade() {
                provider.complete_authorization(authorization_id, result);
            }
        });
        authorization.start().detach();
    }

    fn complete_authorization(&self, authorization: OperationId, result: EitherError<()>) {
        let mut state = self.state();
        let withdrawn = match state.funnel.current() {
            Some(current) if current.id() == authorization => current.is_cancelled(),
            _ => return,
        };
        if withdrawn && state.funnel.pending_requesters() > 0 {
            // requesters that joined after the last dependent withdrew
            let replacement = self.authorization_operation();
            state.funnel.set_current(replacement.clone());
            drop(state);
            debug!(
                authorization = %authorization,
                replacement = %replacement.id(),
                "Withdrawn authorization finished with new dependents"
            );
            self.launch_authorization(replacement);
            return;
        }
        let senders = state.funnel.complete(authorization);
        drop(state);
        debug!(
            authorization = %authorization,
            dependents = senders.len(),
            "Authorization finished"
        );
        for sender in senders {
            let _ = sender.send(result.clone());
        }
    }

    /// Withdraws a cancelled operation from the funnel. Returns the
    /// authorization to cancel when no dependent is left.
    pub(crate) fn withdraw(&self, requester: OperationId) -> Option<Operation<()>> {
        self.state().funnel.withdraw(requester)
    }

    fn authorization_operation(&self) -> Operation<()> {
        Operation::new("authorize", Self::run_authorization).with_weak_provider(self.this.clone())
    }

    async fn run_authorization(operation: Operation<()>) -> EitherError<()> {
        let provider = operation.provider().ok_or(Error::Aborted)?;
        let name = provider.name();
        info!(provider = name, "Authorizing");

        let refresh_token = provider.state().auth.refresh_token().map(str::to_string);
        if let Some(refresh_token) = refresh_token {
            match provider.refresh(&operation, &refresh_token).await {
                Ok(token) => {
                    provider.install_token(token);
                    provider.emit(AuthEvent::TokenRefreshed {
                        provider: name.to_string(),
                    });
                    info!(provider = name, "Access token refreshed");
                    return Ok(());
                }
                Err(Error::Aborted) => return Err(Error::Aborted),
                Err(e) => warn!(provider = name, error = %e, "Token refresh failed"),
            }
        }

        if !provider.interactive_authorization {
            let error = Error::Authorization(
                "No valid refresh token and interactive authorization is disabled".to_string(),
            );
            provider.emit_failure(&error);
            return Err(error);
        }

        let verifier = provider.new_verifier();
        let authorize_url = provider.oauth().build_auth_url(&verifier)?;
        let capture = CodeCapture::new(
            name,
            provider.state().auth.config.clone(),
            authorize_url,
            verifier.state(),
            provider.events.clone(),
        );
        let server = Arc::clone(&provider.http_server);
        // the user may take a while; do not keep the provider alive meanwhile
        drop(provider);

        let code = match capture
            .run(server.as_ref(), operation.cancellation_token())
            .await
        {
            Ok(code) => code,
            Err(e) => {
                let error = Error::from(e);
                if let Some(provider) = operation.provider() {
                    provider.emit_failure(&error);
                }
                return Err(error);
            }
        };

        let provider = operation.provider().ok_or(Error::Aborted)?;
        match provider.exchange(&operation, &code, Some(&verifier)).await {
            Ok(token) => {
                provider.install_token(token);
                provider.emit(AuthEvent::Authorized {
                    provider: name.to_string(),
                });
                info!(provider = name, "Authorized");
                Ok(())
            }
            Err(e) => {
                provider.emit_failure(&e);
                Err(e)
            }
        }
    }

    async fn refresh<T>(&self, operation: &Operation<T>, refresh_token: &str) -> EitherError<Token>
    where
        T: Clone + Send + Sync + 'static,
    {
        let request = self
            .backend
            .refresh_token_request(&self.oauth(), refresh_token)?;
        operation
            .send_token_request(self, request, Some(refresh_token))
            .await
    }

    async fn exchange<T>(
        &self,
        operation: &Operation<T>,
        code: &str,
        verifier: Option<&PkceVerifier>,
    ) -> EitherError<Token>
    where
        T: Clone + Send + Sync + 'static,
    {
        let request = self
            .backend
            .exchange_code_request(&self.oauth(), code, verifier)?;
        operation.send_token_request(self, request, None).await
    }

    fn operation<T, F, Fut>(&self, name: &'static str, resolver: F) -> OperationHandle<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Operation<T>) -> Fut + Send + 'static,
        Fut: Future<Output = EitherError<T>> + Send + 'static,
    {
        let operation = Operation::new(name, resolver);
        let operation = match self.this.upgrade() {
            Some(provider) => operation.with_provider(provider),
            None => operation.with_weak_provider(self.this.clone()),
        };
        operation.start()
    }

    /// Exchanges a code obtained through [`authorize_url`] for a token.
    ///
    /// The token is returned, not installed.
    ///
    /// [`authorize_url`]: CloudProvider::authorize_url
    pub fn exchange_code(&self, code: impl Into<String>) -> OperationHandle<Token> {
        let code = code.into();
        self.operation("exchange_code", move |operation| async move {
            let provider = operation.provider().ok_or(Error::Aborted)?;
            let verifier = provider.state().pending_verifier.clone();
            provider.exchange(&operation, &code, verifier.as_ref()).await
        })
    }

    pub fn get_item_data(&self, id: impl Into<String>) -> OperationHandle<Item> {
        let id = id.into();
        self.operation("get_item_data", move |operation| async move {
            let callback = operation.http_callback();
            let response = operation
                .send_request(|backend| backend.get_item_data_request(&id), &callback)
                .await?;
            let body = response.bytes(&callback).await?;
            let provider = operation.provider().ok_or(Error::Aborted)?;
            provider.backend().get_item_data_response(&body)
        })
    }

    /// One page of `directory`; `page_token` comes from the previous page.
    pub fn list_directory_page(
        &self,
        directory: Item,
        page_token: Option<String>,
    ) -> OperationHandle<PageData> {
        self.operation("list_directory_page", move |operation| async move {
            let callback = operation.http_callback();
            let response = operation
                .send_request(
                    |backend| backend.list_directory_request(&directory, page_token.as_deref()),
                    &callback,
                )
                .await?;
            let body = response.bytes(&callback).await?;
            let provider = operation.provider().ok_or(Error::Aborted)?;
            provider.backend().list_directory_response(&directory, &body)
        })
    }

    /// Every item of `directory`, each page fetched as a sub-operation.
    pub fn list_directory(&self, directory: Item) -> OperationHandle<Vec<Item>> {
        self.operation("list_directory", move |operation| async move {
            let provider = operation.provider().ok_or(Error::Aborted)?;
            let mut items = Vec::new();
            let mut page_token = None;
            loop {
                let page = provider
                    .list_directory_page(directory.clone(), page_token.take())
                    .detach();
                operation.subrequest(Arc::new(page.clone())).await;
                let data = page.result().await?;
                items.extend(data.items);
                match data.next_token.filter(|token| !token.is_empty()) {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
            debug!(directory = %directory.id, count = items.len(), "Listed directory");
            Ok(items)
        })
    }

    /// Resolves a `/`-separated path from the root directory.
    pub fn get_item(&self, path: impl Into<String>) -> OperationHandle<Item> {
        let path = path.into();
        self.operation("get_item", move |operation| async move {
            let provider = operation.provider().ok_or(Error::Aborted)?;
            let mut current = provider.root_directory();
            for component in path.split('/').filter(|c| !c.is_empty()) {
                if !current.is_directory() {
                    return Err(Error::status(404, format!("{} not found", path)));
                }
                let listing = provider.list_directory(current.clone()).detach();
                operation.subrequest(Arc::new(listing.clone())).await;
                current = listing
                    .result()
                    .await?
                    .into_iter()
                    .find(|item| item.filename == component)
                    .ok_or_else(|| Error::status(404, format!("{} not found", path)))?;
            }
            Ok(current)
        })
    }

    /// Streams `range` of `item` into `sink`; resolves to the bytes written.
    pub fn download_file<W>(
        &self,
        item: Item,
        range: Range,
        sink: W,
        progress: Option<ProgressFn>,
    ) -> OperationHandle<u64>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.download_into("download_file", item, sink, progress, move |backend, item| {
            backend.download_file_request(item, range)
        })
    }

    /// Streams the preview image of `item` into `sink`.
    pub fn get_thumbnail<W>(
        &self,
        item: Item,
        sink: W,
        progress: Option<ProgressFn>,
    ) -> OperationHandle<u64>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.download_into("get_thumbnail", item, sink, progress, |backend, item| {
            backend.thumbnail_request(item)
        })
    }

    fn download_into<W, F>(
        &self,
        name: &'static str,
        item: Item,
        sink: W,
        progress: Option<ProgressFn>,
        request: F,
    ) -> OperationHandle<u64>
    where
        W: AsyncWrite + Send + Unpin + 'static,
        F: Fn(&dyn CloudBackend, &Item) -> EitherError<HttpRequest> + Send + Sync + 'static,
    {
        self.operation(name, move |operation| async move {
            let mut sink = sink;
            let callback = operation.http_callback().with_download_progress(progress);
            let response = operation
                .send_request(|backend| request(backend, &item), &callback)
                .await?;
            let written = response.write_to(&mut sink, &callback).await?;
            debug!(item = %item.id, written, "Downloaded {}", name);
            Ok(written)
        })
    }

    pub fn upload_file(
        &self,
        directory: Item,
        filename: impl Into<String>,
        content: Bytes,
        progress: Option<ProgressFn>,
    ) -> OperationHandle<Item> {
        let filename = filename.into();
        self.operation("upload_file", move |operation| async move {
            let callback = operation.http_callback().with_upload_progress(progress);
            let response = operation
                .send_request(
                    |backend| backend.upload_file_request(&directory, &filename, content.clone()),
                    &callback,
                )
                .await?;
            let body = response.bytes(&callback).await?;
            let provider = operation.provider().ok_or(Error::Aborted)?;
            provider.backend().upload_file_response(&body)
        })
    }

    pub fn create_directory(&self, parent: Item, name: impl Into<String>) -> OperationHandle<Item> {
        let name = name.into();
        self.operation("create_directory", move |operation| async move {
            if !parent.is_directory() {
                return Err(Error::status(403, "parent not a directory"));
            }
            let callback = operation.http_callback();
            let response = operation
                .send_request(|backend| backend.create_directory_request(&parent, &name), &callback)
                .await?;
            let body = response.bytes(&callback).await?;
            let provider = operation.provider().ok_or(Error::Aborted)?;
            provider.backend().create_directory_response(&body)
        })
    }

    pub fn delete_item(&self, item: Item) -> OperationHandle<()> {
        self.operation("delete_item", move |operation| async move {
            let callback = operation.http_callback();
            operation
                .send_request(|backend| backend.delete_item_request(&item), &callback)
                .await?;
            Ok(())
        })
    }

    pub fn move_item(&self, item: Item, destination: Item) -> OperationHandle<Item> {
        self.operation("move_item", move |operation| async move {
            let callback = operation.http_callback();
            let response = operation
                .send_request(|backend| backend.move_item_request(&item, &destination), &callback)
                .await?;
            let body = response.bytes(&callback).await?;
            let provider = operation.provider().ok_or(Error::Aborted)?;
            provider.backend().move_item_response(&body)
        })
    }

    pub fn rename_item(&self, item: Item, name: impl Into<String>) -> OperationHandle<Item> {
        let name = name.into();
        self.operation("rename_item", move |operation| async move {
            let callback = operation.http_callback();
            let response = operation
                .send_request(|backend| backend.rename_item_request(&item, &name), &callback)
                .await?;
            let body = response.bytes(&callback).await?;
            let provider = operation.provider().ok_or(Error::Aborted)?;
            provider.backend().rename_item_response(&body)
        })
    }
}

impl Drop for CloudProvider {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(authorization) = state.funnel.current() {
            authorization.cancellation_token().cancel();
        }
    }
}
