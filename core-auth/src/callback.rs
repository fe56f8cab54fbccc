//! Interactive authorization-code capture.
//!
//! [`CodeCapture::run`] starts the local callback server, waits for the
//! browser redirect and always stops the server before returning:
//!
//! ```text
//! Idle ──start server──▶ AwaitingUserCode ──redirect, accepted=true, code──▶ Resolved(code)
//!                                │
//!                                └──error / accepted≠true / cancel──▶ Resolved(denied)
//! ```
//!
//! The redirect is processed in two steps. The first request renders the
//! success or error page; a script on that page repeats the request with
//! `accepted=true` or `accepted=false`, and only a request carrying
//! `accepted` resolves the wait.

use crate::error::{AuthError, Result};
use crate::pages::AuthPages;
use crate::types::AuthConfig;
use bridge_traits::server::{CallbackRequest, HttpServerFactory, RequestHandler};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use core_runtime::logging::redact_if_sensitive;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const CODE_PARAMETER: &str = "code";
pub const ERROR_PARAMETER: &str = "error";
pub const STATE_PARAMETER: &str = "state";
pub const ACCEPTED_PARAMETER: &str = "accepted";

/// How the user answered the consent screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeOutcome {
    Accepted(String),
    Denied(String),
}

/// Request handler installed on the callback server.
pub struct CallbackHandler {
    prefix: String,
    expected_state: String,
    pages: AuthPages,
    outcome: Mutex<Option<oneshot::Sender<CodeOutcome>>>,
}

impl CallbackHandler {
    /// Creates a handler and the receiver released by the first request
    /// carrying `accepted`.
    ///
    /// An empty `expected_state` disables the state check.
    pub fn new(
        config: &AuthConfig,
        authorize_url: &str,
        expected_state: impl Into<String>,
    ) -> (Self, oneshot::Receiver<CodeOutcome>) {
        let (tx, rx) = oneshot::channel();
        let handler = Self {
            prefix: config.redirect_uri_prefix.trim_end_matches('/').to_string(),
            expected_state: expected_state.into(),
            pages: AuthPages::new(config, authorize_url),
            outcome: Mutex::new(Some(tx)),
        };
        (handler, rx)
    }

    pub fn handle(&self, request: CallbackRequest) -> String {
        let path = request.url.strip_suffix('/').unwrap_or(&request.url);
        debug!(
            path,
            args = ?request
                .query
                .iter()
                .map(|(k, v)| (k.as_str(), redact_if_sensitive(k, v)))
                .collect::<Vec<_>>(),
            "Callback request"
        );

        if path == format!("{}/login", self.prefix) {
            return self.pages.login_page();
        }
        if path != self.prefix {
            return self.pages.message_page("Page not found");
        }

        let non_empty = |key: &str| request.query_arg(key).filter(|v| !v.is_empty());
        let code = non_empty(CODE_PARAMETER);
        let error = non_empty(ERROR_PARAMETER);
        let state_ok = self.expected_state.is_empty()
            || request.query_arg(STATE_PARAMETER) == Some(self.expected_state.as_str());

        let page = match (error, code) {
            (Some(error), _) => self.pages.error_page(error),
            (None, Some(_)) if !state_ok => self.pages.error_page("State mismatch"),
            (None, Some(_)) => self.pages.success_page(),
            (None, None) => self.pages.message_page("Bad request"),
        };

        if let Some(accepted) = non_empty(ACCEPTED_PARAMETER) {
            let outcome = match (error, code) {
                (Some(error), _) => CodeOutcome::Denied(error.to_string()),
                _ if accepted != "true" => CodeOutcome::Denied("Access denied".to_string()),
                (None, None) => CodeOutcome::Denied("No authorization code".to_string()),
                (None, Some(_)) if !state_ok => CodeOutcome::Denied("State mismatch".to_string()),
                (None, Some(code)) => CodeOutcome::Accepted(code.to_string()),
            };
            self.resolve(outcome);
        }

        page
    }

    fn resolve(&self, outcome: CodeOutcome) {
        let sender = self
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }
}

/// One interactive authorization attempt.
pub struct CodeCapture {
    provider: String,
    config: AuthConfig,
    authorize_url: String,
    expected_state: String,
    events: EventBus,
}

impl CodeCapture {
    pub fn new(
        provider: impl Into<String>,
        config: AuthConfig,
        authorize_url: impl Into<String>,
        expected_state: impl Into<String>,
        events: EventBus,
    ) -> Self {
        Self {
            provider: provider.into(),
            config,
            authorize_url: authorize_url.into(),
            expected_state: expected_state.into(),
            events,
        }
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.emit(CoreEvent::Auth(event));
    }

    /// Runs the capture until the user answers or `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`AuthError::AccessDenied`] when the redirect carries an error, the
    ///   user declined, or the state did not match
    /// - [`AuthError::Cancelled`] when `cancel` fired first
    /// - [`AuthError::CallbackServer`] when the server could not start
    #[instrument(skip_all, fields(provider = %self.provider, port = self.config.redirect_uri_port))]
    pub async fn run(
        self,
        factory: &dyn HttpServerFactory,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        let (handler, outcome_rx) =
            CallbackHandler::new(&self.config, &self.authorize_url, self.expected_state.clone());
        let handler = Arc::new(handler);
        let request_handler: RequestHandler = {
            let handler = Arc::clone(&handler);
            Arc::new(move |request| handler.handle(request))
        };

        let server = factory
            .start(self.config.redirect_uri_port, request_handler)
            .await
            .map_err(|e| AuthError::CallbackServer(e.to_string()))?;
        let port = server.port();

        info!(port, "Waiting for authorization code");
        self.emit(AuthEvent::CallbackServerStarted {
            provider: self.provider.clone(),
            port,
        });
        self.emit(AuthEvent::UserConsentRequired {
            provider: self.provider.clone(),
            authorize_url: self.authorize_url.clone(),
        });

        let outcome = tokio::select! {
            outcome = outcome_rx => outcome.ok(),
            _ = cancel.cancelled() => None,
        };

        if let Err(e) = server.stop().await {
            warn!(error = %e, "Failed to stop callback server");
        }
        self.emit(AuthEvent::CallbackServerStopped {
            provider: self.provider.clone(),
        });

        match outcome {
            Some(CodeOutcome::Accepted(code)) => {
                info!("Authorization code received");
                Ok(code)
            }
            Some(CodeOutcome::Denied(reason)) => {
                warn!(reason = %reason, "Authorization denied");
                Err(AuthError::AccessDenied(reason))
            }
            None => {
                debug!("Authorization code capture cancelled");
                Err(AuthError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::server::HttpServer;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn handler(state: &str) -> (CallbackHandler, oneshot::Receiver<CodeOutcome>) {
        CallbackHandler::new(&AuthConfig::new("client", None), "https://provider.com/auth", state)
    }

    fn redirect(args: &[(&str, &str)]) -> CallbackRequest {
        args.iter()
            .fold(CallbackRequest::new("/auth"), |request, (k, v)| request.with_query(*k, *v))
    }

    #[test]
    fn test_code_then_accepted() {
        let (handler, mut rx) = handler("xyz");

        let page = handler.handle(redirect(&[("code", "c0de"), ("state", "xyz")]));
        assert!(page.contains("accepted=true"));
        assert!(rx.try_recv().is_err());

        handler.handle(redirect(&[("code", "c0de"), ("state", "xyz"), ("accepted", "true")]));
        assert_eq!(rx.try_recv().unwrap(), CodeOutcome::Accepted("c0de".to_string()));
    }

    #[test]
    fn test_error_with_accepted_true_is_denied() {
        let (handler, mut rx) = handler("");

        let page = handler.handle(redirect(&[("error", "access_denied"), ("accepted", "true")]));

        assert!(page.contains("access_denied"));
        assert_eq!(
            rx.try_recv().unwrap(),
            CodeOutcome::Denied("access_denied".to_string())
        );
    }

    #[test]
    fn test_accepted_false_is_denied() {
        let (handler, mut rx) = handler("");
        handler.handle(redirect(&[("code", "c0de"), ("accepted", "false")]));
        assert!(matches!(rx.try_recv().unwrap(), CodeOutcome::Denied(_)));
    }

    #[test]
    fn test_state_mismatch_is_denied() {
        let (handler, mut rx) = handler("expected");
        let page = handler.handle(redirect(&[("code", "c0de"), ("state", "forged"), ("accepted", "true")]));
        assert!(page.contains("State mismatch"));
        assert_eq!(
            rx.try_recv().unwrap(),
            CodeOutcome::Denied("State mismatch".to_string())
        );
    }

    #[test]
    fn test_routing() {
        let (handler, mut rx) = handler("");

        assert!(handler.handle(CallbackRequest::new("/auth/login/")).contains("Sign in"));
        assert!(handler.handle(CallbackRequest::new("/favicon.ico")).contains("Page not found"));
        assert!(handler.handle(CallbackRequest::new("/auth/")).contains("Bad request"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_only_first_outcome_counts() {
        let (handler, mut rx) = handler("");
        handler.handle(redirect(&[("code", "first"), ("accepted", "true")]));
        handler.handle(redirect(&[("code", "second"), ("accepted", "true")]));
        assert_eq!(rx.try_recv().unwrap(), CodeOutcome::Accepted("first".to_string()));
    }

    /// Server fake that answers a scripted redirect as soon as it starts.
    struct ScriptedServerFactory {
        redirect: Option<CallbackRequest>,
        stopped: Arc<AtomicBool>,
    }

    struct ScriptedServer {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl HttpServer for ScriptedServer {
        fn port(&self) -> u16 {
            8080
        }

        async fn stop(self: Box<Self>) -> BridgeResult<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl HttpServerFactory for ScriptedServerFactory {
        async fn start(&self, _port: u16, handler: RequestHandler) -> BridgeResult<Box<dyn HttpServer>> {
            if let Some(request) = self.redirect.clone() {
                tokio::spawn(async move {
                    handler(request);
                });
            }
            Ok(Box::new(ScriptedServer {
                stopped: self.stopped.clone(),
            }))
        }
    }

    fn capture(events: EventBus) -> CodeCapture {
        CodeCapture::new(
            "test",
            AuthConfig::new("client", None),
            "https://provider.com/auth",
            "",
            events,
        )
    }

    #[tokio::test]
    async fn test_capture_returns_code_and_stops_server() {
        let stopped = Arc::new(AtomicBool::new(false));
        let factory = ScriptedServerFactory {
            redirect: Some(redirect(&[("code", "c0de"), ("accepted", "true")])),
            stopped: stopped.clone(),
        };
        let events = EventBus::default();
        let mut rx = events.subscribe();

        let code = capture(events)
            .run(&factory, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(code, "c0de");
        assert!(stopped.load(Ordering::SeqCst));
        assert!(matches!(
            rx.recv().await.unwrap(),
            CoreEvent::Auth(AuthEvent::CallbackServerStarted { port: 8080, .. })
        ));
    }

    #[tokio::test]
    async fn test_capture_denied_stops_server() {
        let stopped = Arc::new(AtomicBool::new(false));
        let factory = ScriptedServerFactory {
            redirect: Some(redirect(&[("error", "access_denied"), ("accepted", "true")])),
            stopped: stopped.clone(),
        };

        let result = capture(EventBus::default())
            .run(&factory, &CancellationToken::new())
            .await;

        assert_eq!(result, Err(AuthError::AccessDenied("access_denied".to_string())));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_capture_cancelled_stops_server() {
        let stopped = Arc::new(AtomicBool::new(false));
        let factory = ScriptedServerFactory {
            redirect: None,
            stopped: stopped.clone(),
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = capture(EventBus::default()).run(&factory, &cancel).await;

        assert_eq!(result, Err(AuthError::Cancelled));
        assert!(stopped.load(Ordering::SeqCst));
    }
}
