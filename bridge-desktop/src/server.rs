//! Local callback server using axum
//!
//! Every path is routed to the single [`RequestHandler`]; the body it returns
//! is served as HTML. The listener binds to the loopback interface only.

use async_trait::async_trait;
use axum::{
    extract::Query,
    http::{HeaderMap, Uri},
    response::Html,
    Router,
};
use bridge_traits::{
    error::{BridgeError, Result},
    server::{CallbackRequest, HttpServer, HttpServerFactory, RequestHandler},
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long `stop` waits for open connections before dropping them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Starts [`AxumCallbackServer`] instances bound to `127.0.0.1`.
#[derive(Debug, Default, Clone)]
pub struct AxumServerFactory;

impl AxumServerFactory {
    pub fn new() -> Self {
        Self
    }
}

/// A running callback server; dropped connections are closed on `stop`.
pub struct AxumCallbackServer {
    port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

fn router(handler: RequestHandler) -> Router {
    Router::new().fallback(
        move |uri: Uri, Query(query): Query<HashMap<String, String>>, headers: HeaderMap| {
            let request = CallbackRequest {
                url: uri.path().to_string(),
                query,
                headers: headers
                    .iter()
                    .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
                    .collect(),
            };
            debug!(path = %request.url, "Callback server request");
            let body = handler(request);
            async move { Html(body) }
        },
    )
}

#[async_trait]
impl HttpServerFactory for AxumServerFactory {
    async fn start(&self, port: u16, handler: RequestHandler) -> Result<Box<dyn HttpServer>> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| BridgeError::Server(format!("Failed to bind to port {}: {}", port, e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| BridgeError::Server(format!("Failed to get local address: {}", e)))?
            .port();

        info!(port, "Callback server starting");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(handler);
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                warn!(error = %e, "Callback server error");
            }
        });

        Ok(Box::new(AxumCallbackServer {
            port,
            shutdown_tx: Some(shutdown_tx),
            task,
        }))
    }
}

#[async_trait]
impl HttpServer for AxumCallbackServer {
    fn port(&self) -> u16 {
        self.port
    }

    async fn stop(mut self: Box<Self>) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let abort = self.task.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_cancelled() => {}
            Ok(Err(e)) => return Err(BridgeError::Server(e.to_string())),
            Err(_) => {
                debug!(port = self.port, "Callback server did not drain in time");
                abort.abort();
            }
        }

        info!(port = self.port, "Callback server stopped");
        Ok(())
    }
}

impl Drop for AxumCallbackServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
