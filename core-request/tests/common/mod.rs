#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpCallback, HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::server::{CallbackRequest, HttpServer, HttpServerFactory, RequestHandler};
use bytes::Bytes;
use core_auth::{AuthConfig, OAuthEndpoints};
use core_request::{CloudBackend, CloudProvider, EitherError, Error, FileType, Item, PageData, Range};
use core_runtime::config::ProviderConfig;
use core_runtime::events::EventBus;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const API: &str = "https://api.test";
pub const TOKEN_URL: &str = "https://auth.test/token";
pub const FRESH_TOKEN: &str = "fresh";

/// Minimal JSON backend talking to `https://api.test`.
pub struct TestBackend;

#[derive(Deserialize)]
struct WireItem {
    id: String,
    name: String,
    #[serde(default)]
    folder: bool,
    size: Option<u64>,
}

#[derive(Deserialize)]
struct WirePage {
    items: Vec<WireItem>,
    next: Option<String>,
}

fn to_item(wire: WireItem) -> Item {
    let file_type = if wire.folder {
        FileType::Directory
    } else {
        FileType::File
    };
    let mut item = Item::new(wire.id, wire.name, file_type);
    item.size = wire.size;
    item
}

fn parse_item(body: &[u8]) -> EitherError<Item> {
    serde_json::from_slice::<WireItem>(body)
        .map(to_item)
        .map_err(|e| Error::InvalidResponse(e.to_string()))
}

impl CloudBackend for TestBackend {
    fn name(&self) -> &'static str {
        "test"
    }

    fn oauth_endpoints(&self) -> OAuthEndpoints {
        OAuthEndpoints::new("https://auth.test/authorize", TOKEN_URL).with_scopes(["files"])
    }

    fn default_auth_config(&self) -> AuthConfig {
        AuthConfig::new("test-client", Some("test-secret".to_string()))
    }

    fn root_directory(&self) -> Item {
        Item::new("root", "/", FileType::Directory)
    }

    fn get_item_data_request(&self, id: &str) -> EitherError<HttpRequest> {
        Ok(HttpRequest::new(HttpMethod::Get, format!("{}/items/{}", API, id)))
    }

    fn get_item_data_response(&self, body: &[u8]) -> EitherError<Item> {
        parse_item(body)
    }

    fn list_directory_request(
        &self,
        directory: &Item,
        page_token: Option<&str>,
    ) -> EitherError<HttpRequest> {
        let mut url = format!("{}/items/{}/children", API, directory.id);
        if let Some(token) = page_token {
            url.push_str(&format!("?page={}", token));
        }
        Ok(HttpRequest::new(HttpMethod::Get, url))
    }

    fn list_directory_response(&self, _directory: &Item, body: &[u8]) -> EitherError<PageData> {
        let page: WirePage =
            serde_json::from_slice(body).map_err(|e| Error::InvalidResponse(e.to_string()))?;
        Ok(PageData {
            items: page.items.into_iter().map(to_item).collect(),
            next_token: page.next,
        })
    }

    fn download_file_request(&self, item: &Item, range: Range) -> EitherError<HttpRequest> {
        let request = HttpRequest::new(HttpMethod::Get, format!("{}/items/{}/content", API, item.id));
        Ok(match range.header_value() {
            Some(value) => request.header("Range", value),
            None => request,
        })
    }

    fn upload_file_request(
        &self,
        directory: &Item,
        filename: &str,
        content: Bytes,
    ) -> EitherError<HttpRequest> {
        Ok(HttpRequest::new(
            HttpMethod::Put,
            format!("{}/items/{}/{}", API, directory.id, filename),
        )
        .body(content))
    }

    fn upload_file_response(&self, body: &[u8]) -> EitherError<Item> {
        parse_item(body)
    }

    fn create_directory_request(&self, parent: &Item, name: &str) -> EitherError<HttpRequest> {
        HttpRequest::new(HttpMethod::Post, format!("{}/items/{}/children", API, parent.id))
            .json(&json!({ "name": name, "folder": true }))
            .map_err(Error::from)
    }

    fn create_directory_response(&self, body: &[u8]) -> EitherError<Item> {
        parse_item(body)
    }

    fn delete_item_request(&self, item: &Item) -> EitherError<HttpRequest> {
        Ok(HttpRequest::new(HttpMethod::Delete, format!("{}/items/{}", API, item.id)))
    }

    fn move_item_request(&self, item: &Item, destination: &Item) -> EitherError<HttpRequest> {
        HttpRequest::new(HttpMethod::Patch, format!("{}/items/{}", API, item.id))
            .json(&json!({ "parent": destination.id }))
            .map_err(Error::from)
    }

    fn move_item_response(&self, body: &[u8]) -> EitherError<Item> {
        parse_item(body)
    }

    fn rename_item_request(&self, item: &Item, name: &str) -> EitherError<HttpRequest> {
        HttpRequest::new(HttpMethod::Patch, format!("{}/items/{}", API, item.id))
            .json(&json!({ "name": name }))
            .map_err(Error::from)
    }

    fn rename_item_response(&self, body: &[u8]) -> EitherError<Item> {
        parse_item(body)
    }
}

/// Canned answer of [`ScriptedHttpClient`].
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub delay: Option<Duration>,
}

impl Reply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            delay: None,
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Script = Box<dyn Fn(&HttpRequest) -> Reply + Send + Sync>;

/// HTTP client answering from a closure and recording every request.
pub struct ScriptedHttpClient {
    script: Script,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new(script: impl Fn(&HttpRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, url_prefix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.url.starts_with(url_prefix))
            .count()
    }

    pub fn token_requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.url == TOKEN_URL)
            .map(|request| {
                String::from_utf8_lossy(request.body.as_deref().unwrap_or_default()).into_owned()
            })
            .collect()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn send(&self, request: HttpRequest, callback: HttpCallback) -> BridgeResult<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = (self.script)(&request);
        if let Some(delay) = reply.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = callback.cancelled() => return Err(BridgeError::Aborted),
            }
        }
        if callback.is_cancelled() {
            return Err(BridgeError::Aborted);
        }
        Ok(HttpResponse::from_bytes(reply.status, reply.body))
    }
}

pub fn is_fresh(request: &HttpRequest) -> bool {
    let expected = format!("Bearer {}", FRESH_TOKEN);
    request.header_value("Authorization") == Some(expected.as_str())
}

fn token_reply(request: &HttpRequest) -> Reply {
    let body = String::from_utf8_lossy(request.body.as_deref().unwrap_or_default()).into_owned();
    if body.contains("refresh_token=revoked") {
        return Reply::new(400, r#"{"error":"invalid_grant"}"#);
    }
    Reply::ok(format!(
        r#"{{"access_token":"{}","refresh_token":"r2","expires_in":3600}}"#,
        FRESH_TOKEN
    ))
    .after(Duration::from_millis(100))
}

/// Token endpoint issuing [`FRESH_TOKEN`] (except for the `revoked`
/// refresh token) and an API that only accepts it, serving `api` for
/// authorized requests.
pub fn authorizing_client(
    api: impl Fn(&HttpRequest) -> Reply + Send + Sync + 'static,
) -> Arc<ScriptedHttpClient> {
    ScriptedHttpClient::new(move |request| {
        if request.url == TOKEN_URL {
            token_reply(request)
        } else if is_fresh(request) {
            api(request)
        } else {
            Reply::new(401, r#"{"error":"unauthorized"}"#)
        }
    })
}

pub fn item_json(id: &str, name: &str, folder: bool) -> String {
    json!({ "id": id, "name": name, "folder": folder, "size": 3 }).to_string()
}

/// Callback server fake; optionally plays one browser redirect on start.
pub struct FakeServerFactory {
    redirect: Option<CallbackRequest>,
    stop_delay: Duration,
    started: AtomicUsize,
    stopped: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    peak_active: AtomicUsize,
}

impl FakeServerFactory {
    pub fn silent() -> Arc<Self> {
        Self::build(None, Duration::ZERO)
    }

    pub fn redirecting(query: &[(&str, &str)]) -> Arc<Self> {
        let redirect = query
            .iter()
            .fold(CallbackRequest::new("/auth"), |request, (k, v)| {
                request.with_query(*k, *v)
            });
        Self::build(Some(redirect), Duration::ZERO)
    }

    /// Silent server whose shutdown takes `delay`.
    pub fn slow_to_stop(delay: Duration) -> Arc<Self> {
        Self::build(None, delay)
    }

    fn build(redirect: Option<CallbackRequest>, stop_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            redirect,
            stop_delay,
            started: AtomicUsize::new(0),
            stopped: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
            peak_active: AtomicUsize::new(0),
        })
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Most servers ever running at the same time.
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }
}

struct FakeServer {
    port: u16,
    stop_delay: Duration,
    stopped: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

#[async_trait]
impl HttpServer for FakeServer {
    fn port(&self) -> u16 {
        self.port
    }

    async fn stop(self: Box<Self>) -> BridgeResult<()> {
        if !self.stop_delay.is_zero() {
            tokio::time::sleep(self.stop_delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl HttpServerFactory for FakeServerFactory {
    async fn start(&self, port: u16, handler: RequestHandler) -> BridgeResult<Box<dyn HttpServer>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(false, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);
        if let Some(redirect) = self.redirect.clone() {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                handler(redirect);
            });
        }
        Ok(Box::new(FakeServer {
            port,
            stop_delay: self.stop_delay,
            stopped: Arc::clone(&self.stopped),
            active: Arc::clone(&self.active),
        }))
    }
}

pub struct Setup {
    pub token: Option<&'static str>,
    pub interactive: bool,
    pub hints: Vec<(&'static str, &'static str)>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            token: Some("r1"),
            interactive: true,
            hints: Vec::new(),
        }
    }
}

pub fn provider(
    setup: Setup,
    client: Arc<ScriptedHttpClient>,
    server: Arc<FakeServerFactory>,
    events: EventBus,
) -> Arc<CloudProvider> {
    let mut builder = ProviderConfig::builder()
        .http_client(client)
        .http_server(server)
        .event_bus(events)
        .interactive_authorization(setup.interactive);
    if let Some(token) = setup.token {
        builder = builder.token(token);
    }
    for (key, value) in setup.hints {
        builder = builder.hint(key, value);
    }
    CloudProvider::new(Box::new(TestBackend), builder.build().unwrap()).unwrap()
}
