mod common;

use bridge_traits::http::{HttpMethod, ProgressFn};
use common::*;
use core_auth::deserialize_session;
use core_request::{Error, FileType, Item, Range};
use core_runtime::config::ProviderConfig;
use core_runtime::events::EventBus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;

fn authorized() -> Setup {
    Setup {
        hints: vec![("access_token", FRESH_TOKEN)],
        ..Setup::default()
    }
}

fn folder(id: &str, name: &str) -> Item {
    Item::new(id, name, FileType::Directory)
}

fn file(id: &str, name: &str) -> Item {
    Item::new(id, name, FileType::File)
}

#[tokio::test]
async fn test_list_directory_fetches_every_page() {
    let client = authorizing_client(|request| {
        if request.url.ends_with("/items/root/children") {
            Reply::ok(format!(
                r#"{{"items":[{},{}],"next":"p2"}}"#,
                item_json("a", "a.txt", false),
                item_json("b", "b", true)
            ))
        } else if request.url.ends_with("/items/root/children?page=p2") {
            Reply::ok(format!(r#"{{"items":[{}],"next":null}}"#, item_json("c", "c.txt", false)))
        } else {
            Reply::new(404, "")
        }
    });
    let provider = provider(authorized(), client.clone(), FakeServerFactory::silent(), EventBus::default());

    let handle = provider.list_directory(provider.root_directory());
    let items = handle.result().await.unwrap();

    let ids: Vec<_> = items.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert_eq!(items[1].file_type, FileType::Directory);
    assert_eq!(handle.operation().subrequest_count(), 2);
}

#[tokio::test]
async fn test_get_item_walks_path() {
    let client = authorizing_client(|request| {
        if request.url.ends_with("/items/root/children") {
            Reply::ok(format!(r#"{{"items":[{}]}}"#, item_json("docs-id", "docs", true)))
        } else if request.url.ends_with("/items/docs-id/children") {
            Reply::ok(format!(
                r#"{{"items":[{}]}}"#,
                item_json("report-id", "report.txt", false)
            ))
        } else {
            Reply::new(404, "")
        }
    });
    let provider = provider(authorized(), client, FakeServerFactory::silent(), EventBus::default());

    let item = provider.get_item("/docs/report.txt").result().await.unwrap();
    assert_eq!(item.id, "report-id");

    let missing = provider.get_item("/docs/other.txt").result().await;
    assert_eq!(missing.unwrap_err().code(), 404);

    let root = provider.get_item("/").result().await.unwrap();
    assert_eq!(root.id, "root");
}

#[tokio::test]
async fn test_create_directory_under_file_is_forbidden() {
    let client = authorizing_client(|_| Reply::ok("{}"));
    let provider = provider(authorized(), client.clone(), FakeServerFactory::silent(), EventBus::default());

    let result = provider
        .create_directory(file("f", "notes.txt"), "child")
        .result()
        .await;

    assert_eq!(result, Err(Error::status(403, "parent not a directory")));
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn test_create_directory() {
    let client = authorizing_client(|request| {
        assert_eq!(request.method, HttpMethod::Post);
        Reply::ok(item_json("new-id", "child", true))
    });
    let provider = provider(authorized(), client.clone(), FakeServerFactory::silent(), EventBus::default());

    let item = provider
        .create_directory(folder("root", "/"), "child")
        .result()
        .await
        .unwrap();

    assert_eq!(item.filename, "child");
    assert!(item.is_directory());
}

#[tokio::test]
async fn test_download_streams_range_into_sink() {
    let client = authorizing_client(|request| {
        assert_eq!(request.header_value("Range"), Some("bytes=0-3"));
        Reply::ok("data")
    });
    let provider = provider(authorized(), client, FakeServerFactory::silent(), EventBus::default());
    let progress_calls = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&progress_calls);
    let progress: ProgressFn = Arc::new(move |total, received| {
        recorder.lock().unwrap().push((total, received));
    });
    let (writer, mut reader) = tokio::io::duplex(1024);

    let written = provider
        .download_file(file("f", "f.bin"), Range::new(0, 4), writer, Some(progress))
        .result()
        .await
        .unwrap();

    let mut content = Vec::new();
    reader.read_to_end(&mut content).await.unwrap();
    assert_eq!(written, 4);
    assert_eq!(content, b"data");
    assert_eq!(progress_calls.lock().unwrap().last(), Some(&(4, 4)));
}

#[tokio::test]
async fn test_thumbnail_is_fetched_from_item_link() {
    let client = authorizing_client(|request| {
        assert_eq!(request.url, format!("{}/thumbs/f", API));
        assert_eq!(request.header_value("Range"), None);
        Reply::ok("png")
    });
    let provider = provider(authorized(), client.clone(), FakeServerFactory::silent(), EventBus::default());
    let mut item = file("f", "f.jpg");
    item.thumbnail_url = Some(format!("{}/thumbs/f", API));
    let (writer, mut reader) = tokio::io::duplex(1024);

    let written = provider.get_thumbnail(item, writer, None).result().await.unwrap();

    let mut content = Vec::new();
    reader.read_to_end(&mut content).await.unwrap();
    assert_eq!(written, 3);
    assert_eq!(content, b"png");
    assert_eq!(client.requests().len(), 1);
}

#[tokio::test]
async fn test_thumbnail_without_link_is_not_found() {
    let client = authorizing_client(|_| Reply::ok("unexpected"));
    let provider = provider(authorized(), client.clone(), FakeServerFactory::silent(), EventBus::default());

    let result = provider
        .get_thumbnail(file("f", "f.jpg"), tokio::io::sink(), None)
        .result()
        .await;

    assert_eq!(result.unwrap_err().code(), 404);
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn test_upload_file() {
    let client = authorizing_client(|request| {
        assert_eq!(request.method, HttpMethod::Put);
        Reply::ok(item_json("up", "new.txt", false))
    });
    let provider = provider(authorized(), client.clone(), FakeServerFactory::silent(), EventBus::default());

    let item = provider
        .upload_file(folder("root", "/"), "new.txt", bytes::Bytes::from_static(b"hello"), None)
        .result()
        .await
        .unwrap();

    assert_eq!(item.id, "up");
    let request = &client.requests()[0];
    assert_eq!(request.url, format!("{}/items/root/new.txt", API));
    assert_eq!(request.body.as_deref(), Some(&b"hello"[..]));
}

#[tokio::test]
async fn test_delete_move_rename() {
    let client = authorizing_client(|request| match request.method {
        HttpMethod::Delete => Reply::new(204, ""),
        _ => {
            let body = String::from_utf8_lossy(request.body.as_deref().unwrap_or_default()).into_owned();
            if body.contains("renamed") {
                Reply::ok(item_json("x", "renamed", false))
            } else {
                Reply::ok(item_json("x", "x.txt", false))
            }
        }
    });
    let provider = provider(authorized(), client.clone(), FakeServerFactory::silent(), EventBus::default());
    let item = file("x", "x.txt");

    provider.delete_item(item.clone()).result().await.unwrap();
    let moved = provider
        .move_item(item.clone(), folder("dest", "dest"))
        .result()
        .await
        .unwrap();
    let renamed = provider.rename_item(item, "renamed").result().await.unwrap();

    assert_eq!(moved.id, "x");
    assert_eq!(renamed.filename, "renamed");
    assert_eq!(client.requests().len(), 3);
}

#[tokio::test]
async fn test_cancel_list_directory_aborts_pending_page() {
    let client = authorizing_client(|_| Reply::ok(r#"{"items":[]}"#).after(Duration::from_secs(10)));
    let provider = provider(authorized(), client, FakeServerFactory::silent(), EventBus::default());

    let handle = provider.list_directory(provider.root_directory());
    while handle.operation().subrequest_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tokio::time::timeout(Duration::from_secs(2), handle.cancel())
        .await
        .expect("cancel should not wait for the slow page");

    assert_eq!(handle.result().await, Err(Error::Aborted));
}

#[tokio::test]
async fn test_session_round_trip_restores_provider() {
    let client = authorizing_client(|_| Reply::ok("{}"));
    let provider = provider(
        Setup {
            hints: vec![("access_token", FRESH_TOKEN), ("redirect_uri_port", "9000")],
            ..Setup::default()
        },
        client.clone(),
        FakeServerFactory::silent(),
        EventBus::default(),
    );

    let session = provider.serialize_session().unwrap();
    let (token, hints) = deserialize_session(&session).unwrap();

    assert_eq!(token, "r1");
    assert_eq!(hints.get("access_token").map(String::as_str), Some(FRESH_TOKEN));
    assert_eq!(hints.get("redirect_uri_port").map(String::as_str), Some("9000"));

    let config = ProviderConfig::builder()
        .token(token)
        .hints(hints)
        .http_client(client)
        .http_server(FakeServerFactory::silent())
        .build()
        .unwrap();
    let restored = core_request::CloudProvider::new(Box::new(TestBackend), config).unwrap();

    assert_eq!(restored.token(), "r1");
    assert_eq!(restored.access_token(), FRESH_TOKEN);
    assert_eq!(restored.hints(), provider.hints());
}

#[tokio::test]
async fn test_exchange_code_uses_authorize_url_verifier() {
    let client = authorizing_client(|_| Reply::ok("{}"));
    let provider = provider(
        Setup {
            token: None,
            ..Setup::default()
        },
        client.clone(),
        FakeServerFactory::silent(),
        EventBus::default(),
    );

    let url = provider.authorize_url().unwrap();
    assert!(url.starts_with("https://auth.test/authorize?"));
    assert!(url.contains("code_challenge_method=S256"));
    assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fauth"));

    let token = provider.exchange_code("xyz").result().await.unwrap();

    assert_eq!(token.access_token, FRESH_TOKEN);
    let body = &client.token_requests()[0];
    assert!(body.contains("code=xyz"));
    assert!(body.contains("code_verifier="));
    assert!(provider.access_token().is_empty());
}
