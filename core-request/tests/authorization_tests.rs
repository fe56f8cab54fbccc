mod common;

use common::*;
use core_request::Error;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use futures::future::join_all;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

async fn wait_for_event(events: &mut Receiver<CoreEvent>, matches: impl Fn(&AuthEvent) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(CoreEvent::Auth(event)) if matches(&event) => return,
                Ok(_) => continue,
                Err(e) => panic!("event bus closed: {}", e),
            }
        }
    })
    .await
    .expect("event not emitted in time");
}

fn item_api(request: &bridge_traits::HttpRequest) -> Reply {
    let id = request.url.rsplit('/').next().unwrap_or_default().to_string();
    Reply::ok(item_json(&id, &format!("{}.txt", id), false))
}

#[tokio::test]
async fn test_unauthorized_request_reauthorizes_and_retries_once() {
    let client = authorizing_client(item_api);
    let server = FakeServerFactory::silent();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let provider = provider(Setup::default(), client.clone(), server.clone(), events);

    let item = provider.get_item_data("a").result().await.unwrap();

    assert_eq!(item.id, "a");
    assert_eq!(client.token_requests().len(), 1);
    assert!(client.token_requests()[0].contains("grant_type=refresh_token"));
    assert!(client.token_requests()[0].contains("refresh_token=r1"));
    assert_eq!(client.count(&format!("{}/items/a", API)), 2);
    assert_eq!(server.started(), 0);
    assert_eq!(provider.access_token(), FRESH_TOKEN);
    assert_eq!(provider.token(), "r2");
    assert!(!provider.authorization_in_flight());
    wait_for_event(&mut rx, |e| matches!(e, AuthEvent::TokenRefreshed { .. })).await;
}

#[tokio::test]
async fn test_concurrent_unauthorized_requests_share_one_authorization() {
    let client = authorizing_client(item_api);
    let provider = provider(
        Setup::default(),
        client.clone(),
        FakeServerFactory::silent(),
        EventBus::default(),
    );

    let handles: Vec<_> = (0..5)
        .map(|i| provider.get_item_data(format!("item{}", i)))
        .collect();
    let results = join_all(handles.iter().map(|handle| handle.result())).await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap().id, format!("item{}", i));
    }
    assert_eq!(client.token_requests().len(), 1);
}

#[tokio::test]
async fn test_authorized_request_is_not_retried() {
    let client = authorizing_client(item_api);
    let provider = provider(
        Setup {
            hints: vec![("access_token", FRESH_TOKEN)],
            ..Setup::default()
        },
        client.clone(),
        FakeServerFactory::silent(),
        EventBus::default(),
    );

    provider.get_item_data("a").result().await.unwrap();

    assert!(client.token_requests().is_empty());
    assert_eq!(client.requests().len(), 1);
}

#[tokio::test]
async fn test_non_authorization_error_is_returned_as_is() {
    let client = authorizing_client(|_| Reply::new(404, "no such item"));
    let provider = provider(
        Setup {
            hints: vec![("access_token", FRESH_TOKEN)],
            ..Setup::default()
        },
        client.clone(),
        FakeServerFactory::silent(),
        EventBus::default(),
    );

    let result = provider.get_item_data("missing").result().await;

    assert_eq!(result, Err(Error::status(404, "no such item")));
    assert_eq!(client.requests().len(), 1);
}

#[tokio::test]
async fn test_second_authorization_failure_is_final() {
    // rejects every API call, even with a fresh token
    let client = ScriptedHttpClient::new(|request| {
        if request.url == TOKEN_URL {
            Reply::ok(r#"{"access_token":"fresh"}"#)
        } else {
            Reply::new(401, "expired")
        }
    });
    let provider = provider(
        Setup::default(),
        client.clone(),
        FakeServerFactory::silent(),
        EventBus::default(),
    );

    let result = provider.get_item_data("a").result().await;

    assert_eq!(result, Err(Error::status(401, "expired")));
    assert_eq!(client.token_requests().len(), 1);
    assert_eq!(client.count(&format!("{}/items/a", API)), 2);
}

#[tokio::test]
async fn test_interactive_authorization_captures_code() {
    let client = authorizing_client(item_api);
    let server =
        FakeServerFactory::redirecting(&[("code", "c0de"), ("state", "fixed"), ("accepted", "true")]);
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let provider = provider(
        Setup {
            token: None,
            hints: vec![("state", "fixed")],
            ..Setup::default()
        },
        client.clone(),
        server.clone(),
        events,
    );

    let item = provider.get_item_data("a").result().await.unwrap();

    assert_eq!(item.id, "a");
    assert_eq!(server.started(), 1);
    assert!(server.stopped());
    let token_requests = client.token_requests();
    assert_eq!(token_requests.len(), 1);
    assert!(token_requests[0].contains("grant_type=authorization_code"));
    assert!(token_requests[0].contains("code=c0de"));
    assert!(token_requests[0].contains("code_verifier="));
    wait_for_event(&mut rx, |e| matches!(e, AuthEvent::UserConsentRequired { .. })).await;
    wait_for_event(&mut rx, |e| matches!(e, AuthEvent::Authorized { .. })).await;
}

#[tokio::test]
async fn test_rejected_refresh_token_falls_back_to_interactive() {
    let client = authorizing_client(item_api);
    let server =
        FakeServerFactory::redirecting(&[("code", "c0de"), ("state", "fixed"), ("accepted", "true")]);
    let provider = provider(
        Setup {
            token: Some("revoked"),
            hints: vec![("state", "fixed")],
            ..Setup::default()
        },
        client.clone(),
        server.clone(),
        EventBus::default(),
    );

    provider.get_item_data("a").result().await.unwrap();

    let token_requests = client.token_requests();
    assert_eq!(token_requests.len(), 2);
    assert!(token_requests[0].contains("grant_type=refresh_token"));
    assert!(token_requests[1].contains("grant_type=authorization_code"));
    assert_eq!(server.started(), 1);
}

#[tokio::test]
async fn test_denied_consent_fails_dependent_with_authorization_error() {
    let client = authorizing_client(item_api);
    let server = FakeServerFactory::redirecting(&[("error", "access_denied"), ("accepted", "true")]);
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let provider = provider(
        Setup {
            token: None,
            ..Setup::default()
        },
        client.clone(),
        server.clone(),
        events,
    );

    let result = provider.get_item_data("a").result().await;

    match result {
        Err(Error::Authorization(message)) => assert!(message.contains("access_denied")),
        other => panic!("expected authorization error, got {:?}", other),
    }
    assert!(server.stopped());
    assert!(client.token_requests().is_empty());
    assert!(!provider.authorization_in_flight());
    wait_for_event(&mut rx, |e| matches!(e, AuthEvent::AuthorizationFailed { .. })).await;
}

#[tokio::test]
async fn test_non_interactive_provider_fails_without_server() {
    let client = authorizing_client(item_api);
    let server = FakeServerFactory::silent();
    let provider = provider(
        Setup {
            token: Some("revoked"),
            interactive: false,
            ..Setup::default()
        },
        client.clone(),
        server.clone(),
        EventBus::default(),
    );

    let result = provider.get_item_data("a").result().await;

    assert!(matches!(result, Err(Error::Authorization(_))));
    assert_eq!(server.started(), 0);
}

#[tokio::test]
async fn test_cancelling_sole_dependent_cancels_authorization() {
    let client = authorizing_client(item_api);
    let server = FakeServerFactory::silent();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let provider = provider(
        Setup {
            token: None,
            ..Setup::default()
        },
        client.clone(),
        server.clone(),
        events,
    );

    let handle = provider.get_item_data("a");
    wait_for_event(&mut rx, |e| matches!(e, AuthEvent::CallbackServerStarted { .. })).await;
    assert!(provider.authorization_in_flight());

    handle.cancel().await;

    assert_eq!(handle.result().await, Err(Error::Aborted));
    assert!(server.stopped());
    assert!(!provider.authorization_in_flight());
    wait_for_event(&mut rx, |e| matches!(e, AuthEvent::CallbackServerStopped { .. })).await;
}

#[tokio::test]
async fn test_cancelling_one_of_two_dependents_keeps_authorization() {
    let client = authorizing_client(item_api);
    let server = FakeServerFactory::silent();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let provider = provider(
        Setup {
            token: None,
            ..Setup::default()
        },
        client.clone(),
        server.clone(),
        events,
    );

    let first = provider.get_item_data("a");
    let second = provider.get_item_data("b");
    wait_for_event(&mut rx, |e| matches!(e, AuthEvent::CallbackServerStarted { .. })).await;
    // give the second request time to join the funnel
    tokio::time::sleep(Duration::from_millis(50)).await;

    first.cancel().await;

    assert_eq!(first.result().await, Err(Error::Aborted));
    assert!(provider.authorization_in_flight());
    assert!(!server.stopped());

    second.cancel().await;
    assert_eq!(second.result().await, Err(Error::Aborted));
    assert!(server.stopped());
    assert!(!provider.authorization_in_flight());
}

#[tokio::test]
async fn test_funnel_is_reusable_after_cancelled_authorization() {
    let client = authorizing_client(item_api);
    let server = FakeServerFactory::silent();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let provider = provider(
        Setup {
            token: None,
            ..Setup::default()
        },
        client.clone(),
        server.clone(),
        events,
    );

    let handle = provider.get_item_data("a");
    wait_for_event(&mut rx, |e| matches!(e, AuthEvent::CallbackServerStarted { .. })).await;
    handle.cancel().await;

    let retry = provider.get_item_data("a");
    wait_for_event(&mut rx, |e| matches!(e, AuthEvent::CallbackServerStarted { .. })).await;
    assert_eq!(server.started(), 2);
    retry.cancel().await;
    assert_eq!(retry.result().await, Err(Error::Aborted));
}

#[tokio::test]
async fn test_request_during_authorization_shutdown_waits_for_it() {
    let client = authorizing_client(item_api);
    let server = FakeServerFactory::slow_to_stop(Duration::from_millis(200));
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let provider = provider(
        Setup {
            token: None,
            ..Setup::default()
        },
        client.clone(),
        server.clone(),
        events,
    );

    let first = provider.get_item_data("a");
    wait_for_event(&mut rx, |e| matches!(e, AuthEvent::CallbackServerStarted { .. })).await;
    drop(first);
    // the withdrawn authorization is still stopping its server
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(provider.authorization_in_flight());

    let second = provider.get_item_data("b");
    wait_for_event(&mut rx, |e| matches!(e, AuthEvent::CallbackServerStarted { .. })).await;

    assert_eq!(server.started(), 2);
    assert_eq!(server.peak_active(), 1);
    second.cancel().await;
    assert_eq!(second.result().await, Err(Error::Aborted));
}
