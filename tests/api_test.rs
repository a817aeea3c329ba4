//! End-to-end tests over the full router with an in-memory database.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use bokmerke::db::Database;
use bokmerke::feed::ChangeFeed;
use bokmerke::handler::{AppState, router};
use bokmerke::session::SessionHub;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::time::timeout;
use tower::ServiceExt;

async fn test_app() -> Router {
    let db = Arc::new(Database::memory().await.expect("in-memory database"));
    let sessions = Arc::new(SessionHub::new(vec!["google".to_string()]));
    let feed = Arc::new(ChangeFeed::new(64));
    router(AppState { db, sessions, feed })
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn sign_in(app: &Router, subject: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/auth/session",
        None,
        Some(json!({
            "provider": "google",
            "subject": subject,
            "email": "someone@example.com",
            "name": "Someone",
            "avatar_url": null
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["token"].as_str().unwrap().to_string()
}

async fn open_stream(app: &Router, uri: &str, token: &str) -> Body {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.into_body()
}

/// Next server-sent event from the stream as (event name, parsed payload).
/// Keep-alive comments are skipped.
async fn next_sse(body: &mut Body) -> (String, Value) {
    loop {
        let frame = timeout(Duration::from_secs(5), body.frame())
            .await
            .expect("an event before the timeout")
            .expect("stream still open")
            .expect("readable frame");
        let Ok(data) = frame.into_data() else { continue };
        let text = String::from_utf8(data.to_vec()).unwrap();
        if text.starts_with(':') {
            continue;
        }

        let mut name = String::new();
        let mut payload = String::new();
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("event: ") {
                name = rest.to_string();
            } else if let Some(rest) = line.strip_prefix("data: ") {
                payload.push_str(rest);
            }
        }
        return (name, serde_json::from_str(&payload).unwrap());
    }
}

async fn assert_stream_ends(body: &mut Body) {
    loop {
        let frame = timeout(Duration::from_secs(5), body.frame())
            .await
            .expect("stream end before the timeout");
        let Some(frame) = frame else { return };
        if let Ok(data) = frame.expect("readable frame").into_data() {
            assert!(data.starts_with(b":"), "unexpected event after revocation");
        }
    }
}

#[tokio::test]
async fn healthcheck_answers() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "ok");
}

#[tokio::test]
async fn create_list_stats_delete_roundtrip() {
    let app = test_app().await;
    let token = sign_in(&app, "123").await;

    let (status, body) = send(&app, "GET", "/bookmarks/stats", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);

    let (status, body) = send(
        &app,
        "POST",
        "/bookmarks",
        Some(&token),
        Some(json!({ "url": "https://example.com", "title": "Example" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let record = &body["data"];
    assert_eq!(record["url"], "https://example.com");
    assert_eq!(record["title"], "Example");
    assert_eq!(record["owner"], "google:123");
    let id = record["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    let (status, body) = send(&app, "GET", "/bookmarks", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let records = body["data"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], id.as_str());
    assert_eq!(records[0]["url"], "https://example.com");

    let (status, body) = send(&app, "GET", "/bookmarks/stats", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["today"], 1);
    assert_eq!(body["data"]["this_week"], 1);

    let uri = format!("/bookmarks/{}", id);
    let (status, body) = send(&app, "DELETE", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], id.as_str());

    let (status, body) = send(&app, "GET", "/bookmarks", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, body) = send(&app, "GET", "/bookmarks/stats", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let app = test_app().await;

    let (status, _) = send(&app, "GET", "/bookmarks", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/bookmarks", Some("no-such-token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/bookmarks/feed", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/bookmarks/live", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        "POST",
        "/bookmarks",
        None,
        Some(json!({ "url": "https://example.com", "title": "Example" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_url_is_rejected_without_corruption() {
    let app = test_app().await;
    let token = sign_in(&app, "123").await;

    let (status, body) = send(
        &app,
        "POST",
        "/bookmarks",
        Some(&token),
        Some(json!({ "url": "not a url", "title": "Broken" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid url"));

    let (_, body) = send(&app, "GET", "/bookmarks", Some(&token), None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn users_are_isolated_from_each_other() {
    let app = test_app().await;
    let alice = sign_in(&app, "alice").await;
    let bob = sign_in(&app, "bob").await;

    let (_, body) = send(
        &app,
        "POST",
        "/bookmarks",
        Some(&alice),
        Some(json!({ "url": "https://example.com", "title": "Example" })),
    )
    .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (_, body) = send(&app, "GET", "/bookmarks", Some(&bob), None).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    // a foreign record behaves as absent
    let uri = format!("/bookmarks/{}", id);
    let (status, _) = send(&app, "DELETE", &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, "GET", "/bookmarks", Some(&alice), None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn sign_out_invalidates_the_token() {
    let app = test_app().await;
    let token = sign_in(&app, "123").await;

    let (status, body) = send(&app, "GET", "/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user_id"], "google:123");

    let (status, _) = send(&app, "DELETE", "/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "GET", "/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, "GET", "/bookmarks", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unlisted_provider_is_rejected() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/auth/session",
        None,
        Some(json!({
            "provider": "github",
            "subject": "123",
            "email": null,
            "name": null,
            "avatar_url": null
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("provider"));
}

#[tokio::test]
async fn live_stream_snapshots_then_reconciles_changes() {
    let app = test_app().await;
    let token = sign_in(&app, "123").await;

    let (_, body) = send(
        &app,
        "POST",
        "/bookmarks",
        Some(&token),
        Some(json!({ "url": "https://one.example.com", "title": "One" })),
    )
    .await;
    let first_id = body["data"]["id"].as_str().unwrap().to_string();

    let mut stream = open_stream(&app, "/bookmarks/live", &token).await;

    let (name, frame) = next_sse(&mut stream).await;
    assert_eq!(name, "snapshot");
    assert_eq!(frame["kind"], "snapshot");
    assert_eq!(frame["records"].as_array().unwrap().len(), 1);
    assert_eq!(frame["records"][0]["id"], first_id.as_str());
    assert_eq!(frame["stats"]["total"], 1);

    let (_, body) = send(
        &app,
        "POST",
        "/bookmarks",
        Some(&token),
        Some(json!({ "url": "https://two.example.com", "title": "Two" })),
    )
    .await;
    let second_id = body["data"]["id"].as_str().unwrap().to_string();

    let (name, frame) = next_sse(&mut stream).await;
    assert_eq!(name, "change");
    assert_eq!(frame["kind"], "change");
    assert_eq!(frame["event"]["event"], "insert");
    assert_eq!(frame["event"]["record"]["id"], second_id.as_str());
    assert_eq!(frame["stats"]["total"], 2);

    let uri = format!("/bookmarks/{}", first_id);
    let (status, _) = send(&app, "DELETE", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (name, frame) = next_sse(&mut stream).await;
    assert_eq!(name, "change");
    assert_eq!(frame["event"]["event"], "delete");
    assert_eq!(frame["event"]["record"]["id"], first_id.as_str());
    assert_eq!(frame["stats"]["total"], 1);

    // revoking the session ends the stream
    let (status, _) = send(&app, "DELETE", "/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_stream_ends(&mut stream).await;
}

#[tokio::test]
async fn feed_stream_is_owner_scoped_and_ends_on_sign_out() {
    let app = test_app().await;
    let alice = sign_in(&app, "alice").await;
    let bob = sign_in(&app, "bob").await;

    let mut stream = open_stream(&app, "/bookmarks/feed", &alice).await;

    // a foreign event is never delivered
    send(
        &app,
        "POST",
        "/bookmarks",
        Some(&bob),
        Some(json!({ "url": "https://bob.example.com", "title": "Bob" })),
    )
    .await;
    let (_, body) = send(
        &app,
        "POST",
        "/bookmarks",
        Some(&alice),
        Some(json!({ "url": "https://alice.example.com", "title": "Alice" })),
    )
    .await;
    let alice_id = body["data"]["id"].as_str().unwrap().to_string();

    let (name, frame) = next_sse(&mut stream).await;
    assert_eq!(name, "change");
    assert_eq!(frame["event"], "insert");
    assert_eq!(frame["record"]["id"], alice_id.as_str());
    assert_eq!(frame["record"]["owner"], "google:alice");

    send(&app, "DELETE", "/auth/session", Some(&alice), None).await;
    assert_stream_ends(&mut stream).await;
}

#[tokio::test]
async fn disconnected_feed_client_releases_its_subscription() {
    let db = Arc::new(Database::memory().await.expect("in-memory database"));
    let sessions = Arc::new(SessionHub::new(vec!["google".to_string()]));
    let feed = Arc::new(ChangeFeed::new(64));
    let app = router(AppState {
        db,
        sessions,
        feed: feed.clone(),
    });
    let token = sign_in(&app, "123").await;

    let stream = open_stream(&app, "/bookmarks/feed", &token).await;
    assert_eq!(feed.receiver_count(), 1);

    drop(stream);
    for _ in 0..200 {
        if feed.receiver_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("subscription still held after the client disconnected");
}
