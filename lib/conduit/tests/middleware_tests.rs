//! Integration tests for middleware functionality.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use conduit::middleware::from_fn;
use conduit::{
    CancellationToken, Client, CookieJar, Dispatcher, Error, Event, EventKind, Method, Request,
    Response, RetryConfig,
};
use http::HeaderMap;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, header_exists, method, path},
};

fn url(server: &MockServer, route: &str) -> url::Url {
    url::Url::parse(&format!("{}{route}", server.uri())).expect("url")
}

fn get(server: &MockServer, route: &str) -> Request {
    Request::builder(Method::Get, url(server, route))
        .build()
        .expect("request")
}

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::new(max_retries)
        .with_base_delay(Duration::from_millis(10))
        .with_jitter(false)
}

/// Test that a session cookie set on login is sent back on later requests.
#[tokio::test]
async fn test_cookie_session_flow() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200).append_header("Set-Cookie", "session=abc123; Path=/; HttpOnly"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/dashboard"))
        .and(header("Cookie", "session=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .mount(&mock_server)
        .await;

    let jar = Arc::new(CookieJar::new());
    let client = Client::builder()
        .with_cookie_jar(Arc::clone(&jar))
        .with_error_for_status()
        .build();

    let login = Request::builder(Method::Post, url(&mock_server, "/login"))
        .build()
        .expect("request");
    client.execute(login).await.expect("login");
    assert_eq!(jar.len(), 1);

    let response = client
        .execute(get(&mock_server, "/dashboard"))
        .await
        .expect("dashboard");

    assert_eq!(response.text().expect("utf-8"), "welcome");
}

/// Test that server errors are retried until the server recovers.
#[tokio::test]
async fn test_retry_recovers_from_server_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .with_retry_config(fast_retry(3))
        .with_error_for_status()
        .build();

    let response = client
        .execute(get(&mock_server, "/flaky"))
        .await
        .expect("response");

    assert_eq!(response.status(), 200);
}

/// Test that the last error and the full history survive exhaustion.
#[tokio::test]
async fn test_retry_exhaustion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .with_retry_config(fast_retry(2))
        .with_error_for_status()
        .build();

    let error = client
        .execute(get(&mock_server, "/down"))
        .await
        .expect_err("exhausted");

    assert!(error.is_retry_exhausted());
    let context = error.retry_context().expect("context");
    assert_eq!(context.attempt(), 2);
    assert_eq!(context.errors_seen().len(), 2);
    assert_eq!(
        context.delays_used(),
        [Duration::from_millis(10), Duration::from_millis(20)]
    );
}

/// Test that client errors are not retried.
#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/forbidden"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .with_retry_config(fast_retry(3))
        .with_error_for_status()
        .build();

    let error = client
        .execute(get(&mock_server, "/forbidden"))
        .await
        .expect_err("forbidden");

    assert_eq!(error.status(), Some(403));
}

/// Test that cancelling stops a request waiting for its next attempt.
#[tokio::test]
async fn test_cancel_during_backoff() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .with_retry_config(
            RetryConfig::new(3)
                .with_base_delay(Duration::from_secs(30))
                .with_jitter(false),
        )
        .with_error_for_status()
        .build();
    let token = CancellationToken::new();

    let pending = tokio::spawn(
        client.execute_cancellable(get(&mock_server, "/down"), token.clone()),
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("cancelled in time")
        .expect("join");

    assert!(matches!(result, Err(Error::Cancelled)));
}

/// Test that events cover every attempt of a retried request.
#[tokio::test]
async fn test_events_with_retry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.listen_all(move |event: &mut Event| {
        sink.lock().expect("lock").push(event.kind());
    });

    let client = Client::builder()
        .with_events(dispatcher)
        .with_retry_config(fast_retry(2))
        .with_error_for_status()
        .build();

    client
        .execute(get(&mock_server, "/flaky"))
        .await
        .expect("response");

    assert_eq!(
        *seen.lock().expect("lock"),
        [
            EventKind::RequestSending,
            EventKind::AttemptFailed,
            EventKind::RetryScheduled,
            EventKind::ResponseReceived,
            EventKind::RequestCompleted
        ]
    );
}

/// Test that a short-circuiting middleware never reaches the server.
#[tokio::test]
async fn test_short_circuit() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .with_logging()
        .layer(from_fn(|_request, _next| async {
            Ok::<_, Error>(Response::new(
                200,
                HeaderMap::new(),
                Bytes::from_static(b"cached"),
            ))
        }))
        .build();

    let response = client
        .execute(get(&mock_server, "/anything"))
        .await
        .expect("response");

    assert_eq!(response.body(), &Bytes::from_static(b"cached"));
}

/// Test that request-transforming middleware is seen by the server.
#[tokio::test]
async fn test_header_injection() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/traced"))
        .and(header_exists("x-request-id"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .with_debug_logging()
        .layer(from_fn(|request: Request, next| async move {
            let request = request.with_header(
                http::HeaderName::from_static("x-request-id"),
                http::HeaderValue::from_static("req-1"),
            );
            next.run(request).await
        }))
        .with_error_for_status()
        .build();

    let response = client
        .execute(get(&mock_server, "/traced"))
        .await
        .expect("response");

    assert_eq!(response.status(), 200);
}
