use ai_dispatch::transport::HttpTransport;
use ai_dispatch::{
    Credentials, Dispatcher, DispatcherConfig, EndpointKind, Error, ErrorLogEntry,
    InMemoryErrorSink, JsonlErrorSink, Transport, TransportError, WorkItem,
};
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn transport_for(server: &mockito::ServerGuard) -> HttpTransport {
    HttpTransport::new(&format!("{}/v1", server.url()), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_send_posts_json_with_credentials() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/embeddings")
        .match_header("authorization", "Bearer sk-test")
        .match_header("x-org", "acme")
        .match_body(Matcher::PartialJson(json!({"input": "hello"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":[{"embedding":[0.5]}]}"#)
        .create_async()
        .await;

    let response = transport_for(&server)
        .send(
            "embeddings",
            &json!({"model": "m", "input": "hello"}),
            &Credentials::bearer("sk-test").with_header("x-org", "acme"),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert!(response.is_success());
    assert_eq!(response.body["data"][0]["embedding"][0], 0.5);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_status_is_returned_not_raised() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(429)
        .with_body(r#"{"error":{"message":"Rate limit reached"}}"#)
        .create_async()
        .await;

    let response = transport_for(&server)
        .send("/chat/completions", &json!({}), &Credentials::new())
        .await
        .unwrap();
    assert_eq!(response.status, 429);
    assert_eq!(response.body["error"]["message"], "Rate limit reached");
}

#[tokio::test]
async fn test_non_json_success_body_is_decode_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/completions")
        .with_status(200)
        .with_body("<html>ok</html>")
        .create_async()
        .await;

    let err = transport_for(&server)
        .send("completions", &json!({"prompt": "x"}), &Credentials::new())
        .await
        .unwrap_err();
    match err {
        TransportError::Decode(msg) => assert!(msg.contains("HTTP 200")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_non_json_error_page_keeps_status() {
    let mut server = mockito::Server::new_async().await;
    let _gateway = server
        .mock("POST", "/v1/completions")
        .with_status(502)
        .with_body("<html>bad gateway</html>")
        .create_async()
        .await;
    let _empty = server
        .mock("POST", "/v1/embeddings")
        .with_status(503)
        .create_async()
        .await;

    let transport = transport_for(&server);
    let response = transport
        .send("completions", &json!({"prompt": "x"}), &Credentials::new())
        .await
        .unwrap();
    assert_eq!(response.status, 502);
    assert_eq!(response.body, json!("<html>bad gateway</html>"));

    let response = transport
        .send("embeddings", &json!({"input": "x"}), &Credentials::new())
        .await
        .unwrap();
    assert_eq!(response.status, 503);
    assert!(response.body.is_null());
}

#[tokio::test]
async fn test_dispatcher_backs_off_on_html_429() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(429)
        .with_header("content-type", "text/html")
        .with_body("<html>Too Many Requests</html>")
        .expect(2)
        .create_async()
        .await;

    let config = DispatcherConfig::default()
        .with_base_url(format!("{}/v1", server.url()))
        .with_max_attempts(2)
        .with_rate_limit_backoff_seconds(0.3)
        .with_token_encoding_name("chars");
    let sink = Arc::new(InMemoryErrorSink::new());
    let dispatcher = Dispatcher::builder(config)
        .error_sink(sink.clone())
        .start()
        .unwrap();

    let started = Instant::now();
    let err = dispatcher
        .submit(
            EndpointKind::Chat,
            json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]}),
            Credentials::bearer("k"),
        )
        .unwrap()
        .await
        .unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(300));
    match err {
        Error::AttemptsExhausted { attempts, errors } => {
            assert_eq!(attempts, 2);
            assert!(errors[0].contains("Too Many Requests"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    mock.assert_async().await;

    let status = dispatcher.status();
    assert_eq!(status.rate_limited, 2);
    assert_eq!(status.other_errors, 0);
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn test_dispatcher_over_http_logs_exhausted_item_to_jsonl() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(400)
        .with_body(r#"{"error":{"message":"model not found"}}"#)
        .expect(2)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let errors_path = dir.path().join("errors.jsonl");
    let config = DispatcherConfig::default()
        .with_base_url(format!("{}/v1/", server.url()))
        .with_workers(2)
        .with_max_attempts(2)
        .with_token_encoding_name("chars");
    let dispatcher = Dispatcher::builder(config)
        .error_sink(Arc::new(JsonlErrorSink::new(&errors_path)))
        .start()
        .unwrap();

    let payload = json!({"model": "nope", "messages": [{"role": "user", "content": "hi"}]});
    let item = WorkItem::new(EndpointKind::Chat, payload.clone(), Credentials::bearer("k"))
        .with_metadata(json!({"id": "row-1"}));
    let err = dispatcher.submit_item(item).unwrap().await.unwrap_err();
    assert!(matches!(err, Error::AttemptsExhausted { attempts: 2, .. }));
    dispatcher.drain().await;
    mock.assert_async().await;

    let text = std::fs::read_to_string(&errors_path).unwrap();
    let entries: Vec<ErrorLogEntry> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payload, payload);
    assert_eq!(entries[0].metadata, json!({"id": "row-1"}));
    assert!(entries[0].errors[0].contains("model not found"));
    assert_eq!(dispatcher.status().api_errors, 2);
}

#[tokio::test]
async fn test_dispatcher_over_http_success() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/completions")
        .match_header("authorization", "Bearer k")
        .with_status(200)
        .with_body(r#"{"choices":[{"text":"done"}]}"#)
        .expect(3)
        .create_async()
        .await;

    let config = DispatcherConfig::default()
        .with_base_url(format!("{}/v1", server.url()))
        .with_token_encoding_name("chars");
    let dispatcher = Dispatcher::start(config).unwrap();

    let handles: Vec<_> = (0..3)
        .map(|i| {
            dispatcher
                .submit(
                    EndpointKind::Completion,
                    json!({"model": "m", "prompt": format!("prompt {i}"), "max_tokens": 5}),
                    Credentials::bearer("k"),
                )
                .unwrap()
        })
        .collect();
    for h in handles {
        assert_eq!(h.await.unwrap()["choices"][0]["text"], "done");
    }
    mock.assert_async().await;
    assert_eq!(dispatcher.status().succeeded, 3);
}
