use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use stock_tally::clients::{CompletionBackend, CompletionError, OpenAiCompatClient};
use stock_tally::config::FallbackConfig;
use stock_tally::error::StockError;
use stock_tally::extractor::StatePair;
use stock_tally::fallback::FallbackExtractor;
use stock_tally::vocabulary::Vocabulary;

fn fallback_config(server: &MockServer, timeout_ms: u64) -> FallbackConfig {
    FallbackConfig {
        enable: true,
        base_url: server.base_url(),
        model: "test-model".to_string(),
        timeout_ms,
        temperature: 0.0,
    }
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "cmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn extractor(client: OpenAiCompatClient, timeout_ms: u64) -> FallbackExtractor {
    FallbackExtractor::new(
        Arc::new(client),
        Arc::new(Vocabulary::default()),
        Duration::from_millis(timeout_ms),
    )
}

#[tokio::test]
async fn client_posts_chat_completion_with_bearer_and_json_mode() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .header("authorization", "Bearer sk-test")
            .json_body_includes(
                json!({
                    "model": "test-model",
                    "messages": [{"role": "system"}, {"role": "user"}],
                    "response_format": {"type": "json_object"}
                })
                .to_string(),
            )
            .body_includes("лабубу");
        then.status(200).json_body(completion("  {\"shop\": \"хайп\"}  "));
    });

    let client = OpenAiCompatClient::new(&fallback_config(&server, 2_000), "sk-test".into())
        .expect("client");
    let reply = client
        .complete("хайп: лабубу почти разобрали")
        .await
        .expect("completion");
    assert_eq!(reply, "{\"shop\": \"хайп\"}");
    mock.assert_calls(1);
}

#[tokio::test]
async fn client_surfaces_error_status_with_body() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(500).body("upstream exploded");
    });

    let client =
        OpenAiCompatClient::new(&fallback_config(&server, 2_000), "sk".into()).expect("client");
    match client.complete("text").await {
        Err(CompletionError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert!(body.contains("upstream exploded"));
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn extractor_applies_validated_reply() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(200).json_body(completion(
            r#"{"shop": "Янтарь", "items": [["закончились", "Стичи"], ["мало", "брелки"]]}"#,
        ));
    });

    let client =
        OpenAiCompatClient::new(&fallback_config(&server, 2_000), "sk".into()).expect("client");
    let result = extractor(client, 2_000)
        .try_extract("в янтаре стичей больше нет, брелков пара штук")
        .await
        .expect("valid reply")
        .expect("items reported");

    assert_eq!(result.shop, "янтарь");
    assert_eq!(
        result.pairs,
        vec![StatePair::new("нету", "стичи"), StatePair::new("мало", "брелки")]
    );
    mock.assert_calls(1);
}

#[tokio::test]
async fn extractor_rejects_unknown_shop() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(200).json_body(completion(
            r#"{"shop": "ашан", "items": [["мало", "лабубу"]]}"#,
        ));
    });

    let client =
        OpenAiCompatClient::new(&fallback_config(&server, 2_000), "sk".into()).expect("client");
    let err = extractor(client, 2_000)
        .try_extract("в ашане мало лабубу")
        .await
        .expect_err("unknown shop");
    assert!(matches!(err, StockError::MalformedResponse { .. }), "{err:?}");
}

#[tokio::test]
async fn extractor_rejects_non_json_reply() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(200)
            .json_body(completion("Sorry, I can't help with that."));
    });

    let client =
        OpenAiCompatClient::new(&fallback_config(&server, 2_000), "sk".into()).expect("client");
    let extractor = extractor(client, 2_000);
    assert!(extractor.extract("что-то непонятное").await.is_none());
}

#[tokio::test]
async fn slow_backend_times_out_without_result() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(200)
            .delay(Duration::from_millis(1_500))
            .json_body(completion(r#"{"shop": "хайп", "items": [["мало", "лабубу"]]}"#));
    });

    let client =
        OpenAiCompatClient::new(&fallback_config(&server, 200), "sk".into()).expect("client");
    let err = extractor(client, 200)
        .try_extract("хайп лабубу")
        .await
        .expect_err("timeout");
    assert!(matches!(err, StockError::Timeout { .. }), "{err:?}");
}

#[tokio::test]
async fn unreachable_backend_is_transport_error() {
    let config = FallbackConfig {
        enable: true,
        base_url: "http://127.0.0.1:9".to_string(),
        model: "m".to_string(),
        timeout_ms: 1_000,
        temperature: 0.0,
    };
    let client = OpenAiCompatClient::new(&config, "sk".into()).expect("client");
    let err = extractor(client, 1_000)
        .try_extract("хайп лабубу")
        .await
        .expect_err("connection refused");
    assert!(
        matches!(err, StockError::Transport { .. } | StockError::Timeout { .. }),
        "{err:?}"
    );
}
