//! HTTP-level tests for the chat-completions backend.

use quiver_core::{GenerationBackend, GenerationParams};
use quiver_inference::openai::{OpenAIBackend, OpenAIConfig};
use quiver_inference::{collect_stream, GenerationClient};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend_for(server: &MockServer, api_key: Option<&str>) -> OpenAIBackend {
    OpenAIBackend::new(OpenAIConfig {
        base_url: server.uri(),
        api_key: api_key.map(str::to_string),
        gen_model: "test-gen".to_string(),
        timeout_seconds: 5,
    })
    .expect("Failed to create backend")
}

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
    })
}

#[tokio::test]
async fn test_generate_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-gen",
            "stream": false,
            "temperature": 0.0
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("MATCH (n) RETURN n")))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server, None);
    let text = backend
        .generate("system", "question", GenerationParams::with_temperature(0.0))
        .await
        .unwrap();
    assert_eq!(text, "MATCH (n) RETURN n");
}

#[tokio::test]
async fn test_api_key_sent_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server, Some("sk-test"));
    let result = backend
        .generate("", "hi", GenerationParams::default())
        .await;
    assert!(result.is_ok(), "Request should succeed: {:?}", result.err());
}

#[tokio::test]
async fn test_streamed_response_is_decoded() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"\\ufeffTwo \"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"risky\\r\\n\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"loans.\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n"
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let backend = backend_for(&server, None);
    let stream = backend
        .generate_stream("summarize", "rows", GenerationParams::default())
        .await
        .unwrap();
    assert_eq!(collect_stream(stream).await.unwrap(), "Two risky\nloans.");
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = backend_for(&server, None)
        .generate("", "hi", GenerationParams::default())
        .await
        .unwrap_err();
    assert!(err.is_transient(), "expected transient, got {:?}", err);
}

#[tokio::test]
async fn test_auth_failure_is_config_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": { "message": "Invalid API key", "type": "invalid_request_error" }
        })))
        .mount(&server)
        .await;

    let err = backend_for(&server, Some("wrong"))
        .generate("", "hi", GenerationParams::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFIG");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_client_retries_rate_limit_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": { "message": "slow down", "type": "rate_limit_exceeded" }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("recovered")))
        .mount(&server)
        .await;

    let client = GenerationClient::new(
        std::sync::Arc::new(backend_for(&server, None)),
        quiver_core::RetryPolicy {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
        },
        std::time::Duration::from_secs(5),
    );
    let text = client
        .complete("plan", "", "q", GenerationParams::default())
        .await
        .unwrap();
    assert_eq!(text, "recovered");
}
