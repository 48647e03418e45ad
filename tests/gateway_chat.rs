use std::sync::{Arc, Mutex};
use std::time::Duration;

use annotation_harness::gateway::openai_compat::{ChatCompletionsAdapter, ChatProvider};
use annotation_harness::gateway::usage::{CallStatus, ProviderCallRecord};
use annotation_harness::gateway::{
    chat_cost, Attribution, ChatRequest, FinishReason, Message, ProviderError, ProviderGateway,
    UsageSink,
};
use annotation_harness::invoker::{GenerateRequest, TextGenerator};
use annotation_harness::{ContentType, ModelProfile, ProviderConnection};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<ProviderCallRecord>>,
}

#[async_trait::async_trait]
impl UsageSink for RecordingSink {
    async fn record(&self, record: ProviderCallRecord) {
        self.records.lock().unwrap().push(record);
    }
}

fn ok_body(content: &str) -> serde_json::Value {
    json!({
        "choices": [{ "message": { "content": content }, "finish_reason": "stop" }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 3 }
    })
}

fn connection(server: &MockServer) -> ProviderConnection {
    ProviderConnection::new("conn-1", "openai")
        .with_api_key("sk-test")
        .with_base_url(server.uri())
}

async fn generate(
    gateway: &ProviderGateway<RecordingSink>,
    connection: &ProviderConnection,
    profile: &ModelProfile,
    content: &str,
    content_type: ContentType,
) -> Result<String, ProviderError> {
    let attribution = Attribution::new("test::generate");
    gateway
        .generate(GenerateRequest {
            item_id: "item-1",
            content,
            content_type,
            prompt: "Classify:",
            profile,
            connection,
            attribution: &attribution,
        })
        .await
}

#[tokio::test]
async fn adapter_parses_content_usage_and_cost() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("positive")))
        .mount(&server)
        .await;

    let adapter =
        ChatCompletionsAdapter::new("openai", "sk-test", server.uri(), Duration::from_secs(5))
            .unwrap();
    let req = ChatRequest::new("gpt-4o-mini", vec![Message::user("hi")], Attribution::new("test"));
    let resp = adapter.chat(&req).await.unwrap();

    assert_eq!(resp.content, "positive");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!((resp.input_tokens, resp.output_tokens), (12, 3));
    assert_eq!(resp.cost_nanodollars, chat_cost("openai", "gpt-4o-mini", 12, 3));
}

#[tokio::test]
async fn gateway_sends_profile_settings_and_records_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "temperature": 0.0,
            "max_tokens": 64,
            "messages": [{ "role": "user", "content": "Classify:\n\nThe food was great" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("positive")))
        .expect(1)
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let gateway = ProviderGateway::new(sink.clone());
    let mut profile = ModelProfile::new("p1", "conn-1", "gpt-4o-mini");
    profile.temperature = Some(0.0);
    profile.max_tokens = Some(64);

    let text = generate(&gateway, &connection(&server), &profile, "The food was great", ContentType::Text)
        .await
        .unwrap();
    assert_eq!(text, "positive");

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, CallStatus::Success);
    assert_eq!(records[0].item_id.as_deref(), Some("item-1"));
    assert_eq!(records[0].caller, "test::generate");
    assert_eq!(records[0].input_tokens, 12);
}

#[tokio::test]
async fn image_items_are_sent_as_image_parts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": "Classify:" },
                    { "type": "image_url", "image_url": { "url": "https://img.test/cat.png" } }
                ]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("cat")))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = ProviderGateway::new(Arc::new(RecordingSink::default()));
    let profile = ModelProfile::new("p1", "conn-1", "gpt-4o");
    let text = generate(
        &gateway,
        &connection(&server),
        &profile,
        "https://img.test/cat.png",
        ContentType::Image,
    )
    .await
    .unwrap();
    assert_eq!(text, "cat");
}

#[tokio::test]
async fn http_errors_map_to_provider_errors_and_are_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "bad key", "code": "invalid_api_key" }
        })))
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let gateway = ProviderGateway::new(sink.clone());
    let profile = ModelProfile::new("p1", "conn-1", "gpt-4o-mini");

    let err = generate(&gateway, &connection(&server), &profile, "x", ContentType::Text)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Unauthorized { .. }));

    let records = sink.records.lock().unwrap();
    assert_eq!(records[0].status, CallStatus::Error);
    assert_eq!(records[0].error_code.as_deref(), Some("unauthorized"));
}

#[tokio::test]
async fn rate_limits_and_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "limited" })))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "broken" })))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .mount(&server)
        .await;

    let gateway = ProviderGateway::new(Arc::new(RecordingSink::default()));
    let conn = connection(&server);

    let err = generate(&gateway, &conn, &ModelProfile::new("p1", "conn-1", "limited"), "x", ContentType::Text)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "rate_limited");
    assert!(matches!(
        err,
        ProviderError::RateLimited { retry_after, .. } if retry_after == Duration::from_secs(12)
    ));

    let err = generate(&gateway, &conn, &ModelProfile::new("p2", "conn-1", "broken"), "x", ContentType::Text)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "provider_error");
    assert_eq!(err.context().and_then(|c| c.http_status), Some(500));
}

#[tokio::test]
async fn unusable_connections_fail_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("x")))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = ProviderGateway::new(Arc::new(RecordingSink::default()));
    let profile = ModelProfile::new("p1", "conn-1", "gpt-4o-mini");

    let inactive = connection(&server).inactive();
    let err = generate(&gateway, &inactive, &profile, "x", ContentType::Text)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "config_error");

    let mut keyless = connection(&server);
    keyless.api_key = None;
    let err = generate(&gateway, &keyless, &profile, "x", ContentType::Text)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "config_error");
}

#[tokio::test]
async fn refusals_are_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("I cannot help with that.")))
        .mount(&server)
        .await;

    let gateway = ProviderGateway::new(Arc::new(RecordingSink::default()));
    let err = generate(
        &gateway,
        &connection(&server),
        &ModelProfile::new("p1", "conn-1", "gpt-4o-mini"),
        "x",
        ContentType::Text,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ProviderError::Refused { .. }));
}
