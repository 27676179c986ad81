use futures::StreamExt;
use pdfchat::{assemble, respond, Config, GenerationParams, HfClient, Turn};
use std::sync::Arc;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const COMPLETIONS_PATH: &str = "/models/test-org/test-model/v1/chat/completions";

fn config_for(server: &MockServer) -> Config {
    Config {
        api_key: Some("test-token".to_string()),
        model: "test-org/test-model".to_string(),
        base_url: server.uri(),
        ..Config::default()
    }
}

fn sse_body(tokens: &[&str]) -> String {
    let mut body = String::new();
    for token in tokens {
        let chunk = serde_json::json!({
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": token}}]
        });
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn streams_cumulative_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(&["Hel", "lo"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = Arc::new(HfClient::new(&config_for(&server)).unwrap());
    let payload = assemble(&[Turn::new("hi", "hello")], "be brief", "how are you?");
    let params = GenerationParams::new(64, 0.5, 0.9).unwrap();

    let out: Vec<String> = respond(client, payload, params).collect().await;
    assert_eq!(out, vec!["Hel".to_string(), "Hello".to_string()]);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["model"], "test-org/test-model");
    assert_eq!(body["stream"], true);
    assert_eq!(body["max_tokens"], 64);
    let roles: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    assert_eq!(body["messages"][3]["content"], "how are you?");
}

#[tokio::test]
async fn upstream_error_status_becomes_final_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_raw(r#"{"error":"Model is currently loading"}"#, "application/json"),
        )
        .mount(&server)
        .await;

    let client = Arc::new(HfClient::new(&config_for(&server)).unwrap());
    let out: Vec<String> = respond(client, assemble(&[], "", "hi"), GenerationParams::default())
        .collect()
        .await;
    assert_eq!(
        out,
        vec!["An error occurred: Inference API error (503 Service Unavailable): Model is currently loading".to_string()]
    );
}

#[tokio::test]
async fn error_event_mid_stream_terminates() {
    let server = MockServer::start().await;
    let mut body = sse_body(&["partial"]);
    // drop the trailing [DONE] and append an error event instead
    body.truncate(body.len() - "data: [DONE]\n\n".len());
    body.push_str("data: {\"error\":\"Input validation error\"}\n\n");
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = Arc::new(HfClient::new(&config_for(&server)).unwrap());
    let out: Vec<String> = respond(client, assemble(&[], "", "hi"), GenerationParams::default())
        .collect()
        .await;
    assert_eq!(
        out,
        vec![
            "partial".to_string(),
            "An error occurred: Input validation error".to_string()
        ]
    );
}

#[tokio::test]
async fn unreachable_upstream_is_reported() {
    let config = Config {
        base_url: "http://127.0.0.1:1".to_string(),
        ..Config::default()
    };
    let client = Arc::new(HfClient::new(&config).unwrap());
    let out: Vec<String> = respond(client, assemble(&[], "", "hi"), GenerationParams::default())
        .collect()
        .await;
    assert_eq!(out.len(), 1);
    assert!(out[0].starts_with("An error occurred: "), "got {:?}", out[0]);
}
