use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use pdfchat::config::ServerConfig;
use pdfchat::llm::TokenStream;
use pdfchat::server::Servers;
use pdfchat::{CompletionBackend, Config, GenerationParams, Message};
use std::sync::Arc;

/// Answers every request by echoing the last user message word by word
struct EchoBackend;

#[async_trait]
impl CompletionBackend for EchoBackend {
    async fn stream_chat(
        &self,
        messages: Vec<Message>,
        _params: GenerationParams,
    ) -> Result<TokenStream> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let words: Vec<Result<String>> = last
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(futures::stream::iter(words).boxed())
    }
}

fn local_config() -> Config {
    Config {
        server: ServerConfig {
            ui_bind: "127.0.0.1:0".to_string(),
            redirect_bind: "127.0.0.1:0".to_string(),
            public_url: "http://localhost:7860".to_string(),
        },
        ..Config::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn servers_start_serve_and_stop() {
    let servers = Servers::start(&local_config(), Arc::new(EchoBackend))
        .await
        .unwrap();
    let ui = servers.ui_addrs()[0];
    let redirect = servers.redirect_addrs()[0];

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let resp = client
        .get(format!("http://{}/", redirect))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::FOUND);
    assert_eq!(resp.headers()["location"], "http://localhost:7860");

    let body = client
        .post(format!("http://{}/api/chat", ui))
        .json(&serde_json::json!({"message": "one two three", "history": []}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let texts: Vec<String> = body
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .map(|d| serde_json::from_str::<serde_json::Value>(d).unwrap())
        .filter(|v| v["type"] == "partial")
        .map(|v| v["text"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["one ", "one two ", "one two three"]);

    let resp = client
        .post(format!("http://{}/api/pdf", ui))
        .body(b"not a pdf".to_vec())
        .send()
        .await
        .unwrap();
    let json: serde_json::Value = resp.json().await.unwrap();
    assert!(json["text"].as_str().unwrap().starts_with("Error processing PDF: "));

    servers.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn run_until_returns_after_shutdown() {
    let servers = Servers::start(&local_config(), Arc::new(EchoBackend))
        .await
        .unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(10), servers.run_until(async {}))
        .await
        .unwrap();
}
