//! Integration tests for the provider chain
//!
//! Ollama and Gemini are served by wiremock, so no real backend is needed.

use serde_json::json;
use std::sync::{Arc, Mutex};
use strata_engine::agent::{Agent, ExecutionContext, StructuredAgent};
use strata_engine::config::GeminiConfig;
use strata_engine::llm::gemini::GeminiProvider;
use strata_engine::llm::ollama::OllamaProvider;
use strata_engine::llm::{FallbackOptions, Message, Provider, ProviderChain};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GEMINI_PATH: &str = "/models/gemini-2.0-flash:generateContent";

fn gemini(server: &MockServer) -> GeminiProvider {
    let config = GeminiConfig {
        base_url: server.uri(),
        ..GeminiConfig::default()
    };
    GeminiProvider::with_api_key(config, Some("test-key".to_string()))
}

fn gemini_text(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{"content": {"parts": [{"text": text}]}}],
        "usageMetadata": {"totalTokenCount": 12}
    })
}

async fn failing_ollama() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_ollama_text_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": "hello"},
            "prompt_eval_count": 5,
            "eval_count": 3
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3.1:8b");
    let generation = provider
        .generate_text(&[Message::user("hi")])
        .await
        .unwrap();

    assert_eq!(generation.text, "hello");
    assert_eq!(generation.tokens_used, Some(8));
}

#[tokio::test]
async fn test_gemini_search_grounding() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"text": "The market is growing."}]},
                "groundingMetadata": {
                    "webSearchQueries": ["smart ring market size"],
                    "groundingChunks": [
                        {"web": {"uri": "https://example.com/a", "title": "Report A"}},
                        {"web": {"uri": "https://example.com/b"}}
                    ]
                }
            }]
        })))
        .mount(&server)
        .await;

    let generation = gemini(&server)
        .generate_with_search(&[Message::user("smart ring market")])
        .await
        .unwrap();

    assert_eq!(generation.text, "The market is growing.");
    assert_eq!(generation.queries, ["smart ring market size"]);
    assert_eq!(generation.sources.len(), 2);
    assert_eq!(generation.sources[0].title, "Report A");
    assert_eq!(generation.sources[1].title, "https://example.com/b");
}

#[tokio::test]
async fn test_chain_falls_back_to_next_provider() {
    let ollama_server = failing_ollama().await;
    let gemini_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_text("pong")))
        .expect(1)
        .mount(&gemini_server)
        .await;

    let chain = ProviderChain::new();
    chain.register(
        Arc::new(OllamaProvider::new(ollama_server.uri(), "llama3.1:8b")),
        0,
        true,
    );
    chain.register(Arc::new(gemini(&gemini_server)), 1, true);

    let hops: Arc<Mutex<Vec<(String, String)>>> = Arc::default();
    let recorded = Arc::clone(&hops);
    let options = FallbackOptions::default().on_fallback(move |from, to, _err| {
        recorded
            .lock()
            .unwrap()
            .push((from.to_string(), to.to_string()));
    });

    let messages = [Message::user("ping")];
    let success = chain
        .execute_with_fallback(
            |provider| {
                let messages = messages.clone();
                async move {
                    provider
                        .generate_text(&messages)
                        .await
                        .map_err(|e| e.into_engine(provider.name()))
                }
            },
            &options,
        )
        .await
        .unwrap();

    assert_eq!(success.value.text, "pong");
    assert_eq!(success.provider, "gemini");
    assert_eq!(success.attempts, 2);
    assert_eq!(
        *hops.lock().unwrap(),
        vec![("ollama".to_string(), "gemini".to_string())]
    );
}

#[tokio::test]
async fn test_chain_reports_every_failure() {
    let ollama_server = failing_ollama().await;
    let gemini_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(ResponseTemplate::new(429))
        .mount(&gemini_server)
        .await;

    let chain = ProviderChain::new();
    chain.register(
        Arc::new(OllamaProvider::new(ollama_server.uri(), "llama3.1:8b")),
        0,
        true,
    );
    chain.register(Arc::new(gemini(&gemini_server)), 1, true);

    let err = chain
        .execute_with_fallback(
            |provider| async move {
                provider
                    .generate_text(&[Message::user("ping")])
                    .await
                    .map_err(|e| e.into_engine(provider.name()))
            },
            &FallbackOptions::default(),
        )
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("ollama"), "{}", message);
    assert!(message.contains("gemini"), "{}", message);
}

#[tokio::test]
async fn test_agent_falls_back_across_real_providers() {
    let ollama_server = failing_ollama().await;
    let gemini_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gemini_text(r#"{"answer": "yes"}"#)),
        )
        .mount(&gemini_server)
        .await;

    let chain = ProviderChain::new();
    chain.register(
        Arc::new(OllamaProvider::new(ollama_server.uri(), "llama3.1:8b")),
        0,
        true,
    );
    chain.register(Arc::new(gemini(&gemini_server)), 1, true);

    let agent = StructuredAgent::<String, serde_json::Value>::new(
        "yes-no",
        "Answer yes or no",
        json!({"answer": "yes | no"}),
    );
    let ctx = ExecutionContext::new(Arc::new(chain));

    let result = agent.execute(&"Is the sky blue?".to_string(), &ctx).await;

    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(result.data(), Some(&json!({"answer": "yes"})));
    assert_eq!(result.metadata().provider_used.as_deref(), Some("gemini"));
    assert!(result.metadata().fallback_used);
    assert!(result
        .warnings()
        .iter()
        .any(|w| w.starts_with("Primary provider ollama failed")));
    assert_eq!(ctx.total_tokens(), 12);
}
