//! Integration tests for the model providers and the role gateway
//!
//! Providers talk to wiremock servers standing in for Ollama and an
//! OpenAI-compatible endpoint.

use serde_json::json;
use std::time::Duration;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use navigator_engine::config::OpenAIConfig;
use navigator_engine::llm::gateway::RoleBinding;
use navigator_engine::llm::{
    ollama::OllamaProvider, openai::OpenAIProvider, Gateway, LLMError, LLMProvider, Message,
    ModelGateway, ModelRole,
};

fn chat_response(content: &str) -> serde_json::Value {
    json!({
        "model": "hermes3",
        "created_at": "2024-05-01T10:00:00Z",
        "message": { "role": "assistant", "content": content },
        "done": true
    })
}

fn ollama(server: &MockServer, model: &str) -> Box<dyn LLMProvider> {
    Box::new(OllamaProvider::new(server.uri(), model))
}

#[tokio::test]
async fn test_ollama_chat() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "model": "hermes3", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("[\"Open the site\"]")))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "hermes3");
    let answer = provider
        .generate(&[Message::system("plan"), Message::user("find widgets")])
        .await
        .unwrap();

    assert_eq!(answer, "[\"Open the site\"]");
}

#[tokio::test]
async fn test_ollama_error_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "model": "missing-model" })))
        .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "model": "busy-model" })))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let missing = OllamaProvider::new(server.uri(), "missing-model");
    let err = missing.generate(&[Message::user("hi")]).await.unwrap_err();
    assert!(matches!(err, LLMError::InvalidRequest(_)));
    assert!(!err.is_unavailable());

    let busy = OllamaProvider::new(server.uri(), "busy-model");
    let err = busy.generate(&[Message::user("hi")]).await.unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_ollama_connection_refused() {
    // Nothing listens on the discard port
    let provider = OllamaProvider::new("http://127.0.0.1:9", "hermes3");
    let err = provider.generate(&[Message::user("hi")]).await.unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_ollama_embeddings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .and(body_partial_json(json!({ "model": "nomic-embed-text", "prompt": "login form" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": [0.1, 0.2, 0.3] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .and(body_partial_json(json!({ "model": "hermes3" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": [] })))
        .mount(&server)
        .await;

    let embedder = OllamaProvider::new(server.uri(), "nomic-embed-text");
    let vector = embedder.embed("login form").await.unwrap();
    assert_eq!(vector.len(), 3);
    assert!((vector[1] - 0.2).abs() < 1e-6);

    let chat_model = OllamaProvider::new(server.uri(), "hermes3");
    let err = chat_model.embed("login form").await.unwrap_err();
    assert!(matches!(err, LLMError::EmbeddingUnsupported(_)));
}

#[tokio::test]
async fn test_ollama_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&server)
        .await;

    assert!(OllamaProvider::new(server.uri(), "hermes3").check_health().await);
    assert!(!OllamaProvider::new("http://127.0.0.1:9", "hermes3").check_health().await);
}

#[tokio::test]
async fn test_openai_chat_and_embeddings() {
    let key_env = "NAVIGATOR_TEST_OPENAI_KEY";
    std::env::set_var(key_env, "sk-test");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "click #buy" } }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.5, -0.5] }]
        })))
        .mount(&server)
        .await;

    let config = OpenAIConfig {
        base_url: format!("{}/v1/", server.uri()),
        api_key_env: key_env.to_string(),
    };
    let provider = OpenAIProvider::new(&config, "gpt-4o-mini");

    assert!(provider.check_health().await);
    assert_eq!(
        provider.generate(&[Message::user("buy")]).await.unwrap(),
        "click #buy"
    );
    assert_eq!(provider.embed("cart").await.unwrap(), vec![0.5, -0.5]);
}

#[tokio::test]
async fn test_openai_status_mapping() {
    let key_env = "NAVIGATOR_TEST_OPENAI_KEY_STATUS";
    std::env::set_var(key_env, "sk-test");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let config = OpenAIConfig {
        base_url: server.uri(),
        api_key_env: key_env.to_string(),
    };
    let provider = OpenAIProvider::new(&config, "gpt-4o-mini");

    let err = provider.generate(&[Message::user("hi")]).await.unwrap_err();
    assert!(matches!(err, LLMError::RateLimitExceeded));
    let err = provider.embed("hi").await.unwrap_err();
    assert!(matches!(err, LLMError::AuthenticationFailed(_)));
}

fn gateway(
    general: RoleBinding,
    embedding: RoleBinding,
    server: &MockServer,
    timeout: Duration,
) -> ModelGateway {
    ModelGateway::new(
        general,
        RoleBinding::new(ollama(server, "granite-code:8b")),
        RoleBinding::new(ollama(server, "deepseek-r1")),
        embedding,
        timeout,
    )
}

#[tokio::test]
async fn test_gateway_falls_back_when_primary_down() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "model": "hermes3" })))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "model": "llama3.2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("from fallback")))
        .expect(1)
        .mount(&server)
        .await;

    let general =
        RoleBinding::new(ollama(&server, "hermes3")).with_fallback(ollama(&server, "llama3.2"));
    let embedding = RoleBinding::new(ollama(&server, "nomic-embed-text"));
    let gateway = gateway(general, embedding, &server, Duration::from_secs(5));

    let answer = gateway
        .invoke(ModelRole::General, &[Message::user("plan")])
        .await
        .unwrap();
    assert_eq!(answer, "from fallback");
}

#[tokio::test]
async fn test_gateway_no_fallback_on_bad_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "model": "hermes3" })))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "model": "llama3.2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("unused")))
        .expect(0)
        .mount(&server)
        .await;

    let general =
        RoleBinding::new(ollama(&server, "hermes3")).with_fallback(ollama(&server, "llama3.2"));
    let embedding = RoleBinding::new(ollama(&server, "nomic-embed-text"));
    let gateway = gateway(general, embedding, &server, Duration::from_secs(5));

    let err = gateway
        .invoke(ModelRole::General, &[Message::user("plan")])
        .await
        .unwrap_err();
    assert!(matches!(err, LLMError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_gateway_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_response("too late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let general = RoleBinding::new(ollama(&server, "hermes3"));
    let embedding = RoleBinding::new(ollama(&server, "nomic-embed-text"));
    let gateway = gateway(general, embedding, &server, Duration::from_millis(200));

    let err = gateway
        .invoke(ModelRole::General, &[Message::user("plan")])
        .await
        .unwrap_err();
    assert!(matches!(err, LLMError::Timeout));
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_gateway_embedding_tags_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": [1.0, 0.0] })))
        .mount(&server)
        .await;

    let general = RoleBinding::new(ollama(&server, "hermes3"));
    let embedding = RoleBinding::new(ollama(&server, "nomic-embed-text"));
    let gateway = gateway(general, embedding, &server, Duration::from_secs(5));

    let embedding = gateway.embed("search box").await.unwrap();
    assert_eq!(embedding.model, "ollama/nomic-embed-text");
    assert_eq!(embedding.vector, vec![1.0, 0.0]);
}

#[tokio::test]
async fn test_gateway_health_per_role() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&server)
        .await;

    let general = RoleBinding::new(ollama(&server, "hermes3"));
    let embedding = RoleBinding::new(Box::new(OllamaProvider::new(
        "http://127.0.0.1:9",
        "nomic-embed-text",
    )));
    let gateway = gateway(general, embedding, &server, Duration::from_secs(5));

    let health = gateway.health().await;
    assert_eq!(health.len(), 4);
    assert!(health[0].healthy);
    assert_eq!(health[0].role, ModelRole::General);
    assert_eq!(health[0].model, "hermes3");

    let embedding = health.iter().find(|h| h.role == ModelRole::Embedding).unwrap();
    assert!(!embedding.healthy);
    assert_eq!(embedding.provider, "ollama");
}
