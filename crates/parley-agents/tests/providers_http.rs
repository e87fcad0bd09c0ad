use std::time::Duration;

use parley_agents::providers::ollama::OllamaProvider;
use parley_agents::{GigaChatProvider, LlmProvider, OpenRouterProvider, SendOptions};
use parley_common::{FailureKind, Message};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn history() -> Vec<Message> {
    vec![Message::user("Hello")]
}

#[tokio::test]
async fn ollama_chat_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"model": "llama3.2", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3.2",
            "message": {"role": "assistant", "content": "Hi there"},
            "done": true,
            "prompt_eval_count": 7,
            "eval_count": 3
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(Some(server.uri()));
    let result = provider.send(&history(), &SendOptions::default()).await;

    assert!(!result.is_error());
    assert_eq!(result.text, "Hi there");
    assert_eq!(result.model_name, "llama3.2");
    let usage = result.usage.unwrap();
    assert_eq!(usage.prompt_tokens, Some(7));
    assert_eq!(usage.total_tokens, Some(10));
}

#[tokio::test]
async fn ollama_lists_models_for_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3.2:latest"}, {"name": "qwen2.5:7b"}]
        })))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(Some(server.uri()));
    assert_eq!(
        provider.list_models().await.unwrap(),
        vec!["llama3.2:latest", "qwen2.5:7b"]
    );
    assert!(provider.health_check().await);
}

#[tokio::test]
async fn unreachable_backend_names_the_url() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let provider = OllamaProvider::new(Some(url.clone()));
    let result = provider.send(&history(), &SendOptions::default()).await;

    assert_eq!(result.error, Some(FailureKind::Unreachable));
    assert_eq!(
        result.text,
        format!("Ollama is not running or unreachable at {url}. Start the backend and try again.")
    );
    assert!(!provider.health_check().await);
}

#[tokio::test]
async fn slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"model": "llama3.2", "message": {"content": "late"}}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let provider =
        OllamaProvider::new(Some(server.uri())).with_timeout(Duration::from_secs(1));
    let result = provider.send(&history(), &SendOptions::default()).await;

    assert_eq!(result.error, Some(FailureKind::Timeout));
    assert_eq!(
        result.text,
        "Generation timed out after 1s. Reduce the context or use a smaller model."
    );
}

#[tokio::test]
async fn missing_model_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "model \"mistral\" not found, try pulling it first"
        })))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(Some(server.uri()));
    let options = SendOptions {
        model_override: Some("mistral".to_string()),
        ..Default::default()
    };
    let result = provider.send(&history(), &options).await;

    assert_eq!(result.error, Some(FailureKind::ModelNotFound));
    assert_eq!(
        result.text,
        "Model 'mistral' was not found on Ollama. Pull or install it first."
    );
    assert_eq!(result.model_name, "mistral");
}

#[tokio::test]
async fn out_of_memory_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": "model requires more system memory (12.3 GiB) than is available (7.8 GiB)"
        })))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(Some(server.uri())).with_model("llama3.1:70b");
    let result = provider.send(&history(), &SendOptions::default()).await;

    assert_eq!(result.error, Some(FailureKind::OutOfMemory));
    assert_eq!(
        result.text,
        "Ollama ran out of memory running 'llama3.1:70b'. Use a smaller model."
    );
}

#[tokio::test]
async fn openrouter_policy_rejection_is_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {
                "message": "No endpoints found matching your data policy (Free model publication)",
                "code": 404
            }
        })))
        .mount(&server)
        .await;

    let provider = OpenRouterProvider::new("sk-or-test").with_base_url(server.uri());
    let result = provider.send(&history(), &SendOptions::default()).await;

    assert_eq!(result.error, Some(FailureKind::PolicyRejected));
    assert!(result.text.contains(
        "rejected the request: No endpoints found matching your data policy (Free model publication)"
    ));
    assert!(result.text.ends_with("privacy/usage policy settings to allow this model."));
}

#[tokio::test]
async fn openrouter_error_in_ok_body_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": {"message": "Provider returned error", "code": 502}
        })))
        .mount(&server)
        .await;

    let provider = OpenRouterProvider::new("sk-or-test").with_base_url(server.uri());
    let result = provider.send(&history(), &SendOptions::default()).await;

    assert_eq!(result.error, Some(FailureKind::Backend));
    assert!(result.text.contains("Provider returned error"));
}

#[tokio::test]
async fn openrouter_returns_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-or-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "meta-llama/llama-3.3-70b-instruct:free",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "get_rate", "arguments": "{\"currency\":\"USD\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 50, "completion_tokens": 12, "total_tokens": 62}
        })))
        .mount(&server)
        .await;

    let provider = OpenRouterProvider::new("sk-or-test").with_base_url(server.uri());
    let catalog = vec![parley_agents::to_function_schema(
        &parley_agents::ToolDescriptor::new("get_rate", "Exchange rate")
            .with_parameter("currency", json!({"type": "string"}), true),
    )];

    let (result, calls) = provider
        .send_with_tools(&history(), &catalog, &SendOptions::default())
        .await;

    assert!(!result.is_error());
    assert_eq!(result.text, "");
    assert_eq!(result.usage.unwrap().total_tokens, Some(62));
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call_abc");
    assert_eq!(calls[0].tool_name, "get_rate");
    assert_eq!(calls[0].raw_arguments, r#"{"currency":"USD"}"#);
}

#[tokio::test]
async fn gigachat_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer giga-token"))
        .and(body_partial_json(json!({"model": "GigaChat", "temperature": 2.0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "GigaChat:1.0.26",
            "choices": [{"message": {"role": "assistant", "content": "Привет!"}, "index": 0}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = GigaChatProvider::new("giga-token").with_base_url(server.uri());
    let options = SendOptions {
        temperature: 5.0,
        ..Default::default()
    };
    let result = provider.send(&history(), &options).await;

    assert!(!result.is_error());
    assert_eq!(result.text, "Привет!");
    assert_eq!(result.model_name, "GigaChat:1.0.26");
    assert!(!provider.supports_tools());
}

#[tokio::test]
async fn gigachat_unauthorized_keeps_backend_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"status": 401, "message": "Unauthorized"})),
        )
        .mount(&server)
        .await;

    let provider = GigaChatProvider::new("expired").with_base_url(server.uri());
    let result = provider.send(&history(), &SendOptions::default()).await;

    assert_eq!(result.error, Some(FailureKind::Backend));
    assert_eq!(result.text, "GigaChat returned HTTP 401: Unauthorized");
    assert!(result.usage.is_none());
}
