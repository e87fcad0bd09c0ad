use std::time::Duration;

use async_trait::async_trait;
use parley_common::{Role, Usage};
use parley_config::LlmProviderConfig;
use parley_config::model::DEFAULT_LOCAL_TIMEOUT_SECS;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use super::error::CallContext;
use super::{LlmProvider, LlmRequest, LlmResponse, ProviderError, post_json};

pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

/// Client for a local Ollama daemon (`/api/chat`, non-streaming).
#[derive(Clone)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: Client,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(DEFAULT_LOCAL_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &LlmProviderConfig) -> Self {
        let mut provider = Self::new(config.base_url.clone());
        if let Some(model) = &config.model {
            provider = provider.with_model(model);
        }
        if let Some(secs) = config.timeout_secs {
            provider = provider.with_timeout(Duration::from_secs(secs));
        }
        provider
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of the models pulled on this daemon.
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let ctx = self.context("");

        let res = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ctx.transport(e))?;

        let status = res.status();
        let text = res.text().await.map_err(|e| ctx.transport(e))?;
        if !status.is_success() {
            return Err(ctx.status(status, &text));
        }

        let tags: TagsResponse =
            serde_json::from_str(&text).map_err(|e| ctx.invalid(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn context<'a>(&'a self, model: &'a str) -> CallContext<'a> {
        CallContext {
            backend: "Ollama",
            url: &self.base_url,
            model,
            timeout: self.timeout,
        }
    }

    fn build_request_body(&self, request: &LlmRequest) -> Value {
        let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(request.messages.iter().map(|msg| {
            let role = match msg.role() {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            json!({ "role": role, "content": msg.content() })
        }));

        let mut options = serde_json::Map::new();
        options.insert("temperature".to_string(), json!(request.temperature));
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".to_string(), json!(max_tokens));
        }

        json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
            "options": options,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    message: Option<ChatMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagsModel>,
}

#[derive(Deserialize)]
struct TagsModel {
    name: String,
}

/// Ollama reports prompt/eval counts; map them onto the common usage shape.
fn usage_from_counts(prompt: Option<u32>, completion: Option<u32>) -> Option<Usage> {
    match (prompt, completion) {
        (None, None) => None,
        (p, c) => Some(Usage::from_counts(p.unwrap_or(0), c.unwrap_or(0))),
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn provider_id(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let ctx = self.context(&request.model);
        let body = self.build_request_body(request);

        let res: ChatResponse = post_json(self.client.post(&url), &body, &ctx).await?;

        Ok(LlmResponse {
            text: res.message.map(|m| m.content).unwrap_or_default(),
            tool_calls: Vec::new(),
            model: if res.model.is_empty() {
                request.model.clone()
            } else {
                res.model
            },
            usage: usage_from_counts(res.prompt_eval_count, res.eval_count),
        })
    }

    async fn health_check(&self) -> bool {
        self.list_models().await.is_ok()
    }
}
