use std::time::Duration;

use async_trait::async_trait;
use parley_common::{Error, Result, Role, Usage};
use parley_config::LlmProviderConfig;
use parley_config::model::DEFAULT_CLOUD_TIMEOUT_SECS;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::CallContext;
use super::{LlmProvider, LlmRequest, LlmResponse, ProviderError, post_json};

pub const GIGACHAT_API_URL: &str = "https://gigachat.devices.sberbank.ru/api/v1";
pub const DEFAULT_GIGACHAT_MODEL: &str = "GigaChat";

/// Chat-completions client for GigaChat. Authenticates with a pre-issued
/// access token; the token exchange happens outside this crate.
#[derive(Clone)]
pub struct GigaChatProvider {
    client: Client,
    access_token: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl GigaChatProvider {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            access_token: access_token.into(),
            base_url: GIGACHAT_API_URL.to_string(),
            model: DEFAULT_GIGACHAT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_CLOUD_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &LlmProviderConfig) -> Result<Self> {
        let token = config
            .api_key
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "gigachat needs an access token (providers.gigachat.api_key or GIGACHAT_ACCESS_TOKEN)"
                        .to_string(),
                )
            })?;

        let mut provider = Self::new(token);
        if let Some(url) = &config.base_url {
            provider = provider.with_base_url(url);
        }
        if let Some(model) = &config.model {
            provider = provider.with_model(model);
        }
        if let Some(secs) = config.timeout_secs {
            provider = provider.with_timeout(Duration::from_secs(secs));
        }
        Ok(provider)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_request_body(&self, request: &LlmRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        for msg in &request.messages {
            let role = match msg.role() {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                // No tool role here; replay tool output as user text.
                Role::Tool => "user",
            };
            messages.push(ChatMessage {
                role,
                content: msg.content().to_string(),
            });
        }

        ChatRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        }
    }
}

#[async_trait]
impl LlmProvider for GigaChatProvider {
    fn provider_id(&self) -> &str {
        "gigachat"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &LlmRequest,
    ) -> std::result::Result<LlmResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let ctx = CallContext {
            backend: "GigaChat",
            url: &self.base_url,
            model: &request.model,
            timeout: self.timeout,
        };

        let body = self.build_request_body(request);
        let response: ChatResponse = post_json(
            self.client.post(&url).bearer_auth(&self.access_token),
            &body,
            &ctx,
        )
        .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ctx.invalid("no choices in response"))?;

        Ok(LlmResponse {
            text: choice.message.content,
            tool_calls: Vec::new(),
            model: response.model.unwrap_or_else(|| request.model.clone()),
            usage: response.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        match self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}
