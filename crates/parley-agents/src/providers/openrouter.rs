use std::time::Duration;

use async_trait::async_trait;
use parley_common::{Error, Message, Result, Role, ToolCallRequest, Usage};
use parley_config::LlmProviderConfig;
use parley_config::model::DEFAULT_CLOUD_TIMEOUT_SECS;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::error::{CallContext, extract_error_message};
use super::{LlmProvider, LlmRequest, LlmResponse, ProviderError, post_json};
use crate::tools::FunctionSchema;

pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_OPENROUTER_MODEL: &str = "meta-llama/llama-3.3-70b-instruct:free";

/// OpenAI-compatible chat client for OpenRouter. The only backend here that
/// accepts a tool catalog.
#[derive(Clone)]
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENROUTER_API_URL.to_string(),
            model: DEFAULT_OPENROUTER_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_CLOUD_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &LlmProviderConfig) -> Result<Self> {
        let key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "openrouter needs an API key (providers.openrouter.api_key or OPENROUTER_API_KEY)"
                        .to_string(),
                )
            })?;

        let mut provider = Self::new(key);
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

    fn convert_request(&self, request: &LlmRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(system_prompt) = &request.system {
            messages.push(ChatMessage::System {
                content: system_prompt.clone(),
            });
        }
        messages.extend(request.messages.iter().map(convert_message));

        ChatRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(request.tools.clone())
            },
        }
    }
}

fn convert_message(msg: &Message) -> ChatMessage {
    match msg.role() {
        Role::System => ChatMessage::System {
            content: msg.content().to_string(),
        },
        Role::User => ChatMessage::User {
            content: msg.content().to_string(),
        },
        Role::Assistant => {
            let tool_calls: Vec<ChatToolCall> = msg
                .tool_calls()
                .iter()
                .map(|call| ChatToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: ChatFunctionCall {
                        name: call.tool_name.clone(),
                        arguments: call.raw_arguments.clone(),
                    },
                })
                .collect();
            let content = if msg.content().is_empty() && !tool_calls.is_empty() {
                None
            } else {
                Some(msg.content().to_string())
            };
            ChatMessage::Assistant {
                content,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            }
        }
        Role::Tool => ChatMessage::Tool {
            tool_call_id: msg.tool_call_id().unwrap_or_default().to_string(),
            content: msg.content().to_string(),
        },
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn provider_id(&self) -> &str {
        "openrouter"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        request: &LlmRequest,
    ) -> std::result::Result<LlmResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let ctx = CallContext {
            backend: "OpenRouter",
            url: &self.base_url,
            model: &request.model,
            timeout: self.timeout,
        };

        let body = self.convert_request(request);
        let response: ChatResponse = post_json(
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .header("X-Title", "parley"),
            &body,
            &ctx,
        )
        .await?;

        // Upstream failures can arrive as a 200 with an error object.
        if let Some(error) = response.error {
            let status = error
                .get("code")
                .and_then(|c| c.as_u64())
                .and_then(|c| u16::try_from(c).ok())
                .and_then(|c| StatusCode::from_u16(c).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let body = serde_json::json!({ "error": error }).to_string();
            return Err(ctx.status(status, &body));
        }

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ctx.invalid("no choices in response"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest {
                id: tc.id,
                tool_name: tc.function.name,
                raw_arguments: tc.function.arguments,
            })
            .collect();

        Ok(LlmResponse {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
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
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::debug!(%status, "openrouter health check failed: {}", extract_error_message(&body));
                false
            }
            Err(_) => false,
        }
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<FunctionSchema>>,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ChatToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: ChatFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct ChatFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

// Response types
#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}
