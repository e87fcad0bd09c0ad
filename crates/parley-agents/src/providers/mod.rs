pub mod error;
pub mod factory;
pub mod gigachat;
pub mod ollama;
pub mod openrouter;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parley_common::{Message, TimedResult, ToolCallRequest, Usage};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::tools::FunctionSchema;

pub use error::ProviderError;
pub use factory::build_providers;
pub use gigachat::GigaChatProvider;
pub use ollama::OllamaProvider;
pub use openrouter::OpenRouterProvider;

use error::CallContext;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const MAX_TEMPERATURE: f64 = 2.0;

/// A single completion call, already resolved against the provider's defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Sent ahead of `messages` when present.
    pub system: Option<String>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub tools: Vec<FunctionSchema>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub model: String,
    pub usage: Option<Usage>,
}

/// Per-call knobs supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SendOptions {
    pub system_prompt: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    /// Replaces the provider's default model when non-blank.
    pub model_override: Option<String>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            model_override: None,
        }
    }
}

/// Keep temperature inside the range every backend accepts.
pub fn clamp_temperature(temperature: f64) -> f64 {
    if temperature.is_nan() {
        DEFAULT_TEMPERATURE
    } else {
        temperature.clamp(0.0, MAX_TEMPERATURE)
    }
}

/// The model a call will use: a non-blank override, else the provider default.
pub fn resolve_model(default_model: &str, model_override: Option<&str>) -> String {
    match model_override.map(str::trim) {
        Some(model) if !model.is_empty() => model.to_string(),
        _ => default_model.to_string(),
    }
}

pub fn build_request(
    default_model: &str,
    history: &[Message],
    tools: &[FunctionSchema],
    options: &SendOptions,
) -> LlmRequest {
    let system = Some(options.system_prompt.trim())
        .filter(|prompt| !prompt.is_empty())
        .map(str::to_string);

    LlmRequest {
        model: resolve_model(default_model, options.model_override.as_deref()),
        messages: history.to_vec(),
        system,
        temperature: clamp_temperature(options.temperature),
        max_tokens: options.max_tokens,
        tools: tools.to_vec(),
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    fn default_model(&self) -> &str;

    /// Only providers returning `true` are offered a tool catalog.
    fn supports_tools(&self) -> bool {
        false
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError>;

    async fn health_check(&self) -> bool;

    /// Send a history and time the round trip. Failures come back as an
    /// error-flagged result carrying a user-facing message; this never fails.
    async fn send(&self, history: &[Message], options: &SendOptions) -> TimedResult {
        self.send_with_tools(history, &[], options).await.0
    }

    /// Like [`send`](Self::send), also returning any tool calls the model asked for.
    async fn send_with_tools(
        &self,
        history: &[Message],
        tools: &[FunctionSchema],
        options: &SendOptions,
    ) -> (TimedResult, Vec<ToolCallRequest>) {
        let request = build_request(self.default_model(), history, tools, options);
        let started = Instant::now();
        let outcome = self.complete(&request).await;
        let elapsed_ms = elapsed_millis(started);

        match outcome {
            Ok(response) => {
                debug!(
                    provider = self.provider_id(),
                    model = %request.model,
                    elapsed_ms,
                    tool_calls = response.tool_calls.len(),
                    "completion received"
                );
                let model = if response.model.is_empty() {
                    request.model
                } else {
                    response.model
                };
                (
                    TimedResult::success(response.text, response.usage, elapsed_ms, model),
                    response.tool_calls,
                )
            }
            Err(err) => {
                warn!(
                    provider = self.provider_id(),
                    model = %request.model,
                    elapsed_ms,
                    error = %err,
                    "completion failed"
                );
                (
                    TimedResult::failure(err.kind(), err.to_string(), elapsed_ms, request.model),
                    Vec::new(),
                )
            }
        }
    }
}

pub(crate) fn elapsed_millis(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// POST a JSON body and decode a JSON reply, classifying every failure.
pub(crate) async fn post_json<B, T>(
    request: reqwest::RequestBuilder,
    body: &B,
    ctx: &CallContext<'_>,
) -> Result<T, ProviderError>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let response = request
        .timeout(ctx.timeout)
        .json(body)
        .send()
        .await
        .map_err(|e| ctx.transport(e))?;

    let status = response.status();
    let text = response.text().await.map_err(|e| ctx.transport(e))?;

    if !status.is_success() {
        return Err(ctx.status(status, &text));
    }

    serde_json::from_str(&text).map_err(|e| ctx.invalid(e.to_string()))
}

/// Probe every provider concurrently.
pub async fn health_check_all(providers: &[Arc<dyn LlmProvider>]) -> Vec<(String, bool)> {
    let checks = providers.iter().map(|provider| async move {
        let healthy = provider.health_check().await;
        (provider.provider_id().to_string(), healthy)
    });
    futures::future::join_all(checks).await
}
