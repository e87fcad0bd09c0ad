use std::sync::Arc;

use parley_common::{Message, TimedResult};
use parley_config::{HistoryConfig, ToolsConfig};
use tracing::{info, instrument, warn};

use crate::history::{ConversationHistory, HistorySink};
use crate::providers::{DEFAULT_TEMPERATURE, LlmProvider, SendOptions};
use crate::summarizer::Summarizer;
use crate::tool_loop::{DEFAULT_MAX_TOOL_ITERATIONS, ToolLoop};
use crate::tools::{FunctionSchema, ToolHost, to_function_schemas};

/// Caller-supplied settings for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOptions {
    pub system_prompt: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub model_override: Option<String>,
    pub tools_enabled: bool,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            model_override: None,
            tools_enabled: false,
        }
    }
}

impl TurnOptions {
    fn send_options(&self) -> SendOptions {
        SendOptions {
            system_prompt: self.system_prompt.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model_override: self.model_override.clone(),
        }
    }
}

/// Owns one conversation with one provider. Taking `&mut self` per turn keeps
/// turns on the same handler strictly sequential.
pub struct ProviderHandler {
    provider: Arc<dyn LlmProvider>,
    history: ConversationHistory,
    summarizer: Summarizer,
    tool_host: Option<Arc<dyn ToolHost>>,
    max_tool_iterations: usize,
}

impl ProviderHandler {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self::from_config(provider, &HistoryConfig::default(), &ToolsConfig::default())
    }

    pub fn from_config(
        provider: Arc<dyn LlmProvider>,
        history: &HistoryConfig,
        tools: &ToolsConfig,
    ) -> Self {
        Self {
            provider,
            history: ConversationHistory::new(history.summarize_threshold),
            summarizer: Summarizer::new(history.summary_prompt.clone()),
            tool_host: None,
            max_tool_iterations: iterations_or_default(tools.max_iterations),
        }
    }

    pub fn with_tool_host(mut self, host: Arc<dyn ToolHost>) -> Self {
        self.tool_host = Some(host);
        self
    }

    pub fn with_summarize_threshold(mut self, threshold: usize) -> Self {
        self.history.set_summarize_threshold(threshold);
        self
    }

    /// 0 selects the default limit.
    pub fn with_max_tool_iterations(mut self, max_iterations: usize) -> Self {
        self.max_tool_iterations = iterations_or_default(max_iterations);
        self
    }

    pub fn with_history_sink(mut self, sink: HistorySink) -> Self {
        self.history = self.history.with_sink(sink);
        self
    }

    pub fn provider_id(&self) -> &str {
        self.provider.provider_id()
    }

    /// Run one user turn to completion.
    ///
    /// On success the history gains the user message, any tool round trips and
    /// the assistant reply. On failure the turn is rolled back and the result
    /// carries the error text.
    #[instrument(skip(self, user_text, options), fields(provider = %self.provider.provider_id()))]
    pub async fn process_message(&mut self, user_text: &str, options: &TurnOptions) -> TimedResult {
        self.history.append(Message::user(user_text));

        if self.history.should_summarize() {
            self.summarizer
                .summarize(
                    &mut self.history,
                    self.provider.as_ref(),
                    options.model_override.as_deref(),
                )
                .await;
        }

        // The pending user message is always last at this point.
        let turn_start = self.history.len() - 1;
        let send_options = options.send_options();

        let result = match self.tool_catalog(options).await {
            Some((host, catalog)) => {
                let outcome = ToolLoop::new(host, self.max_tool_iterations)
                    .run(
                        self.provider.as_ref(),
                        &mut self.history,
                        &catalog,
                        &send_options,
                    )
                    .await;
                info!(rounds = outcome.rounds, exit = ?outcome.exit, "tool loop finished");
                outcome.result
            }
            None => {
                self.provider
                    .send(self.history.messages(), &send_options)
                    .await
            }
        };

        if result.is_error() {
            self.history.truncate(turn_start);
            warn!(kind = ?result.error, "turn failed, history rolled back");
            return result;
        }

        self.history.append(Message::assistant(result.text.clone()));
        info!(
            model = %result.model_name,
            elapsed_ms = result.response_time_ms,
            history = self.history.len(),
            "turn complete"
        );
        result
    }

    /// The catalog to offer this turn, if tools apply at all.
    async fn tool_catalog(
        &self,
        options: &TurnOptions,
    ) -> Option<(Arc<dyn ToolHost>, Vec<FunctionSchema>)> {
        if !options.tools_enabled || !self.provider.supports_tools() {
            return None;
        }
        let host = self.tool_host.clone()?;

        match host.list_tools().await {
            Ok(descriptors) if !descriptors.is_empty() => {
                let catalog = to_function_schemas(&descriptors);
                Some((host, catalog))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "tool catalog unavailable, answering without tools");
                None
            }
        }
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn load_history(&mut self, messages: Vec<Message>) {
        self.history.load(messages);
    }

    /// Every stored message, including a summary and tool messages.
    pub fn history_size(&self) -> usize {
        self.history.len()
    }

    /// User and assistant messages only.
    pub fn message_count(&self) -> usize {
        self.history.dialogue_count()
    }

    pub fn history(&self) -> &[Message] {
        self.history.messages()
    }

    pub fn has_summary(&self) -> bool {
        self.history.has_summary()
    }
}

fn iterations_or_default(max_iterations: usize) -> usize {
    if max_iterations == 0 {
        DEFAULT_MAX_TOOL_ITERATIONS
    } else {
        max_iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{LlmRequest, LlmResponse, ProviderError};
    use async_trait::async_trait;

    struct Silent;

    #[async_trait]
    impl LlmProvider for Silent {
        fn provider_id(&self) -> &str {
            "silent"
        }

        fn default_model(&self) -> &str {
            "m"
        }

        async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
            Ok(LlmResponse::default())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    #[test]
    fn zero_iterations_means_default_on_every_path() {
        let tools = ToolsConfig {
            max_iterations: 0,
            ..Default::default()
        };
        let from_config =
            ProviderHandler::from_config(Arc::new(Silent), &HistoryConfig::default(), &tools);
        assert_eq!(from_config.max_tool_iterations, DEFAULT_MAX_TOOL_ITERATIONS);

        let built = ProviderHandler::new(Arc::new(Silent)).with_max_tool_iterations(0);
        assert_eq!(built.max_tool_iterations, DEFAULT_MAX_TOOL_ITERATIONS);

        let explicit = ProviderHandler::new(Arc::new(Silent)).with_max_tool_iterations(2);
        assert_eq!(explicit.max_tool_iterations, 2);
    }
}
