use parley_common::Message;
use parley_config::model::DEFAULT_SUMMARY_PROMPT;
use tracing::{info, warn};

use crate::history::ConversationHistory;
use crate::providers::{LlmProvider, LlmRequest, resolve_model};

const SUMMARY_MAX_TOKENS: u32 = 500;

/// Compacts a history into one summary message using the session's own provider.
#[derive(Debug, Clone)]
pub struct Summarizer {
    prompt: String,
}

impl Default for Summarizer {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_PROMPT)
    }
}

impl Summarizer {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Best effort: on any failure the history is left untouched and `false`
    /// is returned.
    pub async fn summarize(
        &self,
        history: &mut ConversationHistory,
        provider: &dyn LlmProvider,
        model_override: Option<&str>,
    ) -> bool {
        let covered = history.summarizable();
        if covered.is_empty() {
            return false;
        }

        let transcript = covered
            .iter()
            .map(|m| format!("{}: {}", m.role().as_str(), m.content()))
            .collect::<Vec<_>>()
            .join("\n");

        let request = LlmRequest {
            model: resolve_model(provider.default_model(), model_override),
            messages: vec![Message::user(format!(
                "{}\n\nConversation:\n{}",
                self.prompt, transcript
            ))],
            system: None,
            temperature: 0.0,
            max_tokens: Some(SUMMARY_MAX_TOKENS),
            tools: Vec::new(),
        };

        match provider.complete(&request).await {
            Ok(response) if !response.text.trim().is_empty() => {
                let before = history.len();
                history.replace_with_summary(response.text.trim());
                info!(
                    provider = provider.provider_id(),
                    before,
                    after = history.len(),
                    "history summarized"
                );
                true
            }
            Ok(_) => {
                warn!(
                    provider = provider.provider_id(),
                    "summarization returned empty text, keeping full history"
                );
                false
            }
            Err(e) => {
                warn!(
                    provider = provider.provider_id(),
                    error = %e,
                    "summarization failed, keeping full history"
                );
                false
            }
        }
    }
}
