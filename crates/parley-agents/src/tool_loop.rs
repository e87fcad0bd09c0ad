use std::sync::Arc;
use std::time::Instant;

use parley_common::{Message, TimedResult, ToolCallRequest, ToolCallResult, Usage};
use tracing::{debug, info, warn};

use crate::history::ConversationHistory;
use crate::providers::{LlmProvider, SendOptions, elapsed_millis, resolve_model};
use crate::tools::{FunctionSchema, ToolHost, parse_arguments};

pub use parley_config::model::DEFAULT_MAX_TOOL_ITERATIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The model replied without asking for tools.
    Answered,
    /// Every round asked for tools; the last assistant text is returned.
    IterationLimit,
    ProviderFailed,
}

#[derive(Debug, Clone)]
pub struct ToolLoopOutcome {
    /// Usage is summed and time measured over every round.
    pub result: TimedResult,
    pub rounds: usize,
    pub exit: LoopExit,
}

/// Drives call-model / run-tools rounds until the model answers in plain text.
pub struct ToolLoop {
    host: Arc<dyn ToolHost>,
    max_iterations: usize,
}

impl ToolLoop {
    pub fn new(host: Arc<dyn ToolHost>, max_iterations: usize) -> Self {
        Self {
            host,
            max_iterations: max_iterations.max(1),
        }
    }

    /// Each round appends the assistant's tool-call turn and one tool message
    /// per call to `history`. The final answer is not appended, and neither is
    /// the text returned at the iteration limit.
    pub async fn run(
        &self,
        provider: &dyn LlmProvider,
        history: &mut ConversationHistory,
        catalog: &[FunctionSchema],
        options: &SendOptions,
    ) -> ToolLoopOutcome {
        let started = Instant::now();
        let mut usage: Option<Usage> = None;
        let mut last_text = String::new();
        let mut model_name =
            resolve_model(provider.default_model(), options.model_override.as_deref());

        for round in 1..=self.max_iterations {
            let (result, calls) = provider
                .send_with_tools(history.messages(), catalog, options)
                .await;

            if result.is_error() {
                return ToolLoopOutcome {
                    result: TimedResult {
                        response_time_ms: elapsed_millis(started),
                        ..result
                    },
                    rounds: round,
                    exit: LoopExit::ProviderFailed,
                };
            }

            usage = merge_usage(usage, result.usage);
            model_name = result.model_name;

            if calls.is_empty() {
                return ToolLoopOutcome {
                    result: TimedResult::success(
                        result.text,
                        usage,
                        elapsed_millis(started),
                        model_name,
                    ),
                    rounds: round,
                    exit: LoopExit::Answered,
                };
            }

            debug!(round, calls = calls.len(), "model requested tools");
            // The last round's text is returned as the reply instead.
            let turn_text = if round == self.max_iterations {
                last_text = result.text;
                String::new()
            } else {
                result.text
            };
            history.append(Message::assistant_with_tool_calls(turn_text, calls.clone()));

            for call in &calls {
                let tool_result = ToolCallResult {
                    tool_call_id: call.id.clone(),
                    content: self.invoke(call).await,
                };
                history.append(tool_result.into_message());
            }
        }

        warn!(
            max_iterations = self.max_iterations,
            "tool loop stopped at iteration limit"
        );
        ToolLoopOutcome {
            result: TimedResult::success(last_text, usage, elapsed_millis(started), model_name),
            rounds: self.max_iterations,
            exit: LoopExit::IterationLimit,
        }
    }

    async fn invoke(&self, call: &ToolCallRequest) -> String {
        let arguments = parse_arguments(&call.raw_arguments);
        let host = Arc::clone(&self.host);
        let name = call.tool_name.clone();

        // Own task: a dispatched call runs to completion even if this turn is dropped.
        let handle = tokio::spawn(async move { host.call_tool(&name, arguments).await });

        match handle.await {
            Ok(Ok(text)) => {
                info!(tool = %call.tool_name, "tool call succeeded");
                text
            }
            Ok(Err(e)) => {
                warn!(tool = %call.tool_name, error = %e, "tool call failed");
                format!("error invoking {}: {}", call.tool_name, e)
            }
            Err(e) => {
                warn!(tool = %call.tool_name, error = %e, "tool task aborted");
                format!("error invoking {}: {}", call.tool_name, e)
            }
        }
    }
}

fn merge_usage(total: Option<Usage>, next: Option<Usage>) -> Option<Usage> {
    match (total, next) {
        (Some(a), Some(b)) => Some(a.merge(b)),
        (a, b) => a.or(b),
    }
}
