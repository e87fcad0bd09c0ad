use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model inside an assistant turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub tool_name: String,
    /// Arguments exactly as the provider sent them (a JSON document, possibly malformed).
    pub raw_arguments: String,
}

/// Textual outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub tool_call_id: String,
    pub content: String,
}

impl ToolCallResult {
    pub fn into_message(self) -> Message {
        Message::tool(self.tool_call_id, self.content)
    }
}

/// One turn of dialogue. Immutable once built; read through the accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCallRequest>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant turn that asked for tools. OpenAI-compatible backends need it
    /// in the prompt ahead of the matching `tool` messages.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::assistant(content)
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        &self.tool_calls
    }
}

/// Token accounting. Every field is optional: not every backend reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl Usage {
    /// Build from prompt/completion counts, deriving the total.
    pub fn from_counts(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            total_tokens: Some(prompt_tokens.saturating_add(completion_tokens)),
        }
    }

    /// Field-wise sum; a field stays `None` only if it is `None` on both sides.
    pub fn merge(self, other: Usage) -> Usage {
        fn add(a: Option<u32>, b: Option<u32>) -> Option<u32> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a.saturating_add(b)),
                (a, b) => a.or(b),
            }
        }
        Usage {
            prompt_tokens: add(self.prompt_tokens, other.prompt_tokens),
            completion_tokens: add(self.completion_tokens, other.completion_tokens),
            total_tokens: add(self.total_tokens, other.total_tokens),
        }
    }
}

/// Which class of provider failure produced an error-flagged [`TimedResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unreachable,
    ModelNotFound,
    OutOfMemory,
    Timeout,
    PolicyRejected,
    Backend,
}

/// The value every orchestrator call returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedResult {
    pub text: String,
    pub usage: Option<Usage>,
    pub response_time_ms: i64,
    pub model_name: String,
    /// Set when `text` is a user-facing error description rather than a model reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureKind>,
}

impl TimedResult {
    pub fn success(
        text: impl Into<String>,
        usage: Option<Usage>,
        response_time_ms: i64,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            usage,
            response_time_ms,
            model_name: model_name.into(),
            error: None,
        }
    }

    pub fn failure(
        kind: FailureKind,
        text: impl Into<String>,
        response_time_ms: i64,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            usage: None,
            response_time_ms,
            model_name: model_name.into(),
            error: Some(kind),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
