use std::time::Duration;

use parley_common::FailureKind;
use reqwest::StatusCode;
use thiserror::Error;

/// Failure talking to a backend. The `Display` text is shown to the user as-is.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{backend} is not running or unreachable at {url}. Start the backend and try again.")]
    Unreachable { backend: String, url: String },

    #[error("Model '{model}' was not found on {backend}. Pull or install it first.")]
    ModelNotFound { backend: String, model: String },

    #[error("{backend} ran out of memory running '{model}'. Use a smaller model.")]
    OutOfMemory { backend: String, model: String },

    #[error("Generation timed out after {secs}s. Reduce the context or use a smaller model.")]
    Timeout { secs: u64 },

    #[error(
        "{backend} rejected the request: {message}. Adjust your account's privacy/usage policy settings to allow this model."
    )]
    PolicyRejected { backend: String, message: String },

    #[error("{backend} returned HTTP {status}: {message}")]
    Api {
        backend: String,
        status: u16,
        message: String,
    },

    #[error("{backend} sent a response that could not be read: {message}")]
    InvalidResponse { backend: String, message: String },
}

impl ProviderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProviderError::Unreachable { .. } => FailureKind::Unreachable,
            ProviderError::ModelNotFound { .. } => FailureKind::ModelNotFound,
            ProviderError::OutOfMemory { .. } => FailureKind::OutOfMemory,
            ProviderError::Timeout { .. } => FailureKind::Timeout,
            ProviderError::PolicyRejected { .. } => FailureKind::PolicyRejected,
            ProviderError::Api { .. } | ProviderError::InvalidResponse { .. } => {
                FailureKind::Backend
            }
        }
    }
}

/// What a client knows about the call in flight, used to word its errors.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallContext<'a> {
    pub backend: &'a str,
    pub url: &'a str,
    pub model: &'a str,
    pub timeout: Duration,
}

impl CallContext<'_> {
    /// Map a transport-level failure (no HTTP status available).
    pub fn transport(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else if err.is_decode() {
            self.invalid(err.to_string())
        } else {
            ProviderError::Unreachable {
                backend: self.backend.to_string(),
                url: self.url.to_string(),
            }
        }
    }

    /// Map a non-success HTTP status and its body.
    pub fn status(&self, status: StatusCode, body: &str) -> ProviderError {
        let message = extract_error_message(body);
        let lower = message.to_ascii_lowercase();

        if lower.contains("out of memory")
            || lower.contains("requires more system memory")
            || lower.contains("insufficient memory")
        {
            ProviderError::OutOfMemory {
                backend: self.backend.to_string(),
                model: self.model.to_string(),
            }
        } else if lower.contains("data policy") || lower.contains("guardrail") {
            ProviderError::PolicyRejected {
                backend: self.backend.to_string(),
                message,
            }
        } else if lower.contains("model")
            && (status == StatusCode::NOT_FOUND
                || lower.contains("not found")
                || lower.contains("not a valid model"))
        {
            ProviderError::ModelNotFound {
                backend: self.backend.to_string(),
                model: self.model.to_string(),
            }
        } else if status == StatusCode::FORBIDDEN && lower.contains("policy") {
            ProviderError::PolicyRejected {
                backend: self.backend.to_string(),
                message,
            }
        } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            ProviderError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            ProviderError::Api {
                backend: self.backend.to_string(),
                status: status.as_u16(),
                message,
            }
        }
    }

    pub fn invalid(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::InvalidResponse {
            backend: self.backend.to_string(),
            message: message.into(),
        }
    }
}

const MAX_ERROR_BODY: usize = 500;

/// Pull the human-readable part out of the error bodies backends send:
/// `{"error": "..."}`, `{"error": {"message": "..."}}` or `{"message": "..."}`.
pub(crate) fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let found = value
            .get("error")
            .and_then(|e| e.as_str().or_else(|| e.get("message").and_then(|m| m.as_str())))
            .or_else(|| value.get("message").and_then(|m| m.as_str()));
        if let Some(text) = found {
            return text.trim().to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CallContext<'static> {
        CallContext {
            backend: "Ollama",
            url: "http://localhost:11434",
            model: "llama3.2",
            timeout: Duration::from_secs(300),
        }
    }

    #[test]
    fn extracts_nested_and_flat_messages() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"bad key","code":401}}"#),
            "bad key"
        );
        assert_eq!(
            extract_error_message(r#"{"error":"model 'x' not found"}"#),
            "model 'x' not found"
        );
        assert_eq!(extract_error_message("  plain text "), "plain text");
        assert_eq!(extract_error_message(""), "empty response body");
    }

    #[test]
    fn ollama_missing_model_is_classified() {
        let err = ctx().status(
            StatusCode::NOT_FOUND,
            r#"{"error":"model \"llama3.2\" not found, try pulling it first"}"#,
        );
        assert_eq!(err.kind(), FailureKind::ModelNotFound);
        assert_eq!(
            err.to_string(),
            "Model 'llama3.2' was not found on Ollama. Pull or install it first."
        );
    }

    #[test]
    fn memory_errors_win_over_status() {
        let err = ctx().status(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":"model requires more system memory (9.1 GiB) than is available (4.0 GiB)"}"#,
        );
        assert_eq!(err.kind(), FailureKind::OutOfMemory);
        assert!(err.to_string().contains("Use a smaller model"));
    }

    #[test]
    fn data_policy_404_is_a_policy_rejection() {
        let body = r#"{"error":{"message":"No endpoints found matching your data policy","code":404}}"#;
        let err = ctx().status(StatusCode::NOT_FOUND, body);
        assert_eq!(err.kind(), FailureKind::PolicyRejected);
        assert!(
            err.to_string()
                .contains("rejected the request: No endpoints found matching your data policy")
        );
    }

    #[test]
    fn other_statuses_keep_backend_message() {
        let err = ctx().status(StatusCode::UNAUTHORIZED, r#"{"error":{"message":"bad key"}}"#);
        assert_eq!(err.kind(), FailureKind::Backend);
        assert_eq!(err.to_string(), "Ollama returned HTTP 401: bad key");
    }

    #[test]
    fn gateway_timeout_maps_to_timeout() {
        let err = ctx().status(StatusCode::GATEWAY_TIMEOUT, "");
        assert_eq!(err.kind(), FailureKind::Timeout);
        assert_eq!(
            err.to_string(),
            "Generation timed out after 300s. Reduce the context or use a smaller model."
        );
    }
}
