//! Error types for the RAG pipeline.

use ragbridge_bridge::BridgeError;
use ragbridge_embeddings::EmbeddingError;
use ragbridge_store::StoreError;
use ragbridge_vector_store::VectorStoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur while answering a question.
#[derive(Error, Debug)]
pub enum RagError {
    /// The bridge could not deliver a request.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector search failed: {0}")]
    VectorStore(#[from] VectorStoreError),

    /// The inference service has no usable model.
    #[error("no generation model available (requested {requested})")]
    ModelUnavailable { requested: String },

    /// Generation failed on every attempt.
    #[error("generation failed after {} attempt(s): {message}", attempts.len().max(1))]
    Generation {
        message: String,
        attempts: Vec<String>,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("rate limit exceeded; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("missing or invalid API key")]
    Unauthorized,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stable, caller-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConnectionFailed,
    CommandFailed,
    Timeout,
    Cancelled,
    UpstreamError,
    ModelUnavailable,
    GenerationFailed,
    ValidationFailed,
    RateLimited,
    Unauthorized,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::CommandFailed => "COMMAND_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::UpstreamError => "UPSTREAM_ERROR",
            ErrorCode::ModelUnavailable => "MODEL_UNAVAILABLE",
            ErrorCode::GenerationFailed => "GENERATION_FAILED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an outward caller sees when a request fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

fn bridge_code(error: &BridgeError) -> ErrorCode {
    match error {
        BridgeError::Connection { .. } => ErrorCode::ConnectionFailed,
        BridgeError::Command { .. } => ErrorCode::CommandFailed,
        BridgeError::Timeout { .. } => ErrorCode::Timeout,
        BridgeError::Cancelled => ErrorCode::Cancelled,
        BridgeError::Protocol(_) | BridgeError::Io(_) => ErrorCode::UpstreamError,
    }
}

impl RagError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RagError::Bridge(e) => bridge_code(e),
            RagError::Embedding(EmbeddingError::Bridge(e)) => bridge_code(e),
            RagError::Embedding(EmbeddingError::Http { .. } | EmbeddingError::InvalidResponse(_)) => {
                ErrorCode::UpstreamError
            }
            RagError::Embedding(_) => ErrorCode::InternalError,
            RagError::VectorStore(VectorStoreError::Bridge(e)) => bridge_code(e),
            RagError::VectorStore(VectorStoreError::Validation(_)) => ErrorCode::ValidationFailed,
            RagError::VectorStore(
                VectorStoreError::Http { .. }
                | VectorStoreError::Query(_)
                | VectorStoreError::InvalidResponse(_),
            ) => ErrorCode::UpstreamError,
            RagError::VectorStore(_) => ErrorCode::InternalError,
            RagError::ModelUnavailable { .. } => ErrorCode::ModelUnavailable,
            RagError::Generation { .. } => ErrorCode::GenerationFailed,
            RagError::Validation(_) => ErrorCode::ValidationFailed,
            RagError::RateLimited { .. } => ErrorCode::RateLimited,
            RagError::Unauthorized => ErrorCode::Unauthorized,
            RagError::Store(_) | RagError::Serialization(_) => ErrorCode::InternalError,
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.error_code(),
            ErrorCode::ConnectionFailed
                | ErrorCode::Timeout
                | ErrorCode::UpstreamError
                | ErrorCode::GenerationFailed
                | ErrorCode::RateLimited
        )
    }

    /// A message safe to show callers. Never includes shell output,
    /// commands or URLs.
    pub fn user_message(&self) -> String {
        match self {
            RagError::Validation(message) => format!("Invalid request: {message}"),
            RagError::VectorStore(VectorStoreError::Validation(message)) => {
                format!("Invalid filter: {message}")
            }
            RagError::RateLimited { retry_after_secs } => {
                format!("Too many requests. Try again in {retry_after_secs} seconds.")
            }
            RagError::ModelUnavailable { .. } => {
                "No language model is currently available.".to_string()
            }
            _ => match self.error_code() {
                ErrorCode::ConnectionFailed => {
                    "The backend services are unreachable. Please try again later.".to_string()
                }
                ErrorCode::Timeout => "The request timed out. Please try again.".to_string(),
                ErrorCode::Cancelled => "The request was cancelled.".to_string(),
                ErrorCode::CommandFailed | ErrorCode::UpstreamError => {
                    "A backend service returned an error. Please try again later.".to_string()
                }
                ErrorCode::GenerationFailed => {
                    "The answer could not be generated. Please try again.".to_string()
                }
                ErrorCode::Unauthorized => "A valid API key is required.".to_string(),
                _ => "An internal error occurred.".to_string(),
            },
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code(),
            message: self.user_message(),
            retry_after_secs: match self {
                RagError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rate_limit_response_carries_hint() {
        let response = RagError::RateLimited {
            retry_after_secs: 42,
        }
        .to_response();
        assert_eq!(response.code, ErrorCode::RateLimited);
        assert_eq!(response.retry_after_secs, Some(42));
        assert_eq!(
            serde_json::to_value(&response).unwrap()["code"],
            serde_json::json!("RATE_LIMITED")
        );
    }

    #[test]
    fn test_response_hides_command_output() {
        let err = RagError::Bridge(BridgeError::Command {
            command: "curl -H 'Authorization: Bearer abc'".to_string(),
            exit_code: 7,
            output: "curl: (7) Failed to connect to 10.0.0.5".to_string(),
        });
        let response = err.to_response();
        assert_eq!(response.code, ErrorCode::CommandFailed);
        assert_eq!(response.retry_after_secs, None);
        assert!(!response.message.contains("curl"));
        assert!(!response.message.contains("10.0.0.5"));
    }

    #[test]
    fn test_nested_codes() {
        let err = RagError::VectorStore(VectorStoreError::Validation("bad field".to_string()));
        assert_eq!(err.error_code(), ErrorCode::ValidationFailed);
        assert!(!err.is_retryable());

        let err = RagError::Embedding(EmbeddingError::Bridge(BridgeError::Connection {
            attempts: vec!["attempt 1: refused".to_string()],
        }));
        assert_eq!(err.error_code(), ErrorCode::ConnectionFailed);
        assert!(err.is_retryable());

        let err = RagError::ModelUnavailable {
            requested: "llama3".to_string(),
        };
        assert_eq!(err.error_code().as_str(), "MODEL_UNAVAILABLE");
    }
}
