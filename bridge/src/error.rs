//! Error types for the remote execution bridge.

use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while talking to the remote host.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Every connection attempt failed.
    #[error("connection failed after {} attempt(s): {}", attempts.len(), attempts.join("; "))]
    Connection { attempts: Vec<String> },

    /// A remote command exited with a non-zero status.
    #[error("remote command exited with status {exit_code}: {command}")]
    Command {
        /// The command, already redacted.
        command: String,
        exit_code: i32,
        /// Captured output, already redacted.
        output: String,
    },

    /// A remote operation did not finish in time.
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout { operation: String, timeout_secs: u64 },

    /// The remote output did not follow the expected framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The caller cancelled a streaming request.
    #[error("request cancelled")]
    Cancelled,

    /// Local process or pipe failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether retrying the same operation on a fresh session could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Protocol(_) | Self::Io(_)
        )
    }
}
