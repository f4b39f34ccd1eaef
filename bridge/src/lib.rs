//! Remote execution bridge.
//!
//! The inference and vector database services live on a private network
//! reachable only from an intermediary host. This crate keeps one shell
//! session open on that host and turns it into an HTTP transport by running
//! a command-line HTTP client there:
//!
//! - [`RemoteBridge`] manages the session lifecycle, retries, timeouts and
//!   cancellation, and implements [`HttpTransport`].
//! - [`shell`] frames commands so their output and exit status can be read
//!   back unambiguously.
//! - [`http`] builds client invocations and parses their output.
//! - [`health`] reports on the bridge and the services behind it.
//! - `testing` (behind the `testing` feature) provides a scripted transport
//!   for exercising callers without a remote host.

pub mod bridge;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod redact;
pub mod retry;
pub mod session;
pub mod shell;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::RemoteBridge;
pub use config::{BridgeConfig, RemoteOs, SshConfig};
pub use error::{BridgeError, Result};
pub use health::{ComponentHealth, HealthCheck, HealthProbe, HealthReport, HealthStatus};
pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
pub use redact::{redact, redact_for_log};
pub use retry::{RetryExhausted, RetryPolicy, retry};
pub use session::{Session, SessionState};
pub use shell::{LocalShellConnector, RemoteShell, ShellConnector, SshConnector};

// Re-export for callers of the streaming API.
pub use tokio_util::sync::CancellationToken;
