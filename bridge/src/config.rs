//! Configuration for the remote execution bridge.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Configuration for the bridge as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How to reach the intermediary host.
    pub ssh: SshConfig,

    /// Operating system of the intermediary host.
    pub remote_os: RemoteOs,

    /// Command-line HTTP client on the remote host.
    pub http_client: String,

    /// Retry schedule for establishing the session.
    pub connect_retry: RetryPolicy,

    /// Idle time after which a session must be re-verified with a round trip.
    pub idle_threshold_secs: u64,

    /// Default timeout for a single remote command.
    pub command_timeout_secs: u64,

    /// Request bodies up to this many bytes are passed inline; larger or
    /// non-printable bodies go through a remote temporary file.
    pub inline_body_limit: usize,

    /// Directory on the remote host for temporary request bodies.
    pub temp_dir: Option<String>,

    /// How long a health report is reused.
    pub health_cache_ttl_secs: u64,

    /// Round trips slower than this are reported as a warning.
    pub latency_warning_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ssh: SshConfig::default(),
            remote_os: RemoteOs::Unix,
            http_client: "curl".to_string(),
            connect_retry: RetryPolicy::default(),
            idle_threshold_secs: 300,
            command_timeout_secs: 120,
            inline_body_limit: 256,
            temp_dir: None,
            health_cache_ttl_secs: 30,
            latency_warning_ms: 2000,
        }
    }
}

impl BridgeConfig {
    /// Create a configuration for the given host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            ssh: SshConfig::new(host),
            ..Self::default()
        }
    }

    /// Set the ssh settings.
    pub fn with_ssh(mut self, ssh: SshConfig) -> Self {
        self.ssh = ssh;
        self
    }

    /// Set the remote operating system.
    pub fn with_remote_os(mut self, os: RemoteOs) -> Self {
        self.remote_os = os;
        self
    }

    /// Set the remote HTTP client executable.
    pub fn with_http_client(mut self, client: impl Into<String>) -> Self {
        self.http_client = client.into();
        self
    }

    /// Set the connection retry policy.
    pub fn with_connect_retry(mut self, policy: RetryPolicy) -> Self {
        self.connect_retry = policy;
        self
    }

    /// Set the idle threshold.
    pub fn with_idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold_secs = threshold.as_secs();
        self
    }

    /// Set the default command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the inline body limit.
    pub fn with_inline_body_limit(mut self, limit: usize) -> Self {
        self.inline_body_limit = limit;
        self
    }

    /// Set the remote temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<String>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Set the health cache TTL.
    pub fn with_health_cache_ttl(mut self, ttl: Duration) -> Self {
        self.health_cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn health_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.health_cache_ttl_secs)
    }

    /// Remote temp directory, falling back to the platform default.
    pub fn remote_temp_dir(&self) -> String {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.remote_os.default_temp_dir().to_string())
    }
}

/// Settings for the ssh client process that carries the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Intermediary host name or address.
    pub host: String,

    /// SSH port.
    pub port: u16,

    /// Login user. Uses the ssh client's default when unset.
    pub user: Option<String>,

    /// Private key used to authenticate. This is the credentials reference;
    /// the key material itself never passes through the bridge.
    pub identity_file: Option<PathBuf>,

    /// SSH client executable.
    pub program: String,

    /// Extra arguments passed before the destination.
    pub extra_args: Vec<String>,

    /// Seconds the ssh client waits for the TCP connection.
    pub connect_timeout_secs: u64,

    /// Value for `StrictHostKeyChecking`.
    pub strict_host_key_checking: String,

    /// Program started on the remote side to read framed commands.
    pub remote_shell: Option<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 22,
            user: None,
            identity_file: None,
            program: "ssh".to_string(),
            extra_args: Vec::new(),
            connect_timeout_secs: 10,
            strict_host_key_checking: "accept-new".to_string(),
            remote_shell: None,
        }
    }
}

impl SshConfig {
    /// Create settings for the given host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the login user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the identity file.
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// `user@host`, or just `host` without a configured user.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

/// Operating system family of the intermediary host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOs {
    /// POSIX `sh` with coreutils.
    Unix,
    /// PowerShell session.
    Windows,
}

impl RemoteOs {
    /// Default directory for temporary files.
    pub fn default_temp_dir(self) -> &'static str {
        match self {
            Self::Unix => "/tmp",
            Self::Windows => "$env:TEMP",
        }
    }

    /// Path separator for remote paths.
    pub fn path_separator(self) -> char {
        match self {
            Self::Unix => '/',
            Self::Windows => '\\',
        }
    }

    /// Quote a single argument for the remote shell.
    pub fn quote(self, arg: &str) -> String {
        match self {
            Self::Unix => shlex::try_quote(arg)
                .map(|quoted| quoted.into_owned())
                .unwrap_or_else(|_| format!("'{}'", arg.replace('\0', "").replace('\'', r"'\''"))),
            Self::Windows => format!("'{}'", arg.replace('\'', "''")),
        }
    }
}
