//! The remote execution bridge.
//!
//! [`RemoteBridge`] owns at most one shell session on the intermediary host
//! and uses it to run commands and HTTP requests. Callers are serialized on
//! the session; a command that times out, is cancelled, or leaves the shell
//! in an unknown state tears the session down and the next call reconnects.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::health::{ComponentHealth, HealthCheck, HealthProbe, HealthReport};
use crate::http::{
    BodySource, HttpRequest, HttpResponse, HttpTransport, LineForwarder, build_client_command,
    needs_temp_file, remove_file_command, split_status_trailer, with_cleanup, write_file_command,
};
use crate::redact::redact_for_log;
use crate::retry::retry;
use crate::session::{Session, SessionState};
use crate::shell::{OutputSink, RemoteShell, ShellConnector, SshConnector};

const PING_TOKEN: &str = "ragbridge-ping";
const PING_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Extra time granted on top of the HTTP client's own `--max-time`.
const REQUEST_GRACE: Duration = Duration::from_secs(5);
const LOG_COMMAND_CHARS: usize = 300;
const ERROR_OUTPUT_CHARS: usize = 2000;

struct BridgeInner {
    shell: Option<Box<dyn RemoteShell>>,
    session: Option<Session>,
    state: SessionState,
}

enum RunOutcome {
    Finished(Result<i32>),
    TimedOut,
    Cancelled,
}

/// Runs commands and HTTP requests on the intermediary host over a single
/// persistent shell session.
pub struct RemoteBridge {
    config: BridgeConfig,
    connector: Arc<dyn ShellConnector>,
    inner: Mutex<BridgeInner>,
    health_cache: Mutex<Option<(Instant, HealthReport)>>,
}

impl RemoteBridge {
    /// Create a bridge that connects with the system ssh client.
    pub fn new(config: BridgeConfig) -> Self {
        let connector = Arc::new(SshConnector::new(config.ssh.clone(), config.remote_os));
        Self::with_connector(config, connector)
    }

    /// Create a bridge that opens shells with `connector`.
    pub fn with_connector(config: BridgeConfig, connector: Arc<dyn ShellConnector>) -> Self {
        Self {
            config,
            connector,
            inner: Mutex::new(BridgeInner {
                shell: None,
                session: None,
                state: SessionState::Disconnected,
            }),
            health_cache: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// The live session, if any.
    pub async fn session(&self) -> Option<Session> {
        self.inner.lock().await.session.clone()
    }

    /// Establish the session, reusing a live one.
    pub async fn connect(&self) -> Result<Session> {
        let mut inner = self.inner.lock().await;
        self.connect_locked(&mut inner).await
    }

    /// Close the session. Idempotent.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if inner.shell.is_some() {
            info!("Disconnecting from {}", self.connector.target());
        }
        Self::drop_shell(&mut inner).await;
    }

    /// Whether the session is usable.
    ///
    /// A shallow check only inspects local state. A deep check also makes a
    /// round trip when the session has been idle longer than the configured
    /// threshold, and tears the session down if that round trip fails.
    pub async fn is_active(&self, deep: bool) -> bool {
        let mut inner = self.inner.lock().await;
        self.check_active_locked(&mut inner, deep).await
    }

    /// Run a shell command and return its output.
    pub async fn execute_command(&self, command: &str) -> Result<String> {
        let mut inner = self.inner.lock().await;
        self.execute_locked(&mut inner, command, self.config.command_timeout())
            .await
    }

    /// Send an HTTP request from the remote host and buffer the response.
    pub async fn request(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut inner = self.inner.lock().await;
        self.request_locked(&mut inner, request).await
    }

    /// Send an HTTP request from the remote host and forward each response
    /// line to `on_line` as it arrives. Returns the HTTP status.
    ///
    /// Cancelling `cancel` stops delivery, abandons the session and returns
    /// [`BridgeError::Cancelled`].
    pub async fn request_streaming(
        &self,
        request: &HttpRequest,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> Result<u16> {
        let mut inner = self.inner.lock().await;
        let timeout = self.request_timeout(request);

        let temp_file = self.stage_body_locked(&mut inner, request).await?;
        let command = self.client_command(request, temp_file.as_deref(), true);

        debug!(
            "Streaming {} {}",
            request.method,
            redact_for_log(&request.url, LOG_COMMAND_CHARS)
        );

        let mut forwarder = LineForwarder::new(on_line);
        let result = self
            .run_locked(&mut inner, &command, &mut forwarder, timeout, Some(cancel))
            .await;
        let forwarded = forwarder.forwarded();
        let status = forwarder.finish();

        if result.is_err() {
            self.cleanup_locked(&mut inner, temp_file.as_deref()).await;
        }
        let exit_code = result?;

        if exit_code != 0 {
            let err = BridgeError::Command {
                command: redact_for_log(&command, LOG_COMMAND_CHARS),
                exit_code,
                output: format!("{forwarded} line(s) streamed before failure"),
            };
            warn!("Streaming request failed: {err}");
            return Err(err);
        }

        status.ok_or_else(|| {
            BridgeError::Protocol("streamed response ended without an HTTP status".to_string())
        })
    }

    /// Check the bridge and each probe endpoint. Results are cached for the
    /// configured health TTL.
    pub async fn check_health(&self, probes: &[HealthProbe]) -> HealthReport {
        {
            let cache = self.health_cache.lock().await;
            if let Some((at, report)) = cache.as_ref() {
                if at.elapsed() < self.config.health_cache_ttl() {
                    debug!("Health report served from cache");
                    return report.clone();
                }
            }
        }

        let report = self.probe_health(probes).await;
        *self.health_cache.lock().await = Some((Instant::now(), report.clone()));
        report
    }

    async fn probe_health(&self, probes: &[HealthProbe]) -> HealthReport {
        let mut components = Vec::with_capacity(probes.len() + 1);

        let started = Instant::now();
        let ping = self
            .execute_command(&format!("echo {PING_TOKEN}"))
            .await;
        let latency = elapsed_ms(started);

        match ping {
            Ok(output) if output.contains(PING_TOKEN) => {
                components.push(self.classify_latency("bridge", latency));
            }
            Ok(output) => {
                components.push(ComponentHealth::error(
                    "bridge",
                    format!("unexpected ping output: {}", redact_for_log(&output, 80)),
                    Some(latency),
                ));
            }
            Err(e) => {
                components.push(ComponentHealth::error("bridge", e.to_string(), None));
                for probe in probes {
                    components.push(ComponentHealth::error(
                        probe.name.clone(),
                        "bridge unavailable",
                        None,
                    ));
                }
                return HealthReport::from_components(components);
            }
        }

        for probe in probes {
            let request = HttpRequest::get(probe.url.clone()).with_timeout(PROBE_TIMEOUT);
            let started = Instant::now();
            let result = self.request(&request).await;
            let latency = elapsed_ms(started);

            let component = match result {
                Ok(response) if response.is_success() => {
                    self.classify_latency(&probe.name, latency)
                }
                Ok(response) => ComponentHealth::error(
                    probe.name.clone(),
                    format!("HTTP {}", response.status),
                    Some(latency),
                ),
                Err(e) => ComponentHealth::error(probe.name.clone(), e.to_string(), Some(latency)),
            };
            components.push(component);
        }

        let report = HealthReport::from_components(components);
        info!("Health check finished: {:?}", report.status);
        report
    }

    fn classify_latency(&self, name: &str, latency_ms: u64) -> ComponentHealth {
        if latency_ms > self.config.latency_warning_ms {
            ComponentHealth::warning(
                name,
                format!(
                    "slow response ({latency_ms}ms > {}ms)",
                    self.config.latency_warning_ms
                ),
                Some(latency_ms),
            )
        } else {
            ComponentHealth::ok(name, "ok", latency_ms)
        }
    }

    fn request_timeout(&self, request: &HttpRequest) -> Duration {
        request.timeout.unwrap_or(self.config.command_timeout()) + REQUEST_GRACE
    }

    fn client_command(&self, request: &HttpRequest, temp_file: Option<&str>, streaming: bool) -> String {
        let os = self.config.remote_os;
        let body = match (temp_file, request.body.as_deref()) {
            (Some(path), _) => BodySource::File(path),
            (None, Some(text)) => BodySource::Inline(text),
            (None, None) => BodySource::None,
        };
        let command = build_client_command(os, &self.config.http_client, request, &body, streaming);
        match temp_file {
            Some(path) => with_cleanup(os, &command, path),
            None => command,
        }
    }

    async fn request_locked(
        &self,
        inner: &mut BridgeInner,
        request: &HttpRequest,
    ) -> Result<HttpResponse> {
        let timeout = self.request_timeout(request);
        let temp_file = self.stage_body_locked(inner, request).await?;
        let command = self.client_command(request, temp_file.as_deref(), false);

        debug!(
            "{} {}",
            request.method,
            redact_for_log(&request.url, LOG_COMMAND_CHARS)
        );

        let mut output = Vec::new();
        let result = self
            .run_locked(inner, &command, &mut output, timeout, None)
            .await;
        if result.is_err() {
            self.cleanup_locked(inner, temp_file.as_deref()).await;
        }
        let exit_code = result?;
        let text = String::from_utf8_lossy(&output).into_owned();

        if exit_code != 0 {
            let err = BridgeError::Command {
                command: redact_for_log(&command, LOG_COMMAND_CHARS),
                exit_code,
                output: redact_for_log(&text, ERROR_OUTPUT_CHARS),
            };
            warn!("HTTP client failed: {err}");
            return Err(err);
        }

        let (status, body) = split_status_trailer(&text)?;
        debug!("{} {} -> {status}", request.method, redact_for_log(&request.url, LOG_COMMAND_CHARS));
        Ok(HttpResponse { status, body })
    }

    /// Write a large or non-printable body to a remote temp file. Returns the
    /// file path, or `None` if the body can go inline.
    async fn stage_body_locked(
        &self,
        inner: &mut BridgeInner,
        request: &HttpRequest,
    ) -> Result<Option<String>> {
        let Some(body) = request.body.as_deref() else {
            return Ok(None);
        };
        if !needs_temp_file(body, self.config.inline_body_limit) {
            return Ok(None);
        }

        let os = self.config.remote_os;
        let path = format!(
            "{}{}ragbridge-{}.body",
            self.config.remote_temp_dir(),
            os.path_separator(),
            Uuid::new_v4().simple()
        );
        debug!("Staging {} byte request body in {path}", body.len());

        let command = write_file_command(os, &path, body);
        match self
            .execute_locked(inner, &command, self.config.command_timeout())
            .await
        {
            Ok(_) => Ok(Some(path)),
            Err(e) => {
                self.cleanup_locked(inner, Some(&path)).await;
                Err(e)
            }
        }
    }

    /// Best-effort removal of a staged body after a failed request.
    async fn cleanup_locked(&self, inner: &mut BridgeInner, temp_file: Option<&str>) {
        let Some(path) = temp_file else {
            return;
        };
        let command = remove_file_command(self.config.remote_os, path);
        if let Err(e) = self.execute_locked(inner, &command, PING_TIMEOUT).await {
            warn!("Failed to remove remote temp file {path}: {e}");
        }
    }

    async fn execute_locked(
        &self,
        inner: &mut BridgeInner,
        command: &str,
        timeout: Duration,
    ) -> Result<String> {
        debug!("Executing: {}", redact_for_log(command, LOG_COMMAND_CHARS));
        let mut output = Vec::new();
        let exit_code = self
            .run_locked(inner, command, &mut output, timeout, None)
            .await?;
        let text = String::from_utf8_lossy(&output).into_owned();

        if exit_code != 0 {
            let err = BridgeError::Command {
                command: redact_for_log(command, LOG_COMMAND_CHARS),
                exit_code,
                output: redact_for_log(&text, ERROR_OUTPUT_CHARS),
            };
            warn!("Remote command failed: {err}");
            return Err(err);
        }
        Ok(text)
    }

    /// Run `command` on a ready session, enforcing `timeout` and `cancel`.
    async fn run_locked(
        &self,
        inner: &mut BridgeInner,
        command: &str,
        sink: &mut dyn OutputSink,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<i32> {
        if !self.check_active_locked(inner, true).await {
            self.connect_locked(inner).await?;
        }

        let Some(shell) = inner.shell.as_mut() else {
            return Err(BridgeError::Protocol("no shell attached".to_string()));
        };

        let outcome = {
            let run = tokio::time::timeout(timeout, shell.run(command, sink));
            match cancel {
                Some(token) => tokio::select! {
                    result = run => RunOutcome::from_timeout(result),
                    () = token.cancelled() => RunOutcome::Cancelled,
                },
                None => RunOutcome::from_timeout(run.await),
            }
        };

        match outcome {
            RunOutcome::Finished(Ok(code)) => {
                if let Some(session) = inner.session.as_mut() {
                    session.touch();
                }
                inner.state = SessionState::Active;
                Ok(code)
            }
            RunOutcome::Finished(Err(e)) => {
                warn!("Session lost while running command: {e}");
                Self::drop_shell(inner).await;
                Err(e)
            }
            RunOutcome::TimedOut => {
                warn!("Remote command timed out after {}s; dropping session", timeout.as_secs());
                Self::drop_shell(inner).await;
                Err(BridgeError::Timeout {
                    operation: "remote command".to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
            RunOutcome::Cancelled => {
                info!("Remote command cancelled; dropping session");
                Self::drop_shell(inner).await;
                Err(BridgeError::Cancelled)
            }
        }
    }

    async fn connect_locked(&self, inner: &mut BridgeInner) -> Result<Session> {
        if let (Some(shell), Some(session)) = (inner.shell.as_mut(), inner.session.as_ref()) {
            if shell.is_alive() {
                return Ok(session.clone());
            }
        }
        Self::drop_shell(inner).await;

        let target = self.connector.target();
        info!("Connecting to {target}");
        inner.state = SessionState::Connecting;

        let connector = Arc::clone(&self.connector);
        let outcome = retry(
            &self.config.connect_retry,
            "connect",
            |_: &BridgeError| true,
            |attempt| {
                let connector = Arc::clone(&connector);
                async move {
                    debug!("Connection attempt {attempt}");
                    connector.connect().await
                }
            },
        )
        .await;

        match outcome {
            Ok(shell) => {
                let session = Session::new(
                    self.config.ssh.host.clone(),
                    self.config.ssh.port,
                    self.connector.credentials(),
                );
                inner.shell = Some(shell);
                inner.session = Some(session.clone());
                inner.state = SessionState::Authenticated;
                info!("Connected to {target}");
                Ok(session)
            }
            Err(exhausted) => {
                inner.state = SessionState::Disconnected;
                error!(
                    "Could not connect to {target} after {} attempt(s)",
                    exhausted.attempts.len()
                );
                Err(BridgeError::Connection {
                    attempts: exhausted.attempts,
                })
            }
        }
    }

    async fn check_active_locked(&self, inner: &mut BridgeInner, deep: bool) -> bool {
        let alive = match inner.shell.as_mut() {
            Some(shell) => shell.is_alive(),
            None => false,
        };
        let connected = alive && inner.state.is_connected();
        let idle = inner
            .session
            .as_ref()
            .filter(|_| connected)
            .map(Session::idle_secs);
        let Some(idle_secs) = idle else {
            if inner.shell.is_some() {
                debug!("Shell exited; discarding session");
            }
            Self::drop_shell(inner).await;
            return false;
        };

        if idle_secs < self.config.idle_threshold_secs {
            return true;
        }

        inner.state = SessionState::Stale;
        if !deep {
            return true;
        }

        debug!("Session idle for {idle_secs}s; verifying with a round trip");
        if self.ping_locked(inner).await {
            if let Some(session) = inner.session.as_mut() {
                session.touch();
            }
            inner.state = SessionState::Active;
            true
        } else {
            warn!("Idle session failed verification; disconnecting");
            Self::drop_shell(inner).await;
            false
        }
    }

    async fn ping_locked(&self, inner: &mut BridgeInner) -> bool {
        let Some(shell) = inner.shell.as_mut() else {
            return false;
        };
        let mut output = Vec::new();
        let command = format!("echo {PING_TOKEN}");
        match tokio::time::timeout(PING_TIMEOUT, shell.run(&command, &mut output)).await {
            Ok(Ok(0)) => String::from_utf8_lossy(&output).contains(PING_TOKEN),
            _ => false,
        }
    }

    async fn drop_shell(inner: &mut BridgeInner) {
        if let Some(mut shell) = inner.shell.take() {
            shell.close().await;
        }
        inner.session = None;
        inner.state = SessionState::Disconnected;
    }
}

impl RunOutcome {
    fn from_timeout(result: std::result::Result<Result<i32>, tokio::time::error::Elapsed>) -> Self {
        match result {
            Ok(result) => Self::Finished(result),
            Err(_) => Self::TimedOut,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl HttpTransport for RemoteBridge {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.request(&request).await
    }

    async fn send_streaming(
        &self,
        request: HttpRequest,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> Result<u16> {
        self.request_streaming(&request, on_line, cancel).await
    }
}

#[async_trait]
impl HealthCheck for RemoteBridge {
    async fn check_health(&self, probes: &[HealthProbe]) -> HealthReport {
        RemoteBridge::check_health(self, probes).await
    }
}
