//! Session lifecycle tests with an in-memory shell.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use ragbridge_bridge::shell::OutputSink;
use ragbridge_bridge::{
    BridgeConfig, BridgeError, RemoteBridge, RemoteShell, RetryPolicy, SessionState,
    ShellConnector,
};
use tokio::time::Instant;

/// Echoes the argument of `echo` commands while `healthy` is set.
struct FakeShell {
    healthy: Arc<AtomicBool>,
    alive: bool,
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn run(&mut self, command: &str, sink: &mut dyn OutputSink) -> ragbridge_bridge::Result<i32> {
        if !self.healthy.load(Ordering::SeqCst) {
            self.alive = false;
            return Err(BridgeError::Protocol("connection reset".to_string()));
        }
        if let Some(text) = command.strip_prefix("echo ") {
            sink.accept(format!("{text}\n").as_bytes());
        }
        Ok(0)
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }

    async fn close(&mut self) {
        self.alive = false;
    }
}

/// Fails the first `failures` connection attempts.
struct FlakyConnector {
    failures: u32,
    attempts: AtomicU32,
    healthy: Arc<AtomicBool>,
}

impl FlakyConnector {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: AtomicU32::new(0),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }
}

#[async_trait]
impl ShellConnector for FlakyConnector {
    fn target(&self) -> String {
        "fake".to_string()
    }

    fn credentials(&self) -> Option<String> {
        Some("/keys/id_test".to_string())
    }

    async fn connect(&self) -> ragbridge_bridge::Result<Box<dyn RemoteShell>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(BridgeError::Protocol(format!("handshake refused ({attempt})")));
        }
        Ok(Box::new(FakeShell {
            healthy: Arc::clone(&self.healthy),
            alive: true,
        }))
    }
}

fn config(max_attempts: u32) -> BridgeConfig {
    BridgeConfig::default().with_connect_retry(
        RetryPolicy::new(max_attempts, Duration::from_millis(1000)).with_jitter(Duration::ZERO),
    )
}

#[tokio::test(start_paused = true)]
async fn test_connect_retries_with_backoff() {
    let connector = Arc::new(FlakyConnector::new(2));
    let bridge = RemoteBridge::with_connector(config(3), connector.clone());

    let started = Instant::now();
    let session = bridge.connect().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    assert!(elapsed >= Duration::from_millis(3000), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(3500), "{elapsed:?}");
    assert_eq!(session.credentials.as_deref(), Some("/keys/id_test"));
    assert_eq!(bridge.state().await, SessionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn test_connect_reports_every_attempt() {
    let connector = Arc::new(FlakyConnector::new(10));
    let bridge = RemoteBridge::with_connector(config(3), connector);

    let err = bridge.connect().await.unwrap_err();
    match err {
        BridgeError::Connection { attempts } => {
            assert_eq!(attempts.len(), 3);
            assert!(attempts[0].contains("handshake refused (1)"));
            assert!(attempts[2].contains("handshake refused (3)"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(bridge.state().await, SessionState::Disconnected);
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let connector = Arc::new(FlakyConnector::new(0));
    let bridge = RemoteBridge::with_connector(config(1), connector.clone());

    let first = bridge.connect().await.unwrap();
    let second = bridge.connect().await.unwrap();
    assert_eq!(first.authenticated_at, second.authenticated_at);
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_is_active_follows_lifecycle() {
    let bridge = RemoteBridge::with_connector(config(1), Arc::new(FlakyConnector::new(0)));
    assert!(!bridge.is_active(false).await);
    assert_eq!(bridge.state().await, SessionState::Disconnected);

    bridge.connect().await.unwrap();
    assert!(bridge.is_active(false).await);
    assert!(bridge.is_active(true).await);

    bridge.disconnect().await;
    assert!(!bridge.is_active(true).await);
    assert!(bridge.session().await.is_none());

    // Disconnecting twice is harmless.
    bridge.disconnect().await;
    assert_eq!(bridge.state().await, SessionState::Disconnected);
}

#[tokio::test]
async fn test_idle_session_is_reverified() {
    let connector = Arc::new(FlakyConnector::new(0));
    let healthy = Arc::clone(&connector.healthy);
    let bridge = RemoteBridge::with_connector(
        config(1).with_idle_threshold(Duration::ZERO),
        connector,
    );
    bridge.connect().await.unwrap();

    // Shallow checks only look at local state.
    assert!(bridge.is_active(false).await);
    assert_eq!(bridge.state().await, SessionState::Stale);

    assert!(bridge.is_active(true).await);
    assert_eq!(bridge.state().await, SessionState::Active);

    healthy.store(false, Ordering::SeqCst);
    assert!(!bridge.is_active(true).await);
    assert_eq!(bridge.state().await, SessionState::Disconnected);
}

#[tokio::test]
async fn test_command_reconnects_after_lost_session() {
    let connector = Arc::new(FlakyConnector::new(0));
    let healthy = Arc::clone(&connector.healthy);
    let bridge = RemoteBridge::with_connector(config(1), connector.clone());

    healthy.store(false, Ordering::SeqCst);
    bridge.connect().await.unwrap();
    let err = bridge.execute_command("echo hi").await.unwrap_err();
    assert!(matches!(err, BridgeError::Protocol(_)));
    assert_eq!(bridge.state().await, SessionState::Disconnected);

    healthy.store(true, Ordering::SeqCst);
    assert_eq!(bridge.execute_command("echo hi").await.unwrap(), "hi\n");
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
}
