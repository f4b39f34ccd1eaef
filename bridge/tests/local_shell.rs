//! End-to-end bridge tests against a local `sh` standing in for the remote
//! host, with a fake HTTP client script.
#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use ragbridge_bridge::{
    BridgeConfig, BridgeError, CancellationToken, HealthProbe, HealthStatus, HttpRequest,
    LocalShellConnector, RemoteBridge, RetryPolicy, SessionState,
};
use tempfile::TempDir;

const FAKE_CLIENT: &str = r#"#!/bin/sh
data=""
url=""
while [ $# -gt 0 ]; do
  case "$1" in
    -X|-H|-w|--max-time) shift ;;
    --data-binary) shift; data="$1" ;;
    -sS|-N) ;;
    *) url="$1" ;;
  esac
  shift
done
case "$url" in
  */echo)
    case "$data" in
      @*) cat "${data#@}" ;;
      *) printf '%s' "$data" ;;
    esac
    printf '\n200' ;;
  */stream)
    printf '{"response":"Hel"}\n'
    printf '{"response":"lo"}\n'
    printf '{"done":true}\n'
    printf '\n200' ;;
  */missing)
    printf 'not found'
    printf '\n404' ;;
  */fail)
    echo "curl: (7) Failed to connect" >&2
    exit 7 ;;
  */slow)
    sleep 5
    printf 'late\n200' ;;
esac
"#;

struct Fixture {
    _dir: TempDir,
    temp_dir: std::path::PathBuf,
    bridge: RemoteBridge,
}

fn write_client(dir: &Path) -> String {
    let path = dir.join("fake-curl");
    std::fs::write(&path, FAKE_CLIENT).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn fixture_with(configure: impl FnOnce(BridgeConfig) -> BridgeConfig) -> Fixture {
    let dir = TempDir::new().unwrap();
    let client = write_client(dir.path());
    let temp_dir = dir.path().join("staging");
    std::fs::create_dir(&temp_dir).unwrap();

    let config = BridgeConfig::default()
        .with_http_client(client)
        .with_temp_dir(temp_dir.to_string_lossy().into_owned())
        .with_connect_retry(
            RetryPolicy::new(1, Duration::from_millis(10)).with_jitter(Duration::ZERO),
        );
    let bridge = RemoteBridge::with_connector(
        configure(config),
        Arc::new(LocalShellConnector::new()),
    );

    Fixture {
        _dir: dir,
        temp_dir,
        bridge,
    }
}

fn fixture() -> Fixture {
    fixture_with(|config| config)
}

fn staged_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn test_execute_command_returns_output() {
    let fx = fixture();
    let output = fx
        .bridge
        .execute_command("printf 'a\\nb\\n__ragbridge_fake__:0\\n'")
        .await
        .unwrap();
    assert_eq!(output, "a\nb\n__ragbridge_fake__:0\n");
    assert_eq!(fx.bridge.state().await, SessionState::Active);
}

#[tokio::test]
async fn test_execute_command_unterminated_output() {
    let fx = fixture();
    let output = fx.bridge.execute_command("printf 'no newline'").await.unwrap();
    assert_eq!(output, "no newline");
}

#[tokio::test]
async fn test_execute_command_reuses_session() {
    let fx = fixture();
    let first = fx.bridge.execute_command("echo $$").await.unwrap();
    let second = fx.bridge.execute_command("echo $$").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_non_zero_exit_is_command_error() {
    let fx = fixture();
    let err = fx
        .bridge
        .execute_command("echo boom; exit 3")
        .await
        .unwrap_err();
    match err {
        BridgeError::Command {
            exit_code, output, ..
        } => {
            assert_eq!(exit_code, 3);
            assert_eq!(output, "boom\n");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // The shell survives a failing command.
    assert!(fx.bridge.is_active(false).await);
}

#[tokio::test]
async fn test_exit_does_not_end_session() {
    let fx = fixture();
    let before = fx.bridge.execute_command("echo $$").await.unwrap();

    let err = fx.bridge.execute_command("exit 3").await.unwrap_err();
    assert!(
        matches!(err, BridgeError::Command { exit_code: 3, .. }),
        "unexpected error: {err:?}"
    );

    let after = fx.bridge.execute_command("echo $$").await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_commands_do_not_leak_shell_state() {
    let fx = fixture();
    fx.bridge
        .execute_command("cd /; RB_LEAK=1; export RB_LEAK")
        .await
        .unwrap();
    let output = fx
        .bridge
        .execute_command("echo \"${RB_LEAK:-unset}\"")
        .await
        .unwrap();
    assert_eq!(output, "unset\n");
}

#[tokio::test]
async fn test_command_error_redacts_secrets() {
    let fx = fixture();
    let err = fx
        .bridge
        .execute_command("echo password=hunter2; false")
        .await
        .unwrap_err();
    let BridgeError::Command {
        command, output, ..
    } = err
    else {
        panic!("expected command error");
    };
    assert!(!command.contains("hunter2"));
    assert!(!output.contains("hunter2"));
}

#[tokio::test]
async fn test_timeout_drops_session_and_next_call_reconnects() {
    let fx = fixture_with(|config| config.with_command_timeout(Duration::from_secs(1)));
    let err = fx.bridge.execute_command("sleep 3").await.unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { .. }), "{err:?}");
    assert_eq!(fx.bridge.state().await, SessionState::Disconnected);

    let output = fx.bridge.execute_command("echo back").await.unwrap();
    assert_eq!(output, "back\n");
}

#[tokio::test]
async fn test_request_inline_body() {
    let fx = fixture();
    let request = HttpRequest::post_json("http://svc/echo", &serde_json::json!({"q": "hi"}));
    let response = fx.bridge.request(&request).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, r#"{"q":"hi"}"#);
    assert!(staged_files(&fx.temp_dir).is_empty());
}

#[tokio::test]
async fn test_request_large_body_goes_through_temp_file() {
    let fx = fixture();
    let body = format!("{}\nit's \"quoted\" and $HOME stays literal\n{}", "x".repeat(400), "y".repeat(10));
    let request = HttpRequest::new(ragbridge_bridge::HttpMethod::Post, "http://svc/echo")
        .with_body(body.clone());

    let response = fx.bridge.request(&request).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, body);
    assert!(staged_files(&fx.temp_dir).is_empty());
}

#[tokio::test]
async fn test_request_preserves_error_status() {
    let fx = fixture();
    let response = fx
        .bridge
        .request(&HttpRequest::get("http://svc/missing"))
        .await
        .unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.body, "not found");
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_client_failure_is_command_error_and_cleans_temp_file() {
    let fx = fixture();
    let request = HttpRequest::new(ragbridge_bridge::HttpMethod::Post, "http://svc/fail")
        .with_body("z".repeat(1000));
    let err = fx.bridge.request(&request).await.unwrap_err();
    match err {
        BridgeError::Command {
            exit_code, output, ..
        } => {
            assert_eq!(exit_code, 7);
            assert!(output.contains("Failed to connect"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(staged_files(&fx.temp_dir).is_empty());
}

#[tokio::test]
async fn test_streaming_forwards_lines_in_order() {
    let fx = fixture();
    let mut lines = Vec::new();
    let mut on_line = |line: &str| lines.push(line.to_string());
    let status = fx
        .bridge
        .request_streaming(
            &HttpRequest::get("http://svc/stream"),
            &mut on_line,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(status, 200);
    assert_eq!(
        lines,
        vec![
            r#"{"response":"Hel"}"#,
            r#"{"response":"lo"}"#,
            r#"{"done":true}"#,
        ]
    );
}

#[tokio::test]
async fn test_streaming_cancellation() {
    let fx = fixture();
    fx.bridge.connect().await.unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller.cancel();
    });

    let mut lines = Vec::new();
    let mut on_line = |line: &str| lines.push(line.to_string());
    let err = fx
        .bridge
        .request_streaming(&HttpRequest::get("http://svc/slow"), &mut on_line, &token)
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::Cancelled), "{err:?}");
    assert!(lines.is_empty());
    assert_eq!(fx.bridge.state().await, SessionState::Disconnected);

    let output = fx.bridge.execute_command("echo recovered").await.unwrap();
    assert_eq!(output, "recovered\n");
}

#[tokio::test]
async fn test_health_check() {
    let fx = fixture();
    let probes = vec![
        HealthProbe::new("inference", "http://svc/echo"),
        HealthProbe::new("vector_store", "http://svc/missing"),
    ];

    let report = fx.bridge.check_health(&probes).await;
    assert_eq!(report.component("bridge").unwrap().status, HealthStatus::Ok);
    assert_eq!(report.component("inference").unwrap().status, HealthStatus::Ok);
    let store = report.component("vector_store").unwrap();
    assert_eq!(store.status, HealthStatus::Error);
    assert_eq!(store.message, "HTTP 404");
    assert_eq!(report.status, HealthStatus::Error);

    let cached = fx.bridge.check_health(&probes).await;
    assert_eq!(cached.checked_at, report.checked_at);
}

#[tokio::test]
async fn test_health_check_without_bridge() {
    let dir = TempDir::new().unwrap();
    let connector = LocalShellConnector::new().with_program(
        dir.path().join("no-such-shell").to_string_lossy().into_owned(),
        Vec::new(),
    );
    let config = BridgeConfig::default().with_connect_retry(
        RetryPolicy::new(2, Duration::from_millis(10)).with_jitter(Duration::ZERO),
    );
    let bridge = RemoteBridge::with_connector(config, Arc::new(connector));

    let report = bridge
        .check_health(&[HealthProbe::new("inference", "http://svc/echo")])
        .await;
    assert_eq!(report.status, HealthStatus::Error);
    assert_eq!(report.component("bridge").unwrap().status, HealthStatus::Error);
    assert_eq!(
        report.component("inference").unwrap().message,
        "bridge unavailable"
    );
}
