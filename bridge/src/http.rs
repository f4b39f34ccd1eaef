//! HTTP requests executed as command-line HTTP client invocations on the
//! remote host.
//!
//! The client is asked to append `\n<status>` to the response body, so the
//! last line of the command output is the numeric HTTP status and everything
//! before it is the body.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::RemoteOs;
use crate::error::{BridgeError, Result};
use crate::shell::OutputSink;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to a service reachable from the remote host.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Overall time limit for the request.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Create a request with no headers or body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// Create a POST request with a JSON body.
    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        Self::new(HttpMethod::Post, url)
            .with_header("Content-Type", "application/json")
            .with_body(body.to_string())
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }
}

/// Transport for HTTP requests. Everything above the bridge talks to remote
/// services only through this trait.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and wait for the whole response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Send a request and forward each complete response line to `on_line`
    /// as it arrives. Returns the HTTP status.
    async fn send_streaming(
        &self,
        request: HttpRequest,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> Result<u16>;
}

/// Where the request body comes from on the remote command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodySource<'a> {
    None,
    /// Passed as a quoted argument.
    Inline(&'a str),
    /// Read from a remote file.
    File(&'a str),
}

/// Whether `body` should be staged in a remote temporary file instead of
/// being passed inline.
pub fn needs_temp_file(body: &str, inline_limit: usize) -> bool {
    body.len() > inline_limit || body.chars().any(|c| c.is_control() || !c.is_ascii())
}

/// The HTTP client executable to invoke on `os`.
pub fn client_program(os: RemoteOs, configured: &str) -> String {
    // `curl` is an alias for Invoke-WebRequest in Windows PowerShell.
    if os == RemoteOs::Windows && configured == "curl" {
        "curl.exe".to_string()
    } else {
        configured.to_string()
    }
}

/// Quote a remote path. Windows paths are double-quoted so `$env:TEMP`
/// expands.
pub fn quote_path(os: RemoteOs, path: &str) -> String {
    match os {
        RemoteOs::Unix => os.quote(path),
        RemoteOs::Windows => format!("\"{}\"", path.replace('"', "`\"")),
    }
}

/// Build the HTTP client invocation for `request`.
pub fn build_client_command(
    os: RemoteOs,
    client: &str,
    request: &HttpRequest,
    body: &BodySource<'_>,
    streaming: bool,
) -> String {
    let mut parts = vec![client_program(os, client), "-sS".to_string()];

    if streaming {
        parts.push("-N".to_string());
    }

    parts.push("-X".to_string());
    parts.push(request.method.as_str().to_string());

    if let Some(timeout) = request.timeout {
        parts.push("--max-time".to_string());
        parts.push(timeout.as_secs().max(1).to_string());
    }

    for (name, value) in &request.headers {
        parts.push("-H".to_string());
        parts.push(os.quote(&format!("{name}: {value}")));
    }

    match body {
        BodySource::None => {}
        BodySource::Inline(text) => {
            parts.push("--data-binary".to_string());
            parts.push(os.quote(text));
        }
        BodySource::File(path) => {
            parts.push("--data-binary".to_string());
            parts.push(quote_path(os, &format!("@{path}")));
        }
    }

    parts.push("-w".to_string());
    parts.push(os.quote(r"\n%{http_code}"));
    parts.push(os.quote(&request.url));

    parts.join(" ")
}

/// Append removal of `path` to `command`, preserving the command's exit
/// status, so the file is deleted even if nobody is listening any more.
pub fn with_cleanup(os: RemoteOs, command: &str, path: &str) -> String {
    match os {
        RemoteOs::Unix => format!(
            "{command}; rb_rc=$?; rm -f {}; (exit $rb_rc)",
            quote_path(os, path)
        ),
        RemoteOs::Windows => format!(
            "{command}; $rbrc = $global:LASTEXITCODE; Remove-Item -Force -ErrorAction SilentlyContinue {}; $global:LASTEXITCODE = $rbrc",
            quote_path(os, path)
        ),
    }
}

/// Command that writes `body` to the remote file `path`.
pub fn write_file_command(os: RemoteOs, path: &str, body: &str) -> String {
    let encoded = BASE64.encode(body.as_bytes());
    match os {
        RemoteOs::Unix => format!(
            "printf '%s' {} | base64 -d > {}",
            os.quote(&encoded),
            quote_path(os, path)
        ),
        RemoteOs::Windows => format!(
            "[IO.File]::WriteAllBytes({}, [Convert]::FromBase64String({}))",
            quote_path(os, path),
            os.quote(&encoded)
        ),
    }
}

/// Command that removes the remote file `path`.
pub fn remove_file_command(os: RemoteOs, path: &str) -> String {
    match os {
        RemoteOs::Unix => format!("rm -f {}", quote_path(os, path)),
        RemoteOs::Windows => format!(
            "Remove-Item -Force -ErrorAction SilentlyContinue {}",
            quote_path(os, path)
        ),
    }
}

/// Whether `line` is a bare three-digit HTTP status.
pub fn is_status_line(line: &str) -> bool {
    let line = line.trim();
    line.len() == 3 && line.bytes().all(|b| b.is_ascii_digit())
}

/// Split buffered client output into the trailing status and the body.
pub fn split_status_trailer(output: &str) -> Result<(u16, String)> {
    let trimmed = output.trim_end_matches(['\r', '\n']);
    let (body, status_line) = match trimmed.rsplit_once('\n') {
        Some((body, status)) => (body, status),
        None => ("", trimmed),
    };

    if !is_status_line(status_line) {
        return Err(BridgeError::Protocol(format!(
            "missing HTTP status trailer (last line: {:?})",
            status_line.chars().take(40).collect::<String>()
        )));
    }

    let status = status_line
        .trim()
        .parse()
        .map_err(|_| BridgeError::Protocol(format!("invalid HTTP status {status_line:?}")))?;
    let body = body.strip_suffix('\r').unwrap_or(body);
    Ok((status, body.to_string()))
}

/// Output sink that splits streamed client output into lines and forwards
/// every complete line except the terminal status line.
///
/// A three-digit line is held back until either another line arrives (so it
/// was content after all) or the stream ends (so it is the status).
pub struct LineForwarder<'a> {
    buffer: Vec<u8>,
    held_status: Option<String>,
    on_line: &'a mut (dyn for<'l> FnMut(&'l str) + Send),
    forwarded: usize,
}

impl<'a> LineForwarder<'a> {
    pub fn new(on_line: &'a mut (dyn for<'l> FnMut(&'l str) + Send)) -> Self {
        Self {
            buffer: Vec::new(),
            held_status: None,
            on_line,
            forwarded: 0,
        }
    }

    /// Number of lines forwarded so far.
    pub fn forwarded(&self) -> usize {
        self.forwarded
    }

    /// Flush the trailing partial line and return the HTTP status, if the
    /// stream ended with one.
    pub fn finish(mut self) -> Option<u16> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.handle_line(&rest);
        }
        self.held_status.and_then(|status| status.trim().parse().ok())
    }

    fn handle_line(&mut self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches('\r');

        if is_status_line(line) {
            if let Some(previous) = self.held_status.replace(line.to_string()) {
                self.emit(&previous);
            }
            return;
        }

        if let Some(previous) = self.held_status.take() {
            self.emit(&previous);
        }

        if !line.trim().is_empty() {
            self.emit(line);
        }
    }

    fn emit(&mut self, line: &str) {
        self.forwarded += 1;
        (self.on_line)(line);
    }
}

impl OutputSink for LineForwarder<'_> {
    fn accept(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let content = line.get(..pos).unwrap_or_default();
            self.handle_line(content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_status_trailer() {
        let (status, body) = split_status_trailer("{\"ok\":true}\n200").unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "{\"ok\":true}");
    }

    #[test]
    fn test_split_status_multiline_body() {
        let (status, body) = split_status_trailer("line one\nline two\n\n404\n").unwrap();
        assert_eq!(status, 404);
        assert_eq!(body, "line one\nline two\n");
    }

    #[test]
    fn test_split_status_empty_body() {
        let (status, body) = split_status_trailer("\n204").unwrap();
        assert_eq!(status, 204);
        assert_eq!(body, "");
    }

    #[test]
    fn test_split_status_missing() {
        assert!(split_status_trailer("no status here").is_err());
        assert!(split_status_trailer("").is_err());
    }

    #[test]
    fn test_line_forwarder_holds_back_status() {
        let mut seen = Vec::new();
        let mut on_line = |line: &str| seen.push(line.to_string());
        let mut forwarder = LineForwarder::new(&mut on_line);

        forwarder.accept(b"{\"response\":\"Hel");
        forwarder.accept(b"lo\"}\n{\"response\":\" world\"}\n");
        forwarder.accept(b"{\"done\":true}\n\n200");
        let status = forwarder.finish();

        assert_eq!(status, Some(200));
        assert_eq!(
            seen,
            vec![
                "{\"response\":\"Hello\"}",
                "{\"response\":\" world\"}",
                "{\"done\":true}",
            ]
        );
    }

    #[test]
    fn test_line_forwarder_three_digit_content_is_forwarded() {
        let mut seen = Vec::new();
        let mut on_line = |line: &str| seen.push(line.to_string());
        let mut forwarder = LineForwarder::new(&mut on_line);

        forwarder.accept(b"123\nmore\n201\n");
        let status = forwarder.finish();

        assert_eq!(status, Some(201));
        assert_eq!(seen, vec!["123", "more"]);
    }

    #[test]
    fn test_needs_temp_file() {
        assert!(!needs_temp_file("{\"a\":1}", 256));
        assert!(needs_temp_file(&"x".repeat(300), 256));
        assert!(needs_temp_file("line\nbreak", 256));
        assert!(needs_temp_file("naïve", 256));
    }

    #[test]
    fn test_build_client_command_unix() {
        let request = HttpRequest::post_json("http://10.0.0.5:11434/api/generate", &serde_json::json!({"a": 1}))
            .with_timeout(Duration::from_secs(60));
        let command =
            build_client_command(RemoteOs::Unix, "curl", &request, &BodySource::File("/tmp/b.body"), true);

        assert!(command.starts_with("curl -sS -N -X POST --max-time 60"));
        assert!(command.contains("-H 'Content-Type: application/json'"));
        assert!(command.contains("--data-binary @/tmp/b.body"));
        assert!(command.contains(r#"-w "\\n%{http_code}""#));
        assert!(command.ends_with("http://10.0.0.5:11434/api/generate"));
    }

    /// The shell must hand the client exactly the arguments we meant.
    #[cfg(unix)]
    #[test]
    fn test_client_command_arguments_survive_sh() {
        let body = serde_json::json!({"prompt": "it's \"quoted\" $HOME `x`"});
        let request = HttpRequest::post_json("http://h/api/generate?a=1&b=2", &body);
        let inline = body.to_string();
        let command = build_client_command(
            RemoteOs::Unix,
            r"printf '%s\n'",
            &request,
            &BodySource::Inline(&inline),
            false,
        );

        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .unwrap();
        assert!(output.status.success(), "{command}");
        let stdout = String::from_utf8(output.stdout).unwrap();
        let args: Vec<&str> = stdout.lines().collect();

        assert_eq!(
            args,
            vec![
                "-sS",
                "-X",
                "POST",
                "-H",
                "Content-Type: application/json",
                "--data-binary",
                inline.as_str(),
                "-w",
                r"\n%{http_code}",
                "http://h/api/generate?a=1&b=2",
            ]
        );
    }

    #[test]
    fn test_build_client_command_windows_uses_curl_exe() {
        let request = HttpRequest::get("http://svc/v1/meta");
        let command = build_client_command(RemoteOs::Windows, "curl", &request, &BodySource::None, false);
        assert!(command.starts_with("curl.exe -sS -X GET"));
        assert!(command.ends_with("'http://svc/v1/meta'"));
    }

    #[test]
    fn test_with_cleanup_preserves_status() {
        let command = with_cleanup(RemoteOs::Unix, "curl x", "/tmp/f");
        assert_eq!(command, "curl x; rb_rc=$?; rm -f /tmp/f; (exit $rb_rc)");
    }

    #[test]
    fn test_write_file_command_is_base64() {
        let command = write_file_command(RemoteOs::Unix, "/tmp/f", "it's \"quoted\"\n");
        assert!(command.starts_with("printf '%s' "));
        assert!(command.contains("| base64 -d > /tmp/f"));
        assert!(!command.contains("quoted"));
    }
}
