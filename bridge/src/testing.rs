//! In-process [`HttpTransport`] for tests and offline development.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::health::{ComponentHealth, HealthCheck, HealthProbe, HealthReport};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};

type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync;

/// Answers requests with a handler and records every request it sees.
///
/// Streaming requests use the same handler; the response body is replayed
/// line by line, skipping blank lines.
#[derive(Clone)]
pub struct ScriptedTransport {
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    pub fn new(handler: impl Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests whose URL contains `fragment`.
    pub fn count(&self, fragment: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.url.contains(fragment))
            .count()
    }

    fn handle(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        (self.handler)(request)
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.handle(&request)
    }

    async fn send_streaming(
        &self,
        request: HttpRequest,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> Result<u16> {
        let response = self.handle(&request)?;
        for line in response.body.lines().filter(|l| !l.trim().is_empty()) {
            if cancel.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }
            on_line(line);
        }
        Ok(response.status)
    }
}

/// Probes go through the handler; the bridge itself is always healthy.
#[async_trait]
impl HealthCheck for ScriptedTransport {
    async fn check_health(&self, probes: &[HealthProbe]) -> HealthReport {
        let mut components = vec![ComponentHealth::ok("bridge", "in-process", 0)];
        for probe in probes {
            let started = Instant::now();
            let result = self.handle(&HttpRequest::get(probe.url.clone()));
            let latency = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            components.push(match result {
                Ok(response) if response.is_success() => {
                    ComponentHealth::ok(probe.name.clone(), "ok", latency)
                }
                Ok(response) => ComponentHealth::error(
                    probe.name.clone(),
                    format!("HTTP {}", response.status),
                    Some(latency),
                ),
                Err(e) => ComponentHealth::error(probe.name.clone(), e.to_string(), Some(latency)),
            });
        }
        HealthReport::from_components(components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_streaming_through_trait_object() {
        let transport: Arc<dyn HttpTransport> = Arc::new(ScriptedTransport::new(|_| {
            Ok(HttpResponse::new(200, "{\"response\":\"a\"}\n\n{\"done\":true}\n"))
        }));
        let mut lines = Vec::new();
        let mut on_line = |line: &str| lines.push(line.to_string());

        let status = transport
            .send_streaming(
                HttpRequest::get("http://svc/stream"),
                &mut on_line,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(status, 200);
        assert_eq!(lines, vec!["{\"response\":\"a\"}", "{\"done\":true}"]);
    }

    #[tokio::test]
    async fn test_cancelled_stream_stops() {
        let transport = ScriptedTransport::new(|_| Ok(HttpResponse::new(200, "one\ntwo\n")));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut on_line = |_: &str| {};

        let err = transport
            .send_streaming(HttpRequest::get("http://svc/stream"), &mut on_line, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled));
        assert_eq!(transport.count("/stream"), 1);
    }
}
