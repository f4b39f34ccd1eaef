//! Health reporting for the bridge and the services behind it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one dependency, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Warning,
    Error,
}

/// Health of one dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Dependency name (`bridge`, `inference`, `vector_store`, ...).
    pub name: String,

    pub status: HealthStatus,

    /// Human-readable detail.
    pub message: String,

    /// Round-trip latency, when a round trip was made.
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    pub fn ok(name: impl Into<String>, message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Ok,
            message: message.into(),
            latency_ms: Some(latency_ms),
        }
    }

    pub fn warning(name: impl Into<String>, message: impl Into<String>, latency_ms: Option<u64>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Warning,
            message: message.into(),
            latency_ms,
        }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>, latency_ms: Option<u64>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Error,
            message: message.into(),
            latency_ms,
        }
    }
}

/// Aggregated health of the bridge and its downstream services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst status among the components.
    pub status: HealthStatus,

    pub components: Vec<ComponentHealth>,

    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Build a report; the overall status is the worst component status.
    pub fn from_components(components: Vec<ComponentHealth>) -> Self {
        let status = components
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Ok);
        Self {
            status,
            components,
            checked_at: Utc::now(),
        }
    }

    /// Find a component by name.
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// A downstream HTTP endpoint checked through the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthProbe {
    /// Component name in the report.
    pub name: String,

    /// URL requested with GET.
    pub url: String,
}

impl HealthProbe {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Something that can report on itself and the services behind it.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check_health(&self, probes: &[HealthProbe]) -> HealthReport;
}
