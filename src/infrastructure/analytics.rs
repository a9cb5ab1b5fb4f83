//! Analytics sink implementations

use async_trait::async_trait;
use metrics::counter;
use tracing::info;

use crate::domain::{AnalyticsSink, DomainError};

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalyticsSink;

#[async_trait]
impl AnalyticsSink for NoopAnalyticsSink {
    async fn track(&self, _event: &str, _payload: serde_json::Value) -> Result<(), DomainError> {
        Ok(())
    }
}

/// Writes each event as an `info` log line
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAnalyticsSink;

#[async_trait]
impl AnalyticsSink for TracingAnalyticsSink {
    async fn track(&self, event: &str, payload: serde_json::Value) -> Result<(), DomainError> {
        info!(target: "keyward::analytics", event = %event, payload = %payload, "Analytics event");
        Ok(())
    }
}

/// Counts events through the global `metrics` recorder
///
/// Emits `keyward_events_total{event}`. Without an installed recorder the
/// counters are no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsAnalyticsSink;

#[async_trait]
impl AnalyticsSink for MetricsAnalyticsSink {
    async fn track(&self, event: &str, _payload: serde_json::Value) -> Result<(), DomainError> {
        counter!("keyward_events_total", "event" => event.to_string()).increment(1);
        Ok(())
    }
}
