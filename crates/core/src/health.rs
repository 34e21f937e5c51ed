//! Health primitives for the socket gateway
//!
//! Provides the status taxonomy and the counter snapshot the health
//! endpoint serves: registered connections, broker reachability, and the
//! cumulative broker error count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All subsystems operational
    Healthy,
    /// Broker unreachable, serving local-only delivery
    Degraded,
    /// Not able to serve connections
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is acceptable for serving traffic
    pub fn is_ready(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Get HTTP status code for this health status
    pub fn http_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 200, // Still serving traffic
            HealthStatus::Unhealthy => 503,
        }
    }
}

/// Point-in-time view of the gateway's internal counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySnapshot {
    /// Overall status
    pub status: HealthStatus,
    /// Connections currently registered on this process
    pub registered_connections: usize,
    /// Whether the broker link is currently up
    pub broker_connected: bool,
    /// Cumulative broker errors since process start
    pub broker_errors: u64,
    /// Service version
    pub version: String,
    /// Timestamp of the snapshot
    pub timestamp: DateTime<Utc>,
}

impl GatewaySnapshot {
    /// Build a snapshot from raw counters.
    ///
    /// A lost broker link degrades the gateway (local delivery keeps
    /// working) rather than marking it unhealthy.
    pub fn evaluate(
        registered_connections: usize,
        broker_connected: bool,
        broker_errors: u64,
    ) -> Self {
        let status = if broker_connected {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            registered_connections,
            broker_connected,
            broker_errors,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Boolean verdict consumed by the external health collaborator.
    pub fn is_healthy(&self) -> bool {
        self.status.is_ready()
    }
}
