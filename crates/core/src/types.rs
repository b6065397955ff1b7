//! Service instance and health data model shared by the registry, health
//! monitor, and load balancer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed health of a service instance.
///
/// `Unknown` is the state of a freshly registered instance before the
/// first probe completes. The load balancer only selects `Healthy`
/// instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Last probe succeeded.
    Healthy,
    /// Consecutive probe failures reached the unhealthy threshold.
    Unhealthy,
    /// Not yet probed.
    Unknown,
}

impl InstanceStatus {
    /// Returns the lowercase wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

/// One concrete, independently reachable deployment of a logical service.
///
/// Multiple instances may share `logical_name`; they are interchangeable
/// fan-out targets for load balancing. `instance_id` is caller-supplied,
/// globally unique, and stable for the lifetime of the instance;
/// re-registering the same id updates the record in place instead of
/// creating a duplicate target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Stable, caller-supplied unique identifier.
    pub instance_id: String,
    /// Logical service name shared by interchangeable instances.
    pub logical_name: String,
    /// Base URL at which the instance is reachable.
    pub base_url: String,
    /// Free-form instance kind (e.g. `"ai"`, `"media"`, `"user"`).
    pub kind: String,
    /// Current observed health.
    pub status: InstanceStatus,
    /// Last time the instance was seen (registration or successful probe).
    pub last_seen_at: DateTime<Utc>,
    /// Arbitrary key-value metadata supplied at registration.
    /// `BTreeMap` for deterministic serialization order.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// First registration time. Preserved across re-registrations.
    pub registered_at: DateTime<Utc>,
}

/// Result of a single health probe against an instance.
///
/// Mutated only by the health monitor; read by the load balancer and
/// the registry API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    /// The probed instance.
    pub instance_id: String,
    /// Health status implied by this probe.
    pub status: InstanceStatus,
    /// Probe round-trip latency in milliseconds, if the probe completed.
    pub latency_ms: Option<u64>,
    /// When the probe ran.
    pub checked_at: DateTime<Utc>,
    /// Probe failures since the last success.
    pub consecutive_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_instance() -> ServiceInstance {
        ServiceInstance {
            instance_id: "svc-a-1".to_string(),
            logical_name: "svc-a".to_string(),
            base_url: "http://10.0.0.1:8080".to_string(),
            kind: "ai".to_string(),
            status: InstanceStatus::Unknown,
            last_seen_at: Utc::now(),
            metadata: BTreeMap::new(),
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&InstanceStatus::Healthy).unwrap();
        assert_eq!(json, "\"healthy\"");
        let json = serde_json::to_string(&InstanceStatus::Unknown).unwrap();
        assert_eq!(json, "\"unknown\"");
    }

    #[test]
    fn status_as_str_matches_serde() {
        for status in [
            InstanceStatus::Healthy,
            InstanceStatus::Unhealthy,
            InstanceStatus::Unknown,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn instance_roundtrips_through_json() {
        let instance = sample_instance();
        let json = serde_json::to_string(&instance).unwrap();
        let back: ServiceInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(back, instance);
    }

    #[test]
    fn instance_metadata_defaults_to_empty() {
        // Older records persisted without metadata must still deserialize.
        let json = serde_json::json!({
            "instance_id": "x-1",
            "logical_name": "x",
            "base_url": "http://x:1",
            "kind": "user",
            "status": "unknown",
            "last_seen_at": "2026-01-01T00:00:00Z",
            "registered_at": "2026-01-01T00:00:00Z",
        });
        let instance: ServiceInstance = serde_json::from_value(json).unwrap();
        assert!(instance.metadata.is_empty());
    }
}
