//! Durable registry of known service instances and their health.
//!
//! The registry is the sole owner of instance identity. Registration is
//! idempotent per caller-supplied `instance_id`: re-registering the same
//! id updates the record in place (preserving `registered_at`) instead
//! of accumulating duplicate fan-out targets; registering a new id
//! intentionally creates a second target for its logical name.
//!
//! Records persist through a [`RegistryStore`]; the `by_name` index and
//! the instance cache are rebuilt from the store at startup.

pub mod store;

pub use store::{MemoryRegistryStore, RedbRegistryStore, RegistryStore, StoreError};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

use conductor_core::{HealthRecord, InstanceStatus, ServiceInstance};

use crate::error::OrchestratorError;

/// Registration request body.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    /// Stable caller-supplied id. Re-use updates; a fresh id fans out.
    pub instance_id: String,
    /// Logical service name.
    pub logical_name: String,
    /// Base URL at which the instance is reachable.
    pub base_url: String,
    /// Free-form instance kind.
    pub kind: String,
    /// Arbitrary metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Filter for [`InstanceRegistry::find`]. Empty fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindQuery {
    /// Match a logical service name.
    pub name: Option<String>,
    /// Match an instance kind.
    pub kind: Option<String>,
    /// Match a health status.
    pub status: Option<InstanceStatus>,
}

/// Registry of service instances with a durable backing store.
pub struct InstanceRegistry {
    store: Arc<dyn RegistryStore>,
    /// Instance cache, authoritative between restarts.
    instances: DashMap<String, ServiceInstance>,
    /// Logical name -> instance ids, for fan-out lookups.
    by_name: DashMap<String, Vec<String>>,
    /// Latest probe record per instance. Owned by the health monitor.
    health: DashMap<String, HealthRecord>,
}

impl InstanceRegistry {
    /// Opens the registry over `store`, rebuilding in-memory indices
    /// from persisted records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn open(store: Arc<dyn RegistryStore>) -> Result<Self, OrchestratorError> {
        let registry = Self {
            store,
            instances: DashMap::new(),
            by_name: DashMap::new(),
            health: DashMap::new(),
        };

        let persisted = registry
            .store
            .load_all()
            .map_err(|e| OrchestratorError::Internal(e.into()))?;
        for instance in persisted {
            registry.index(&instance);
            registry
                .instances
                .insert(instance.instance_id.clone(), instance);
        }

        Ok(registry)
    }

    /// Registers or updates an instance. Idempotent per `instance_id`:
    /// an existing record keeps its `registered_at` and current health
    /// status; `last_seen_at` is refreshed.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for empty identity fields, or `Internal` on
    /// a store failure.
    pub fn register(&self, req: RegisterRequest) -> Result<ServiceInstance, OrchestratorError> {
        if req.instance_id.trim().is_empty()
            || req.logical_name.trim().is_empty()
            || req.base_url.trim().is_empty()
        {
            return Err(OrchestratorError::Validation(
                "instance_id, logical_name, and base_url must be non-empty".to_string(),
            ));
        }

        let now = Utc::now();
        let existing = self.instances.get(&req.instance_id).map(|e| e.value().clone());

        let instance = match existing {
            Some(previous) => {
                // Idempotent re-registration: update in place.
                if previous.logical_name != req.logical_name {
                    self.unindex(&previous);
                }
                ServiceInstance {
                    instance_id: req.instance_id,
                    logical_name: req.logical_name,
                    base_url: req.base_url,
                    kind: req.kind,
                    status: previous.status,
                    last_seen_at: now,
                    metadata: req.metadata,
                    registered_at: previous.registered_at,
                }
            }
            None => ServiceInstance {
                instance_id: req.instance_id,
                logical_name: req.logical_name,
                base_url: req.base_url,
                kind: req.kind,
                status: InstanceStatus::Unknown,
                last_seen_at: now,
                metadata: req.metadata,
                registered_at: now,
            },
        };

        self.store
            .put(&instance)
            .map_err(|e| OrchestratorError::Internal(e.into()))?;
        self.index(&instance);
        self.instances
            .insert(instance.instance_id.clone(), instance.clone());

        debug!(
            instance_id = %instance.instance_id,
            logical_name = %instance.logical_name,
            "instance registered"
        );
        Ok(instance)
    }

    /// Removes an instance.
    ///
    /// # Errors
    ///
    /// Returns `InstanceNotFound` for an unknown id; deregistration is
    /// the one registry mutator that is not an idempotent no-op.
    pub fn deregister(&self, instance_id: &str) -> Result<ServiceInstance, OrchestratorError> {
        let Some((_, instance)) = self.instances.remove(instance_id) else {
            return Err(OrchestratorError::InstanceNotFound {
                id: instance_id.to_string(),
            });
        };

        self.unindex(&instance);
        self.health.remove(instance_id);
        self.store
            .remove(instance_id)
            .map_err(|e| OrchestratorError::Internal(e.into()))?;

        debug!(instance_id, "instance deregistered");
        Ok(instance)
    }

    /// Applies a probe result. Idempotent, and a no-op for ids that
    /// were deregistered while the probe was in flight.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on a store failure.
    pub fn update_health(&self, record: HealthRecord) -> Result<(), OrchestratorError> {
        let Some(mut instance) = self.instances.get_mut(&record.instance_id) else {
            debug!(instance_id = %record.instance_id, "health update for unknown instance ignored");
            return Ok(());
        };

        instance.status = record.status;
        if record.status == InstanceStatus::Healthy {
            instance.last_seen_at = record.checked_at;
        }
        let snapshot = instance.clone();
        drop(instance);

        self.store
            .put(&snapshot)
            .map_err(|e| OrchestratorError::Internal(e.into()))?;
        self.health.insert(record.instance_id.clone(), record);
        Ok(())
    }

    /// Fetches one instance by id.
    #[must_use]
    pub fn get(&self, instance_id: &str) -> Option<ServiceInstance> {
        self.instances.get(instance_id).map(|e| e.value().clone())
    }

    /// Latest probe record for an instance, if any probe has run.
    #[must_use]
    pub fn health_record(&self, instance_id: &str) -> Option<HealthRecord> {
        self.health.get(instance_id).map(|e| e.value().clone())
    }

    /// All instances sharing a logical name, in registration order.
    #[must_use]
    pub fn list_by_name(&self, logical_name: &str) -> Vec<ServiceInstance> {
        let Some(ids) = self.by_name.get(logical_name) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.instances.get(id).map(|e| e.value().clone()))
            .collect()
    }

    /// Every registered instance.
    #[must_use]
    pub fn list_all(&self) -> Vec<ServiceInstance> {
        self.instances.iter().map(|e| e.value().clone()).collect()
    }

    /// Instances matching every present filter field.
    #[must_use]
    pub fn find(&self, query: &FindQuery) -> Vec<ServiceInstance> {
        self.instances
            .iter()
            .map(|e| e.value().clone())
            .filter(|i| query.name.as_ref().is_none_or(|n| &i.logical_name == n))
            .filter(|i| query.kind.as_ref().is_none_or(|k| &i.kind == k))
            .filter(|i| query.status.is_none_or(|s| i.status == s))
            .collect()
    }

    /// Number of registered instances.
    #[must_use]
    pub fn count(&self) -> usize {
        self.instances.len()
    }

    fn index(&self, instance: &ServiceInstance) {
        let mut ids = self
            .by_name
            .entry(instance.logical_name.clone())
            .or_default();
        if !ids.contains(&instance.instance_id) {
            ids.push(instance.instance_id.clone());
        }
    }

    fn unindex(&self, instance: &ServiceInstance) {
        if let Some(mut ids) = self.by_name.get_mut(&instance.logical_name) {
            ids.retain(|id| id != &instance.instance_id);
        }
    }
}
