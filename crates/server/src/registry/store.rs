//! Durable persistence layer for the instance registry.
//!
//! [`RegistryStore`] is the innermost storage seam: a synchronous
//! key-value store of [`ServiceInstance`] records keyed by instance id.
//! Two implementations are provided: [`MemoryRegistryStore`] for tests
//! and [`RedbRegistryStore`] backed by an embedded redb database so
//! registry state survives process restart. In-memory indices are
//! rebuilt from [`RegistryStore::load_all`] at startup.

use dashmap::DashMap;
use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

use conductor_core::ServiceInstance;

/// Instance records, JSON-encoded, keyed by instance id.
const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Storage failures. Wrapped into `OrchestratorError::Internal` at the
/// registry boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying storage failure (I/O, transaction, corruption).
    #[error("registry store failure: {0}")]
    Storage(String),
    /// Record encoding/decoding failure.
    #[error("registry record codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Synchronous key-value persistence for instance records.
///
/// All operations are idempotent: `put` replaces, `remove` of an absent
/// key returns `None`. Wrapped in `Arc<dyn RegistryStore>` for sharing.
pub trait RegistryStore: Send + Sync + 'static {
    /// Insert or replace a record by instance id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage or codec failure.
    fn put(&self, instance: &ServiceInstance) -> Result<(), StoreError>;

    /// Fetch a record by instance id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage or codec failure.
    fn get(&self, instance_id: &str) -> Result<Option<ServiceInstance>, StoreError>;

    /// Remove a record, returning it if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage or codec failure.
    fn remove(&self, instance_id: &str) -> Result<Option<ServiceInstance>, StoreError>;

    /// Load every stored record, for index rebuilding at startup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage or codec failure.
    fn load_all(&self) -> Result<Vec<ServiceInstance>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Non-durable store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryRegistryStore {
    records: DashMap<String, ServiceInstance>,
}

impl MemoryRegistryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryStore for MemoryRegistryStore {
    fn put(&self, instance: &ServiceInstance) -> Result<(), StoreError> {
        self.records
            .insert(instance.instance_id.clone(), instance.clone());
        Ok(())
    }

    fn get(&self, instance_id: &str) -> Result<Option<ServiceInstance>, StoreError> {
        Ok(self.records.get(instance_id).map(|r| r.value().clone()))
    }

    fn remove(&self, instance_id: &str) -> Result<Option<ServiceInstance>, StoreError> {
        Ok(self.records.remove(instance_id).map(|(_, v)| v))
    }

    fn load_all(&self) -> Result<Vec<ServiceInstance>, StoreError> {
        Ok(self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// redb store
// ---------------------------------------------------------------------------

/// Durable store backed by an embedded redb database.
///
/// One table, JSON-encoded records. Every mutation commits its own
/// transaction; registry writes are rare (registrations and health
/// transitions), so transaction overhead is irrelevant next to the
/// durability guarantee.
pub struct RedbRegistryStore {
    db: Database,
}

impl RedbRegistryStore {
    /// Opens (or creates) the database at `path` and ensures the
    /// instances table exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened.
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(|e| StoreError::Storage(e.to_string()))?;

        // Create the table up front so reads on a fresh database do not
        // hit TableDoesNotExist.
        let write = db
            .begin_write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        write
            .open_table(INSTANCES)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        write
            .commit()
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(Self { db })
    }
}

impl RegistryStore for RedbRegistryStore {
    fn put(&self, instance: &ServiceInstance) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(instance)?;
        let write = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        {
            let mut table = write
                .open_table(INSTANCES)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            table
                .insert(instance.instance_id.as_str(), encoded.as_slice())
                .map_err(|e| StoreError::Storage(e.to_string()))?;
        }
        write
            .commit()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(())
    }

    fn get(&self, instance_id: &str) -> Result<Option<ServiceInstance>, StoreError> {
        let read = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let table = read
            .open_table(INSTANCES)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let guard = table
            .get(instance_id)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        match guard {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn remove(&self, instance_id: &str) -> Result<Option<ServiceInstance>, StoreError> {
        let write = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let removed = {
            let mut table = write
                .open_table(INSTANCES)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let guard = table
                .remove(instance_id)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            match guard {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            }
        };
        write
            .commit()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(removed)
    }

    fn load_all(&self) -> Result<Vec<ServiceInstance>, StoreError> {
        let read = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let table = read
            .open_table(INSTANCES)
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let mut instances = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| StoreError::Storage(e.to_string()))?
        {
            let (_, value) = entry.map_err(|e| StoreError::Storage(e.to_string()))?;
            instances.push(serde_json::from_slice(value.value())?);
        }
        Ok(instances)
    }
}
