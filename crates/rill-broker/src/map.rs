//! The partitions loaded on this worker.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use rill_common::PartitionId;
use rill_storage::PartitionEngine;

/// Engines keyed by partition.
///
/// Lookups take the read lock only for the clone of one `Arc`; callers get
/// owned snapshots and never hold the lock while an engine works.
#[derive(Default)]
pub struct PartitionMap {
    engines: RwLock<HashMap<PartitionId, Arc<PartitionEngine>>>,
}

impl PartitionMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the engine of `partition`.
    pub fn get(&self, partition: &PartitionId) -> Option<Arc<PartitionEngine>> {
        self.engines.read().get(partition).cloned()
    }

    /// Returns true if `partition` is loaded.
    pub fn contains(&self, partition: &PartitionId) -> bool {
        self.engines.read().contains_key(partition)
    }

    /// Adds an engine unless its partition is already present, in which
    /// case the engine is handed back.
    pub fn insert(&self, engine: Arc<PartitionEngine>) -> Result<(), Arc<PartitionEngine>> {
        let mut engines = self.engines.write();
        if engines.contains_key(engine.partition()) {
            return Err(engine);
        }
        engines.insert(engine.partition().clone(), engine);
        Ok(())
    }

    /// Removes and returns the engine of `partition`.
    pub fn remove(&self, partition: &PartitionId) -> Option<Arc<PartitionEngine>> {
        self.engines.write().remove(partition)
    }

    /// Returns every engine currently serving traffic.
    pub fn running(&self) -> Vec<Arc<PartitionEngine>> {
        self.engines
            .read()
            .values()
            .filter(|engine| engine.is_running())
            .cloned()
            .collect()
    }

    /// Returns every engine regardless of state.
    pub fn all(&self) -> Vec<Arc<PartitionEngine>> {
        self.engines.read().values().cloned().collect()
    }

    /// Returns the loaded partition ids, sorted.
    pub fn ids(&self) -> Vec<PartitionId> {
        let mut ids: Vec<PartitionId> = self.engines.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the number of loaded partitions.
    pub fn len(&self) -> usize {
        self.engines.read().len()
    }

    /// Returns true if nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.engines.read().is_empty()
    }
}

impl std::fmt::Debug for PartitionMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionMap")
            .field("partitions", &self.ids())
            .finish()
    }
}
