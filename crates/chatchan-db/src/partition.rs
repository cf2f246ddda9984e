//! Static partition routing.
//!
//! A storage config declares one core store plus any number of data stores.
//! Each store claims a disjoint set of partitions in `1..=partition_count`;
//! entities carry their partition and the router resolves it to a store.
//! Stores are opened lazily, once, on first use.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::{Database, StoreError, StoreHandle};

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub partition_count: u32,
    pub core: StoreConfig,
    #[serde(default)]
    pub data: Vec<StoreConfig>,
}

impl StorageConfig {
    /// Everything in one store: the core store owns every partition.
    pub fn all_in_one(path: impl Into<PathBuf>, partition_count: u32) -> Self {
        Self {
            partition_count,
            core: StoreConfig {
                name: "core".into(),
                path: path.into(),
                partitions: (1..=partition_count).collect(),
            },
            data: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    /// SQLite file, or `:memory:`.
    pub path: PathBuf,
    #[serde(default)]
    pub partitions: Vec<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("partition_count must be at least 1")]
    ZeroPartitionCount,

    #[error("store '{store}' claims partition {partition}, outside 1..={partition_count}")]
    PartitionOutOfRange {
        store: String,
        partition: u32,
        partition_count: u32,
    },

    #[error("partition {partition} is claimed by both '{first}' and '{second}'")]
    DuplicatePartition {
        partition: u32,
        first: String,
        second: String,
    },

    #[error("store name '{0}' is declared twice")]
    DuplicateStoreName(String),

    #[error("no store claims any partition")]
    NoPartitions,

    #[error("partition {0} is not assigned to any store")]
    Unassigned(u32),

    #[error("failed to open store '{store}': {source}")]
    Open {
        store: String,
        #[source]
        source: StoreError,
    },
}

/// Picks the partition for a newly created entity.
///
/// `key` is the entity's natural key (account name, channel owner) so that
/// implementations can place related entities together.
pub trait PartitionStrategy: Send + Sync {
    fn choose(&self, key: &str, partitions: &[u32]) -> u32;
}

/// Uniformly random placement.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomPartitioner;

impl PartitionStrategy for RandomPartitioner {
    fn choose(&self, _key: &str, partitions: &[u32]) -> u32 {
        let idx = rand::rng().random_range(0..partitions.len());
        partitions[idx]
    }
}

/// Stable placement: the same key always lands on the same partition for a
/// given partition layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashPartitioner;

impl PartitionStrategy for HashPartitioner {
    fn choose(&self, key: &str, partitions: &[u32]) -> u32 {
        let digest = Sha256::digest(key.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let idx = (u64::from_be_bytes(prefix) % partitions.len() as u64) as usize;
        partitions[idx]
    }
}

struct StoreSlot {
    config: StoreConfig,
    handle: Mutex<Option<StoreHandle>>,
}

impl StoreSlot {
    fn open(&self) -> Result<StoreHandle, PartitionError> {
        let mut guard = self.handle.lock().map_err(|_| PartitionError::Open {
            store: self.config.name.clone(),
            source: StoreError::Poisoned,
        })?;

        if let Some(handle) = guard.as_ref() {
            return Ok(handle.clone());
        }

        let db = Database::open(&self.config.path).map_err(|source| PartitionError::Open {
            store: self.config.name.clone(),
            source,
        })?;
        info!(
            "Store '{}' opened for partitions {:?}",
            self.config.name, self.config.partitions
        );

        let handle = StoreHandle::new(&self.config.name, db);
        *guard = Some(handle.clone());
        Ok(handle)
    }
}

pub struct PartitionRouter {
    partition_count: u32,
    core: usize,
    stores: Vec<StoreSlot>,
    owners: HashMap<u32, usize>,
    assigned: Vec<u32>,
    strategy: Box<dyn PartitionStrategy>,
}

impl PartitionRouter {
    /// Validate the config and build the router. No store is opened yet.
    pub fn new(
        config: StorageConfig,
        strategy: impl PartitionStrategy + 'static,
    ) -> Result<Self, PartitionError> {
        if config.partition_count == 0 {
            return Err(PartitionError::ZeroPartitionCount);
        }

        let partition_count = config.partition_count;
        let all = std::iter::once(config.core).chain(config.data);

        let mut stores: Vec<StoreSlot> = Vec::new();
        let mut owners: HashMap<u32, usize> = HashMap::new();

        for store in all {
            if stores.iter().any(|s| s.config.name == store.name) {
                return Err(PartitionError::DuplicateStoreName(store.name));
            }

            let idx = stores.len();
            for &partition in &store.partitions {
                if partition == 0 || partition > partition_count {
                    return Err(PartitionError::PartitionOutOfRange {
                        store: store.name.clone(),
                        partition,
                        partition_count,
                    });
                }
                if let Some(&owner) = owners.get(&partition) {
                    let first = if owner == idx {
                        store.name.clone()
                    } else {
                        stores[owner].config.name.clone()
                    };
                    return Err(PartitionError::DuplicatePartition {
                        partition,
                        first,
                        second: store.name.clone(),
                    });
                }
                owners.insert(partition, idx);
            }

            stores.push(StoreSlot {
                config: store,
                handle: Mutex::new(None),
            });
        }

        if owners.is_empty() {
            return Err(PartitionError::NoPartitions);
        }

        let mut assigned: Vec<u32> = owners.keys().copied().collect();
        assigned.sort_unstable();

        Ok(Self {
            partition_count,
            core: 0,
            stores,
            owners,
            assigned,
            strategy: Box::new(strategy),
        })
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Partitions claimed by some store, ascending.
    pub fn assigned_partitions(&self) -> &[u32] {
        &self.assigned
    }

    /// The store backing `partition`.
    pub fn executor_for(&self, partition: u32) -> Result<StoreHandle, PartitionError> {
        let idx = *self
            .owners
            .get(&partition)
            .ok_or(PartitionError::Unassigned(partition))?;
        debug!("Partition {} -> store '{}'", partition, self.stores[idx].config.name);
        self.stores[idx].open()
    }

    /// The core store, home of the work queue and the directory tables.
    pub fn core(&self) -> Result<StoreHandle, PartitionError> {
        self.stores[self.core].open()
    }

    /// Partition for a new entity keyed by `key`.
    pub fn choose_partition(&self, key: &str) -> u32 {
        self.strategy.choose(key, &self.assigned)
    }
}
