#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chatchan_core::{ChatServices, CoreDirectory, RetryPolicy, Settings, StaticDirectory};
use chatchan_db::{Database, PartitionRouter, RandomPartitioner, StorageConfig, StoreConfig};
use chatchan_types::{AccountId, ChannelId, ChannelKind};

pub fn user(name: &str) -> AccountId {
    AccountId::user(name).unwrap()
}

pub fn settings() -> Settings {
    Settings {
        retry: RetryPolicy::immediate(5),
        poll_timeout: Duration::from_secs(30),
        ..Settings::default()
    }
}

/// Core store plus two data stores, all in memory.
pub fn split_router() -> Arc<PartitionRouter> {
    let store = |name: &str, partitions: &[u32]| StoreConfig {
        name: name.into(),
        path: chatchan_db::MEMORY_PATH.into(),
        partitions: partitions.to_vec(),
    };
    let config = StorageConfig {
        partition_count: 2,
        core: store("core", &[]),
        data: vec![store("d1", &[1]), store("d2", &[2])],
    };
    Arc::new(PartitionRouter::new(config, RandomPartitioner).unwrap())
}

/// File-backed core store at `core`, with every data partition in `data`.
pub fn split_file_router(core: &Path, data: &Path) -> Arc<PartitionRouter> {
    let config = StorageConfig {
        partition_count: 2,
        core: StoreConfig {
            name: "core".into(),
            path: core.to_path_buf(),
            partitions: Vec::new(),
        },
        data: vec![StoreConfig {
            name: "data".into(),
            path: data.to_path_buf(),
            partitions: vec![1, 2],
        }],
    };
    Arc::new(PartitionRouter::new(config, RandomPartitioner).unwrap())
}

pub fn file_router(path: &Path) -> Arc<PartitionRouter> {
    Arc::new(
        PartitionRouter::new(StorageConfig::all_in_one(path, 1), RandomPartitioner).unwrap(),
    )
}

/// Services over a static directory: alice on partition 1, bob on 2, sharing
/// a DM whose messages live on partition 2.
pub struct Fixture {
    pub services: ChatServices,
    pub directory: Arc<StaticDirectory>,
    pub alice: AccountId,
    pub bob: AccountId,
    pub dm: ChannelId,
}

pub fn fixture(settings: Settings) -> Fixture {
    fixture_on(split_router(), settings)
}

pub fn fixture_on(router: Arc<PartitionRouter>, settings: Settings) -> Fixture {
    let directory = Arc::new(StaticDirectory::new());
    let (alice, bob) = (user("alice"), user("bob"));
    let dm = ChannelId::new(ChannelKind::Dm, 1, 2);

    directory.set_account_partition(alice.clone(), 1);
    directory.set_account_partition(bob.clone(), 2);
    directory.set_members(dm, vec![alice.clone(), bob.clone()]);

    let services =
        ChatServices::with_directories(router, directory.clone(), directory.clone(), settings);

    Fixture {
        services,
        directory,
        alice,
        bob,
        dm,
    }
}

pub fn core_directory(services: &ChatServices) -> CoreDirectory {
    CoreDirectory::new(services.router().clone())
}

/// A second connection that bumps every participant's version inside a
/// write transaction, holding the write lock until `commit`.
pub struct ConcurrentWriter {
    db: Database,
}

impl ConcurrentWriter {
    pub fn begin(path: &Path) -> Self {
        let db = Database::open(path).unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("BEGIN IMMEDIATE; UPDATE participants SET version = version + 1;")?;
            Ok(())
        })
        .unwrap();
        Self { db }
    }

    pub fn commit(self) {
        self.db
            .with_conn(|conn| {
                conn.execute_batch("COMMIT")?;
                Ok(())
            })
            .unwrap();
    }
}
