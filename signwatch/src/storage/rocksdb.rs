//! RocksDB-backed database.
//!
//! Data is split across dedicated column families:
//!
//! - `"blocks"`:    `chain \0 height(be)` -> bincode block,
//! - `"snapshots"`: `chain` -> bincode snapshot (last committed only),
//! - `"notifiers"`: `chain \0 operator \0 reporter \0 user_id` -> bincode notifier.
//!
//! Heights are non-negative, so their big-endian encoding sorts the block
//! keys of a chain by height.

use std::collections::BTreeMap;
use std::path::Path;

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::{Deserialize, Serialize};

use crate::state::Snapshot;
use crate::types::{Block, Height};

use super::{Database, Notifier, StorageError, decode, encode};

const CF_BLOCKS: &str = "blocks";
const CF_SNAPSHOTS: &str = "snapshots";
const CF_NOTIFIERS: &str = "notifiers";

/// Configuration for [`RocksDbDatabase`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDbConfig {
    /// Filesystem path to the RocksDB database directory.
    pub path: String,
    /// Whether to create the database and missing column families if they
    /// do not yet exist.
    pub create_if_missing: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "data/signwatch-db".to_string(),
            create_if_missing: true,
        }
    }
}

/// RocksDB-backed implementation of [`Database`].
pub struct RocksDbDatabase {
    db: DB,
}

impl RocksDbDatabase {
    /// Opens (or creates) the database at the configured path.
    pub fn open(cfg: &RocksDbConfig) -> Result<Self, StorageError> {
        let path = Path::new(&cfg.path);

        let mut opts = Options::default();
        opts.create_if_missing(cfg.create_if_missing);
        opts.create_missing_column_families(cfg.create_if_missing);

        let cfs = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_SNAPSHOTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_NOTIFIERS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self { db })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or(StorageError::MissingColumnFamily(name))
    }

    /// Collects every `(key, value)` pair in `cf` whose key starts with `prefix`.
    fn scan_prefix(
        &self,
        cf: &ColumnFamily,
        prefix: &[u8],
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StorageError> {
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }
}

fn chain_prefix(chain: &str) -> Vec<u8> {
    let mut key = chain.as_bytes().to_vec();
    key.push(0);
    key
}

fn block_key(chain: &str, height: Height) -> Vec<u8> {
    let mut key = chain_prefix(chain);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn height_from_key(key: &[u8]) -> Option<Height> {
    let tail: [u8; 8] = key.get(key.len().checked_sub(8)?..)?.try_into().ok()?;
    Some(Height::from_be_bytes(tail))
}

fn notifier_prefix(chain: &str, operator_address: &str, reporter: &str) -> Vec<u8> {
    let mut key = chain_prefix(chain);
    key.extend_from_slice(operator_address.as_bytes());
    key.push(0);
    key.extend_from_slice(reporter.as_bytes());
    key.push(0);
    key
}

fn notifier_key(notifier: &Notifier) -> Vec<u8> {
    let mut key = notifier_prefix(&notifier.chain, &notifier.operator_address, &notifier.reporter);
    key.extend_from_slice(notifier.user_id.as_bytes());
    key
}

impl Database for RocksDbDatabase {
    fn insert_block(&self, chain: &str, block: &Block) -> Result<(), StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        let key = block_key(chain, block.height);

        if self.db.get_pinned_cf(cf, &key)?.is_some() {
            return Ok(());
        }

        self.db.put_cf(cf, key, encode("block", block)?)?;
        Ok(())
    }

    fn get_all_blocks(&self, chain: &str) -> Result<BTreeMap<Height, Block>, StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        let mut blocks = BTreeMap::new();

        for (key, value) in self.scan_prefix(cf, &chain_prefix(chain))? {
            let Some(height) = height_from_key(&key) else {
                continue;
            };
            let block: Block = decode("block", &value)?;
            blocks.insert(height, block);
        }

        Ok(blocks)
    }

    fn trim_blocks_before(&self, chain: &str, height: Height) -> Result<(), StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        let mut batch = WriteBatch::default();

        for (key, _) in self.scan_prefix(cf, &chain_prefix(chain))? {
            match height_from_key(&key) {
                Some(h) if h <= height => batch.delete_cf(cf, key),
                // Keys are height-ordered, nothing past this point qualifies.
                Some(_) => break,
                None => {}
            }
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn get_last_snapshot(&self, chain: &str) -> Result<Option<Snapshot>, StorageError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        match self.db.get_pinned_cf(cf, chain.as_bytes())? {
            None => Ok(None),
            Some(bytes) => Ok(Some(decode("snapshot", &bytes)?)),
        }
    }

    fn set_snapshot(&self, chain: &str, snapshot: &Snapshot) -> Result<(), StorageError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        self.db
            .put_cf(cf, chain.as_bytes(), encode("snapshot", snapshot)?)?;
        Ok(())
    }

    fn insert_notifier(&self, notifier: &Notifier) -> Result<bool, StorageError> {
        let cf = self.cf(CF_NOTIFIERS)?;
        let key = notifier_key(notifier);

        if self.db.get_pinned_cf(cf, &key)?.is_some() {
            return Ok(false);
        }

        self.db.put_cf(cf, key, encode("notifier", notifier)?)?;
        Ok(true)
    }

    fn remove_notifier(&self, notifier: &Notifier) -> Result<bool, StorageError> {
        let cf = self.cf(CF_NOTIFIERS)?;
        let key = notifier_key(notifier);

        if self.db.get_pinned_cf(cf, &key)?.is_none() {
            return Ok(false);
        }

        self.db.delete_cf(cf, key)?;
        Ok(true)
    }

    fn get_notifiers(
        &self,
        chain: &str,
        operator_address: &str,
        reporter: &str,
    ) -> Result<Vec<Notifier>, StorageError> {
        let cf = self.cf(CF_NOTIFIERS)?;
        let prefix = notifier_prefix(chain, operator_address, reporter);

        self.scan_prefix(cf, &prefix)?
            .into_iter()
            .map(|(_, value)| decode("notifier", &value))
            .collect()
    }
}
