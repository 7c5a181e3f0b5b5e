//! Persistence backends for the monitor.
//!
//! This module defines the [`Database`] trait the state layer writes
//! through to, and provides two implementations:
//!
//! - an in-memory store ([`mem::InMemoryDatabase`]) suitable for tests and
//!   ephemeral deployments,
//! - a RocksDB-backed store ([`rocksdb::RocksDbDatabase`]) for monitors
//!   that should keep their window and last snapshot across restarts.
//!
//! Every write is idempotent by natural key: blocks by (chain, height),
//! notifiers by (chain, operator, reporter, user). Inserting a block for a
//! height that is already stored keeps the first value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::Snapshot;
use crate::types::{Block, Height};

pub mod mem;
pub mod rocksdb;

pub use mem::InMemoryDatabase;
pub use rocksdb::{RocksDbConfig, RocksDbDatabase};

/// Storage-level error type.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying RocksDB error.
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] ::rocksdb::Error),
    /// Required column family was not found.
    #[error("missing column family {0:?}")]
    MissingColumnFamily(&'static str),
    #[error("failed to encode {what}: {message}")]
    Encode { what: &'static str, message: String },
    #[error("failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },
}

/// A user subscribed to reports about one validator through one reporter.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Notifier {
    pub chain: String,
    pub operator_address: String,
    /// Name of the reporter the user is reachable through.
    pub reporter: String,
    pub user_id: String,
    pub user_name: String,
}

/// Abstract persistence interface used by the state layer and reporters.
///
/// Implementations must be safe to call from many tasks at once and must
/// do their own locking; callers never wrap them in an extra lock.
pub trait Database: Send + Sync {
    /// Stores a block unless one already exists at its height.
    fn insert_block(&self, chain: &str, block: &Block) -> Result<(), StorageError>;

    /// Loads every stored block for `chain`.
    fn get_all_blocks(&self, chain: &str) -> Result<BTreeMap<Height, Block>, StorageError>;

    /// Deletes every block at or below `height` for `chain`.
    fn trim_blocks_before(&self, chain: &str, height: Height) -> Result<(), StorageError>;

    fn get_last_snapshot(&self, chain: &str) -> Result<Option<Snapshot>, StorageError>;

    fn set_snapshot(&self, chain: &str, snapshot: &Snapshot) -> Result<(), StorageError>;

    /// Adds a notifier. Returns `false` if it was already subscribed.
    fn insert_notifier(&self, notifier: &Notifier) -> Result<bool, StorageError>;

    /// Removes a notifier. Returns `false` if it was not subscribed.
    fn remove_notifier(&self, notifier: &Notifier) -> Result<bool, StorageError>;

    fn get_notifiers(
        &self,
        chain: &str,
        operator_address: &str,
        reporter: &str,
    ) -> Result<Vec<Notifier>, StorageError>;
}

pub(crate) fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        StorageError::Encode {
            what,
            message: e.to_string(),
        }
    })
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    what: &'static str,
    bytes: &[u8],
) -> Result<T, StorageError> {
    let (value, _): (T, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard()).map_err(|e| {
            StorageError::Decode {
                what,
                message: e.to_string(),
            }
        })?;
    Ok(value)
}
