use thiserror::Error;

use crate::storage::StorageError;
use crate::types::Height;

/// Errors returned by the state layer.
#[derive(Debug, Error)]
pub enum StateError {
    /// No block at all is stored in the requested window.
    #[error("no blocks stored in the {window} heights up to {latest}")]
    NoBlocksInWindow { latest: Height, window: i64 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}
