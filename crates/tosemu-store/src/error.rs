use std::collections::TryReserveError;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("hash table needs at least one bucket")]
    ZeroBuckets,

    /// An allocation needed to complete the operation failed. The table is
    /// unchanged.
    #[error("out of memory while growing hash table storage")]
    OutOfMemory,
}

impl From<TryReserveError> for StoreError {
    fn from(_: TryReserveError) -> Self {
        StoreError::OutOfMemory
    }
}
