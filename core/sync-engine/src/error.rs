//! FILENAME: core/sync-engine/src/error.rs

use thiserror::Error;
use engine::EngineError;
use persistence::StoreError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Reconciler has shut down")]
    Closed,
}

pub type SyncResult<T> = Result<T, SyncError>;
