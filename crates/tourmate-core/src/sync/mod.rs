//! Background mirror of local writes to the backend.
//!
//! Local state is committed first; the matching remote write is queued on
//! the [`Reconciler`] and retried there, so a slow or failing backend never
//! blocks or rolls back the local commit. Visits recorded offline are not
//! queued here: they stay in the local ledger until
//! [`VisitLedger::reconcile_local`](crate::ledger::VisitLedger::reconcile_local)
//! uploads and removes them.

pub mod reconciler;

use serde_json::Value;
use thiserror::Error;

use crate::models::Collection;
use crate::remote::RemoteError;

pub use reconciler::Reconciler;

/// One remote write waiting to be mirrored.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncJob {
    Upsert {
        collection: Collection,
        record: Value,
        on_conflict: String,
    },
}

impl SyncJob {
    pub fn collection(&self) -> Collection {
        match self {
            SyncJob::Upsert { collection, .. } => *collection,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            SyncJob::Upsert { .. } => "upsert",
        }
    }
}

/// A job that was given up on.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncFailure {
    pub job: SyncJob,
    pub attempts: u32,
    pub last_error: RemoteError,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Reconciler worker has stopped")]
    Stopped,
}
