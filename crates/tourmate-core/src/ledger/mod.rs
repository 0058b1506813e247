//! Visit ledger: "user visited X" facts, remote-first with a durable local
//! fallback.
//!
//! Records written without a backend session, or while the backend is
//! failing, get a `local_` id and live in the local store until
//! [`VisitLedger::reconcile_local`] uploads them.

pub mod local;
pub mod visits;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::VisitRecord;
use crate::remote::RemoteError;
use crate::store::StoreError;

pub use local::LocalVisits;
pub use visits::VisitLedger;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid visit: {0}")]
    Validation(String),

    #[error("Visit not found: {0}")]
    NotFound(String),

    #[error("Not signed in to the backend")]
    Unauthenticated,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Answer to "has the user been here?".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitStatus {
    pub has_visited: bool,
    pub most_recent: Option<VisitRecord>,
    /// Newest first.
    pub visits: Vec<VisitRecord>,
}

impl VisitStatus {
    pub fn from_visits(visits: Vec<VisitRecord>) -> Self {
        Self {
            has_visited: !visits.is_empty(),
            most_recent: visits.first().cloned(),
            visits,
        }
    }
}

/// Display fields of the visited destination or delicacy, embedded by the
/// backend join.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntitySummary {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "origin")]
    pub location: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisitEntry {
    pub record: VisitRecord,
    /// `None` for local records and for rows whose entity no longer exists.
    pub entity: Option<EntitySummary>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VisitStats {
    pub total: usize,
    pub destinations: usize,
    pub delicacies: usize,
    pub verified: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub uploaded: usize,
    pub kept: usize,
}
