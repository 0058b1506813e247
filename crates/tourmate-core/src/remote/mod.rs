//! Backend client contract and implementations.
//!
//! The core talks to the managed database through two traits:
//!
//! - [`RemoteClient`]: request/response queries and writes
//! - [`ChangeFeed`]: per-collection change notifications
//!
//! Shipped implementations:
//! - [`PostgrestClient`]: REST client for a PostgREST-style backend
//! - [`PollingFeed`]: change feed built on periodic snapshot diffs
//! - [`MemoryRemote`]: in-process backend used by tests and offline demos

pub mod credentials;
pub mod error;
pub mod memory;
pub mod poll;
pub mod postgrest;
pub mod session;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::models::{ChangeEvent, Collection};

pub use credentials::CredentialStore;
pub use error::RemoteError;
pub use memory::MemoryRemote;
pub use poll::PollingFeed;
pub use postgrest::PostgrestClient;
pub use session::{Session, SessionData};

/// A backend row. Always a JSON object.
pub type Row = Value;

/// Equality filter on a column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether a row satisfies this filter. Numbers and strings compare by
    /// their text so `"3"` matches `3`.
    pub fn matches(&self, row: &Row) -> bool {
        match row.get(&self.column) {
            Some(actual) => values_equal(actual, &self.value),
            None => self.value.is_null(),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::Number(y)) | (Value::Number(y), Value::String(x)) => {
            *x == y.to_string()
        }
        _ => a == b,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Embed related rows from another collection, keyed by a local column
/// holding the other row's id. Rows with no match embed `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub collection: Collection,
    pub local_column: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: Collection,
    /// `None` selects every column.
    pub columns: Option<Vec<String>>,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
    pub joins: Vec<Join>,
}

impl Query {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            columns: None,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            joins: Vec::new(),
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn join(mut self, collection: Collection, local_column: &str, columns: &[&str]) -> Self {
        self.joins.push(Join {
            collection,
            local_column: local_column.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }
}

/// The authenticated backend user, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub user_id: String,
    pub email: Option<String>,
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// The backend user this client acts as. `None` when signed out or the
    /// session has expired.
    async fn session(&self) -> Option<RemoteIdentity>;

    async fn query(&self, query: &Query) -> Result<Vec<Row>, RemoteError>;

    /// Insert one row and return it as stored (server-issued id included).
    async fn insert(&self, collection: Collection, record: Row) -> Result<Row, RemoteError>;

    /// Insert or merge on the `on_conflict` column.
    async fn upsert(
        &self,
        collection: Collection,
        record: Row,
        on_conflict: &str,
    ) -> Result<Row, RemoteError>;

    /// Patch every matching row and return the updated rows.
    async fn update(
        &self,
        collection: Collection,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, RemoteError>;

    /// Delete every matching row and return how many went.
    async fn delete(&self, collection: Collection, filters: &[Filter]) -> Result<usize, RemoteError>;
}

/// Opaque token for one upstream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Start delivering change events for a collection into `sink`.
    async fn subscribe(
        &self,
        collection: Collection,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<SubscriptionHandle, RemoteError>;

    /// Stop a subscription. Unknown handles are ignored.
    async fn unsubscribe(&self, handle: SubscriptionHandle);
}
