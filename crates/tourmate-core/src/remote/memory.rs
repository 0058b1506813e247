use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    ChangeFeed, Filter, Query, RemoteClient, RemoteError, RemoteIdentity, Row, SubscriptionHandle,
};
use crate::models::{ChangeEvent, ChangeKind, Collection};

/// In-process backend with a built-in change feed.
///
/// Writes emit change events to subscribers of the written collection, the
/// same way a realtime backend would. Failures can be injected per
/// collection, and every call is counted so callers can assert on I/O.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<Collection, Vec<Row>>,
    session: Option<RemoteIdentity>,
    failures: HashMap<Collection, Injected>,
    query_delays: HashMap<Collection, VecDeque<Duration>>,
    queries: HashMap<Collection, usize>,
    writes: HashMap<Collection, usize>,
    subscribe_calls: HashMap<Collection, usize>,
    subscriptions: HashMap<u64, (Collection, mpsc::UnboundedSender<ChangeEvent>)>,
    next_handle: u64,
    next_id: u64,
}

struct Injected {
    error: RemoteError,
    /// `None` fails forever.
    remaining: Option<usize>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Setup =====

    pub fn seed(&self, collection: Collection, rows: Vec<Row>) {
        self.state().tables.insert(collection, rows);
    }

    pub fn rows(&self, collection: Collection) -> Vec<Row> {
        self.state()
            .tables
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_session(&self, session: Option<RemoteIdentity>) {
        self.state().session = session;
    }

    /// Sign in as the given backend user.
    pub fn sign_in(&self, user_id: &str) {
        self.set_session(Some(RemoteIdentity {
            user_id: user_id.to_string(),
            email: None,
        }));
    }

    /// Fail every call touching `collection` until cleared.
    pub fn set_failure(&self, collection: Collection, error: RemoteError) {
        self.state().failures.insert(
            collection,
            Injected {
                error,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` calls touching `collection`.
    pub fn fail_next(&self, collection: Collection, error: RemoteError, times: usize) {
        self.state().failures.insert(
            collection,
            Injected {
                error,
                remaining: Some(times),
            },
        );
    }

    pub fn clear_failure(&self, collection: Collection) {
        self.state().failures.remove(&collection);
    }

    /// Delay the completion of the next query on `collection`. Delays queue
    /// up in call order. The query reads its rows before sleeping.
    pub fn delay_next_query(&self, collection: Collection, delay: Duration) {
        self.state()
            .query_delays
            .entry(collection)
            .or_default()
            .push_back(delay);
    }

    /// Push a change event to every subscriber of its collection.
    pub fn emit(&self, event: ChangeEvent) {
        self.state().broadcast(event);
    }

    // ===== Counters =====

    pub fn query_count(&self, collection: Collection) -> usize {
        self.state().queries.get(&collection).copied().unwrap_or(0)
    }

    /// Inserts, upserts, updates and deletes against `collection`.
    pub fn write_count(&self, collection: Collection) -> usize {
        self.state().writes.get(&collection).copied().unwrap_or(0)
    }

    pub fn subscribe_calls(&self, collection: Collection) -> usize {
        self.state()
            .subscribe_calls
            .get(&collection)
            .copied()
            .unwrap_or(0)
    }

    pub fn active_subscriptions(&self, collection: Collection) -> usize {
        self.state()
            .subscriptions
            .values()
            .filter(|(c, _)| *c == collection)
            .count()
    }
}

impl MemoryState {
    fn check_failure(&mut self, collection: Collection) -> Result<(), RemoteError> {
        let Some(injected) = self.failures.get_mut(&collection) else {
            return Ok(());
        };
        let error = injected.error.clone();
        match injected.remaining {
            None => Err(error),
            Some(0) => {
                self.failures.remove(&collection);
                Ok(())
            }
            Some(n) => {
                if n == 1 {
                    self.failures.remove(&collection);
                } else {
                    injected.remaining = Some(n - 1);
                }
                Err(error)
            }
        }
    }

    fn count_write(&mut self, collection: Collection) -> Result<(), RemoteError> {
        *self.writes.entry(collection).or_insert(0) += 1;
        self.check_failure(collection)
    }

    fn broadcast(&mut self, event: ChangeEvent) {
        self.subscriptions
            .retain(|_, (collection, sink)| *collection != event.collection || sink.send(event.clone()).is_ok());
    }

    fn assign_id(&mut self, record: &mut Map<String, Value>) -> String {
        match record.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                self.next_id += 1;
                record.insert("id".to_string(), Value::from(self.next_id));
                self.next_id.to_string()
            }
        }
    }

    fn run_query(&self, query: &Query) -> Vec<Row> {
        let empty = Vec::new();
        let table = self.tables.get(&query.collection).unwrap_or(&empty);

        let mut rows: Vec<Row> = table
            .iter()
            .filter(|row| query.filters.iter().all(|f| f.matches(row)))
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            query
                .order
                .iter()
                .map(|o| {
                    let ord = compare_values(a.get(&o.column), b.get(&o.column));
                    if o.ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                })
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        rows.into_iter()
            .map(|row| {
                let mut out = project(&row, query.columns.as_deref());
                for join in &query.joins {
                    let related = row.get(&join.local_column).and_then(|key| {
                        self.tables.get(&join.collection).and_then(|t| {
                            t.iter()
                                .find(|r| Filter::eq("id", key.clone()).matches(r))
                        })
                    });
                    let embedded = related
                        .map(|r| project(r, Some(join.columns.as_slice())))
                        .unwrap_or(Value::Null);
                    if let Value::Object(ref mut map) = out {
                        map.insert(join.collection.table_name().to_string(), embedded);
                    }
                }
                out
            })
            .collect()
    }
}

fn project(row: &Row, columns: Option<&[String]>) -> Row {
    match (columns, row) {
        (Some(columns), Value::Object(map)) if !columns.iter().any(|c| c == "*") => {
            let picked: Map<String, Value> = columns
                .iter()
                .filter_map(|c| map.get(c).map(|v| (c.clone(), v.clone())))
                .collect();
            Value::Object(picked)
        }
        _ => row.clone(),
    }
}

/// Nulls sort first. Mixed types compare as equal.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.unwrap_or(&Value::Null), b.unwrap_or(&Value::Null)) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn session(&self) -> Option<RemoteIdentity> {
        self.state().session.clone()
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>, RemoteError> {
        let (rows, delay) = {
            let mut state = self.state();
            *state.queries.entry(query.collection).or_insert(0) += 1;
            state.check_failure(query.collection)?;
            let delay = state
                .query_delays
                .get_mut(&query.collection)
                .and_then(VecDeque::pop_front);
            (state.run_query(query), delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        debug!(collection = %query.collection, rows = rows.len(), "Memory query");
        Ok(rows)
    }

    async fn insert(&self, collection: Collection, record: Row) -> Result<Row, RemoteError> {
        let mut state = self.state();
        state.count_write(collection)?;
        let Value::Object(mut map) = record else {
            return Err(RemoteError::Unknown("insert expects an object".to_string()));
        };
        let id = state.assign_id(&mut map);
        let row = Value::Object(map);
        state.tables.entry(collection).or_default().push(row.clone());
        state.broadcast(ChangeEvent::new(collection, ChangeKind::Created, id));
        Ok(row)
    }

    async fn upsert(
        &self,
        collection: Collection,
        record: Row,
        on_conflict: &str,
    ) -> Result<Row, RemoteError> {
        let mut state = self.state();
        state.count_write(collection)?;
        let Value::Object(mut incoming) = record else {
            return Err(RemoteError::Unknown("upsert expects an object".to_string()));
        };

        let key = incoming.get(on_conflict).cloned().unwrap_or(Value::Null);
        let conflict = Filter::eq(on_conflict, key.clone());
        let existing = if key.is_null() {
            None
        } else {
            state
                .tables
                .get_mut(&collection)
                .and_then(|t| t.iter_mut().find(|r| conflict.matches(r)))
        };

        if let Some(Value::Object(existing)) = existing {
            for (k, v) in incoming {
                existing.insert(k, v);
            }
            let merged = Value::Object(existing.clone());
            let id = merged.get("id").map(value_text).unwrap_or_default();
            state.broadcast(ChangeEvent::new(collection, ChangeKind::Updated, id));
            return Ok(merged);
        }

        let id = state.assign_id(&mut incoming);
        let row = Value::Object(incoming);
        state.tables.entry(collection).or_default().push(row.clone());
        state.broadcast(ChangeEvent::new(collection, ChangeKind::Created, id));
        Ok(row)
    }

    async fn update(
        &self,
        collection: Collection,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, RemoteError> {
        let mut state = self.state();
        state.count_write(collection)?;
        let Value::Object(patch) = patch else {
            return Err(RemoteError::Unknown("update expects an object".to_string()));
        };

        let mut updated = Vec::new();
        if let Some(table) = state.tables.get_mut(&collection) {
            for row in table.iter_mut() {
                if !filters.iter().all(|f| f.matches(row)) {
                    continue;
                }
                if let Value::Object(map) = row {
                    for (k, v) in &patch {
                        map.insert(k.clone(), v.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        for row in &updated {
            let id = row.get("id").map(value_text).unwrap_or_default();
            state.broadcast(ChangeEvent::new(collection, ChangeKind::Updated, id));
        }
        Ok(updated)
    }

    async fn delete(&self, collection: Collection, filters: &[Filter]) -> Result<usize, RemoteError> {
        let mut state = self.state();
        state.count_write(collection)?;
        let mut removed = Vec::new();
        if let Some(table) = state.tables.get_mut(&collection) {
            table.retain(|row| {
                if filters.iter().all(|f| f.matches(row)) {
                    removed.push(row.get("id").map(value_text).unwrap_or_default());
                    false
                } else {
                    true
                }
            });
        }
        for id in &removed {
            state.broadcast(ChangeEvent::new(collection, ChangeKind::Deleted, id.clone()));
        }
        Ok(removed.len())
    }
}

#[async_trait]
impl ChangeFeed for MemoryRemote {
    async fn subscribe(
        &self,
        collection: Collection,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<SubscriptionHandle, RemoteError> {
        let mut state = self.state();
        *state.subscribe_calls.entry(collection).or_insert(0) += 1;
        state.next_handle += 1;
        let handle = state.next_handle;
        state.subscriptions.insert(handle, (collection, sink));
        Ok(SubscriptionHandle(handle))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.state().subscriptions.remove(&handle.0);
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
