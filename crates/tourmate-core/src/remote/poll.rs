use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ChangeFeed, Query, RemoteClient, RemoteError, Row, SubscriptionHandle};
use crate::models::{ChangeEvent, ChangeKind, Collection};

/// id -> updated_at for every row seen in one poll.
pub type Snapshot = BTreeMap<String, Option<String>>;

/// Change feed for backends without push notifications.
///
/// Each subscription runs a background task that fetches `id, updated_at`
/// for the whole collection every interval and diffs it against the
/// previous poll. The first poll only establishes a baseline.
pub struct PollingFeed {
    client: Arc<dyn RemoteClient>,
    interval: Duration,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_handle: AtomicU64,
}

impl PollingFeed {
    pub fn new(client: Arc<dyn RemoteClient>, interval: Duration) -> Self {
        Self {
            client,
            interval,
            tasks: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn active_polls(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|t| !t.is_finished())
            .count()
    }
}

async fn fetch_snapshot(
    client: &dyn RemoteClient,
    collection: Collection,
) -> Result<Snapshot, RemoteError> {
    let rows = client
        .query(&Query::new(collection).select(&["id", "updated_at"]))
        .await?;
    Ok(snapshot_from_rows(&rows))
}

pub fn snapshot_from_rows(rows: &[Row]) -> Snapshot {
    rows.iter()
        .filter_map(|row| {
            let id = match row.get("id")? {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => return None,
            };
            let updated = row
                .get("updated_at")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            Some((id, updated))
        })
        .collect()
}

/// Events that turn `previous` into `current`: new ids are created, missing
/// ids deleted, and ids whose `updated_at` moved are updated.
pub fn diff_snapshots(
    collection: Collection,
    previous: &Snapshot,
    current: &Snapshot,
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for (id, stamp) in current {
        match previous.get(id) {
            None => events.push(ChangeEvent::new(collection, ChangeKind::Created, id.clone())),
            Some(old) if old != stamp => {
                events.push(ChangeEvent::new(collection, ChangeKind::Updated, id.clone()))
            }
            Some(_) => {}
        }
    }
    for id in previous.keys() {
        if !current.contains_key(id) {
            events.push(ChangeEvent::new(collection, ChangeKind::Deleted, id.clone()));
        }
    }
    events
}

async fn poll_loop(
    client: Arc<dyn RemoteClient>,
    collection: Collection,
    interval: Duration,
    sink: mpsc::UnboundedSender<ChangeEvent>,
) {
    let mut previous: Option<Snapshot> = None;
    loop {
        match fetch_snapshot(client.as_ref(), collection).await {
            Ok(current) => {
                if let Some(ref prev) = previous {
                    for event in diff_snapshots(collection, prev, &current) {
                        if sink.send(event).is_err() {
                            debug!(collection = %collection, "Poll receiver gone, stopping");
                            return;
                        }
                    }
                }
                previous = Some(current);
            }
            Err(e) => {
                warn!(collection = %collection, error = %e, "Change poll failed");
            }
        }
        if sink.is_closed() {
            return;
        }
        tokio::time::sleep(interval).await;
    }
}

#[async_trait]
impl ChangeFeed for PollingFeed {
    async fn subscribe(
        &self,
        collection: Collection,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<SubscriptionHandle, RemoteError> {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.client),
            collection,
            self.interval,
            sink,
        ));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task);
        info!(collection = %collection, interval_secs = self.interval.as_secs(), "Started change poll");
        Ok(SubscriptionHandle(id))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.0);
        if let Some(task) = task {
            task.abort();
            info!(handle = handle.0, "Stopped change poll");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use serde_json::json;

    fn snap(entries: &[(&str, &str)]) -> Snapshot {
        entries
            .iter()
            .map(|(id, ts)| (id.to_string(), Some(ts.to_string())))
            .collect()
    }

    #[test]
    fn test_diff_snapshots() {
        let prev = snap(&[("1", "a"), ("2", "a"), ("3", "a")]);
        let curr = snap(&[("1", "a"), ("2", "b"), ("4", "a")]);

        let events = diff_snapshots(Collection::Destinations, &prev, &curr);
        let summary: Vec<_> = events
            .iter()
            .map(|e| (e.kind, e.affected_id.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (ChangeKind::Updated, "2"),
                (ChangeKind::Created, "4"),
                (ChangeKind::Deleted, "3"),
            ]
        );
    }

    #[test]
    fn test_identical_snapshots_produce_nothing() {
        let s = snap(&[("1", "a")]);
        assert!(diff_snapshots(Collection::Delicacies, &s, &s).is_empty());
    }

    #[test]
    fn test_snapshot_from_rows_accepts_numeric_ids() {
        let rows = vec![
            json!({"id": 7, "updated_at": "2024-01-01T00:00:00Z"}),
            json!({"id": "x", "updated_at": null}),
            json!({"name": "no id"}),
        ];
        let s = snapshot_from_rows(&rows);
        assert_eq!(s.len(), 2);
        assert_eq!(s.get("7"), Some(&Some("2024-01-01T00:00:00Z".to_string())));
        assert_eq!(s.get("x"), Some(&None));
    }

    #[tokio::test]
    async fn test_poll_reports_new_rows() {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed(Collection::Destinations, vec![json!({"id": 1, "updated_at": "t0"})]);

        let feed = PollingFeed::new(remote.clone(), Duration::from_millis(10));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = feed.subscribe(Collection::Destinations, tx).await.expect("subscribe");

        // Let the baseline poll run before changing the table.
        tokio::time::sleep(Duration::from_millis(30)).await;
        remote.seed(
            Collection::Destinations,
            vec![json!({"id": 1, "updated_at": "t0"}), json!({"id": 2, "updated_at": "t1"})],
        );

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        assert_eq!(event, ChangeEvent::new(Collection::Destinations, ChangeKind::Created, "2"));

        feed.unsubscribe(handle).await;
        assert_eq!(feed.active_polls(), 0);
    }
}
