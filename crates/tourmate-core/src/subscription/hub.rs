use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::CacheInvalidator;
use crate::models::{ChangeEvent, Collection};
use crate::remote::{ChangeFeed, RemoteError, SubscriptionHandle};

/// Callback listener. Runs on the hub's pump task and must not block.
pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Returned by subscribe, consumed by unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    collection: Collection,
    id: u64,
}

impl SubscriptionToken {
    pub fn collection(&self) -> Collection {
        self.collection
    }
}

#[derive(Clone)]
enum Sink {
    Callback(Listener),
    Channel(mpsc::UnboundedSender<ChangeEvent>),
}

struct Upstream {
    handle: SubscriptionHandle,
    pump: JoinHandle<()>,
}

/// Idle while `upstream` is `None`, Subscribed otherwise.
#[derive(Default)]
struct CollectionState {
    upstream: Option<Upstream>,
    listeners: Vec<(u64, Sink)>,
}

type States = Arc<Mutex<HashMap<Collection, CollectionState>>>;

pub struct SubscriptionHub {
    feed: Arc<dyn ChangeFeed>,
    invalidators: HashMap<Collection, Arc<dyn CacheInvalidator>>,
    states: States,
    next_token: AtomicU64,
}

impl SubscriptionHub {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        invalidators: HashMap<Collection, Arc<dyn CacheInvalidator>>,
    ) -> Self {
        Self {
            feed,
            invalidators,
            states: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register a callback for changes to `collection`, opening the upstream
    /// subscription if this is the first listener.
    pub async fn subscribe<F>(
        &self,
        collection: Collection,
        listener: F,
    ) -> Result<SubscriptionToken, RemoteError>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.add(collection, Sink::Callback(Arc::new(listener))).await
    }

    /// Like [`subscribe`](Self::subscribe) but delivers into a channel. The
    /// listener is dropped on the first event after the receiver goes away.
    pub async fn subscribe_channel(
        &self,
        collection: Collection,
    ) -> Result<(SubscriptionToken, mpsc::UnboundedReceiver<ChangeEvent>), RemoteError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.add(collection, Sink::Channel(tx)).await?;
        Ok((token, rx))
    }

    async fn add(&self, collection: Collection, sink: Sink) -> Result<SubscriptionToken, RemoteError> {
        // Held across the upstream subscribe so concurrent first listeners
        // cannot open two subscriptions.
        let mut states = self.states.lock().await;
        let state = states.entry(collection).or_default();

        if state.upstream.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            let handle = self.feed.subscribe(collection, tx).await?;
            let pump = tokio::spawn(pump(
                collection,
                rx,
                Arc::clone(&self.states),
                self.invalidators.get(&collection).cloned(),
                Arc::clone(&self.feed),
            ));
            state.upstream = Some(Upstream { handle, pump });
            info!(collection = %collection, "Opened upstream subscription");
        }

        let id = self.next_token.fetch_add(1, Ordering::Relaxed);
        state.listeners.push((id, sink));
        debug!(collection = %collection, listeners = state.listeners.len(), "Listener added");
        Ok(SubscriptionToken { collection, id })
    }

    /// Remove a listener. The last one out closes the upstream subscription.
    /// Returns whether the token was still registered.
    pub async fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut states = self.states.lock().await;
        let Some(state) = states.get_mut(&token.collection) else {
            return false;
        };

        let before = state.listeners.len();
        state.listeners.retain(|(id, _)| *id != token.id);
        let removed = state.listeners.len() != before;

        if state.listeners.is_empty() {
            if let Some(upstream) = state.upstream.take() {
                upstream.pump.abort();
                self.feed.unsubscribe(upstream.handle).await;
                info!(collection = %token.collection, "Closed upstream subscription");
            }
        }
        removed
    }

    /// Drop every listener and close every upstream subscription.
    pub async fn shutdown(&self) {
        let mut states = self.states.lock().await;
        for (collection, state) in states.iter_mut() {
            state.listeners.clear();
            if let Some(upstream) = state.upstream.take() {
                upstream.pump.abort();
                self.feed.unsubscribe(upstream.handle).await;
                info!(collection = %collection, "Closed upstream subscription");
            }
        }
    }

    pub async fn listener_count(&self, collection: Collection) -> usize {
        self.states
            .lock()
            .await
            .get(&collection)
            .map(|s| s.listeners.len())
            .unwrap_or(0)
    }

    pub async fn is_subscribed(&self, collection: Collection) -> bool {
        self.states
            .lock()
            .await
            .get(&collection)
            .map(|s| s.upstream.is_some())
            .unwrap_or(false)
    }
}

/// Per-collection event loop: invalidate, then fan out to a snapshot of the
/// listeners taken without holding the lock during delivery.
async fn pump(
    collection: Collection,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    states: States,
    invalidator: Option<Arc<dyn CacheInvalidator>>,
    feed: Arc<dyn ChangeFeed>,
) {
    while let Some(event) = events.recv().await {
        if let Some(ref invalidator) = invalidator {
            invalidator.invalidate();
        }

        let sinks: Vec<(u64, Sink)> = states
            .lock()
            .await
            .get(&collection)
            .map(|s| s.listeners.clone())
            .unwrap_or_default();

        let mut dead = Vec::new();
        for (id, sink) in &sinks {
            match sink {
                Sink::Callback(listener) => {
                    if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                        error!(collection = %collection, listener = *id, kind = %event.kind, "Change listener panicked");
                    }
                }
                Sink::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        dead.push(*id);
                    }
                }
            }
        }

        if dead.is_empty() {
            continue;
        }

        let mut guard = states.lock().await;
        let Some(state) = guard.get_mut(&collection) else {
            continue;
        };
        state.listeners.retain(|(id, _)| !dead.contains(id));
        debug!(collection = %collection, pruned = dead.len(), "Dropped closed channel listeners");
        if state.listeners.is_empty() {
            if let Some(upstream) = state.upstream.take() {
                feed.unsubscribe(upstream.handle).await;
                info!(collection = %collection, "Closed upstream subscription");
                return;
            }
        }
    }
    warn!(collection = %collection, "Upstream change feed ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeKind;
    use crate::remote::MemoryRemote;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    async fn wait_for(cond: impl Fn() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn event(id: &str) -> ChangeEvent {
        ChangeEvent::new(Collection::Destinations, ChangeKind::Updated, id)
    }

    struct RecordingInvalidator(Arc<StdMutex<Vec<String>>>);

    impl CacheInvalidator for RecordingInvalidator {
        fn invalidate(&self) {
            self.0.lock().expect("log").push("invalidate".to_string());
        }
    }

    #[tokio::test]
    async fn test_one_upstream_per_collection() {
        let remote = Arc::new(MemoryRemote::new());
        let hub = SubscriptionHub::new(remote.clone(), HashMap::new());

        let a = hub.subscribe(Collection::Destinations, |_| {}).await.expect("a");
        let b = hub.subscribe(Collection::Destinations, |_| {}).await.expect("b");
        let (c, _rx) = hub.subscribe_channel(Collection::Destinations).await.expect("c");
        assert_eq!(remote.subscribe_calls(Collection::Destinations), 1);
        assert_eq!(hub.listener_count(Collection::Destinations).await, 3);
        assert!(hub.is_subscribed(Collection::Destinations).await);

        assert!(hub.unsubscribe(a).await);
        assert!(hub.unsubscribe(b).await);
        assert_eq!(remote.active_subscriptions(Collection::Destinations), 1);
        assert!(hub.unsubscribe(c).await);
        assert_eq!(remote.active_subscriptions(Collection::Destinations), 0);
        assert!(!hub.is_subscribed(Collection::Destinations).await);
        assert!(!hub.unsubscribe(c).await);

        hub.subscribe(Collection::Destinations, |_| {}).await.expect("again");
        assert_eq!(remote.subscribe_calls(Collection::Destinations), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_subscribers_share_upstream() {
        let remote = Arc::new(MemoryRemote::new());
        let hub = SubscriptionHub::new(remote.clone(), HashMap::new());
        let (a, b) = tokio::join!(
            hub.subscribe(Collection::Delicacies, |_| {}),
            hub.subscribe(Collection::Delicacies, |_| {}),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(remote.subscribe_calls(Collection::Delicacies), 1);
    }

    #[tokio::test]
    async fn test_invalidation_precedes_listeners() {
        let remote = Arc::new(MemoryRemote::new());
        let log = Arc::new(StdMutex::new(Vec::new()));
        let mut invalidators: HashMap<Collection, Arc<dyn CacheInvalidator>> = HashMap::new();
        invalidators.insert(
            Collection::Destinations,
            Arc::new(RecordingInvalidator(log.clone())),
        );
        let hub = SubscriptionHub::new(remote.clone(), invalidators);

        let listener_log = log.clone();
        hub.subscribe(Collection::Destinations, move |e| {
            listener_log.lock().expect("log").push(format!("listener {}", e.affected_id));
        })
        .await
        .expect("subscribe");

        remote.emit(event("7"));
        wait_for(|| log.lock().expect("log").len() == 2).await;
        assert_eq!(*log.lock().expect("log"), vec!["invalidate", "listener 7"]);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_stop_others() {
        let remote = Arc::new(MemoryRemote::new());
        let hub = SubscriptionHub::new(remote.clone(), HashMap::new());
        let seen = Arc::new(AtomicUsize::new(0));

        hub.subscribe(Collection::Destinations, |_| panic!("listener bug"))
            .await
            .expect("panicky");
        let counter = seen.clone();
        hub.subscribe(Collection::Destinations, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("healthy");

        remote.emit(event("1"));
        remote.emit(event("2"));
        wait_for(|| seen.load(Ordering::SeqCst) == 2).await;
        assert!(hub.is_subscribed(Collection::Destinations).await);
    }

    #[tokio::test]
    async fn test_channel_listener_receives_and_is_pruned() {
        let remote = Arc::new(MemoryRemote::new());
        let hub = SubscriptionHub::new(remote.clone(), HashMap::new());

        let (_token, mut rx) = hub.subscribe_channel(Collection::Destinations).await.expect("sub");
        remote.emit(event("3"));
        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timely")
            .expect("open");
        assert_eq!(got.affected_id, "3");

        drop(rx);
        remote.emit(event("4"));
        for _ in 0..400 {
            if !hub.is_subscribed(Collection::Destinations).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(hub.listener_count(Collection::Destinations).await, 0);
        assert_eq!(remote.active_subscriptions(Collection::Destinations), 0);
    }

    #[tokio::test]
    async fn test_events_for_other_collections_are_ignored() {
        let remote = Arc::new(MemoryRemote::new());
        let hub = SubscriptionHub::new(remote.clone(), HashMap::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        hub.subscribe(Collection::Delicacies, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("sub");

        remote.emit(event("1"));
        remote.emit(ChangeEvent::new(Collection::Delicacies, ChangeKind::Created, "9"));
        wait_for(|| seen.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
