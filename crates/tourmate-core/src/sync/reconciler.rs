use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::{SyncError, SyncFailure, SyncJob};
use crate::remote::{RemoteClient, RemoteError};

enum SyncMessage {
    Job(SyncJob),
    /// Answered once every job queued before it has finished.
    Flush(oneshot::Sender<()>),
}

/// Single-worker job queue with retry and dead letters.
///
/// Transient failures are retried with exponential backoff up to
/// `max_attempts`; any other failure is dead-lettered at once. Dead letters
/// are kept in memory and exposed through [`failures`](Self::failures).
pub struct Reconciler {
    tx: mpsc::UnboundedSender<SyncMessage>,
    failures: Arc<Mutex<Vec<SyncFailure>>>,
}

impl Reconciler {
    /// Start the worker. Must be called from within a tokio runtime.
    pub fn spawn(remote: Arc<dyn RemoteClient>, max_attempts: u32, initial_backoff: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let failures = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(worker(
            rx,
            remote,
            max_attempts.max(1),
            initial_backoff,
            Arc::clone(&failures),
        ));
        Self { tx, failures }
    }

    pub fn enqueue(&self, job: SyncJob) -> Result<(), SyncError> {
        debug!(collection = %job.collection(), op = job.operation(), "Queued sync job");
        self.tx
            .send(SyncMessage::Job(job))
            .map_err(|_| SyncError::Stopped)
    }

    /// Wait until every job queued so far has succeeded or been
    /// dead-lettered.
    pub async fn flush(&self) -> Result<(), SyncError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(SyncMessage::Flush(done_tx))
            .map_err(|_| SyncError::Stopped)?;
        done_rx.await.map_err(|_| SyncError::Stopped)
    }

    pub fn failures(&self) -> Vec<SyncFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return the dead letters, e.g. to re-enqueue them.
    pub fn take_failures(&self) -> Vec<SyncFailure> {
        std::mem::take(&mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<SyncMessage>,
    remote: Arc<dyn RemoteClient>,
    max_attempts: u32,
    initial_backoff: Duration,
    failures: Arc<Mutex<Vec<SyncFailure>>>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            SyncMessage::Flush(done) => {
                let _ = done.send(());
            }
            SyncMessage::Job(job) => {
                if let Some(failure) =
                    run_with_retry(remote.as_ref(), job, max_attempts, initial_backoff).await
                {
                    error!(
                        collection = %failure.job.collection(),
                        op = failure.job.operation(),
                        attempts = failure.attempts,
                        error = %failure.last_error,
                        "Sync job dead-lettered"
                    );
                    failures
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(failure);
                }
            }
        }
    }
    debug!("Reconciler worker stopped");
}

async fn run_once(remote: &dyn RemoteClient, job: &SyncJob) -> Result<(), RemoteError> {
    match job {
        SyncJob::Upsert {
            collection,
            record,
            on_conflict,
        } => {
            remote.upsert(*collection, record.clone(), on_conflict).await?;
        }
    }
    Ok(())
}

/// Returns the dead letter if the job never succeeded.
async fn run_with_retry(
    remote: &dyn RemoteClient,
    job: SyncJob,
    max_attempts: u32,
    initial_backoff: Duration,
) -> Option<SyncFailure> {
    let mut backoff = initial_backoff;
    let mut attempts = 0;
    loop {
        attempts += 1;
        match run_once(remote, &job).await {
            Ok(()) => {
                debug!(collection = %job.collection(), op = job.operation(), attempts, "Sync job done");
                return None;
            }
            Err(e) if e.is_transient() && attempts < max_attempts => {
                warn!(
                    collection = %job.collection(),
                    attempt = attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Sync job failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                return Some(SyncFailure {
                    job,
                    attempts,
                    last_error: e,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Collection;
    use crate::remote::MemoryRemote;
    use serde_json::json;

    fn profile_job(name: &str) -> SyncJob {
        SyncJob::Upsert {
            collection: Collection::Users,
            record: json!({"auth_user_id": "a1", "name": name}),
            on_conflict: "auth_user_id".to_string(),
        }
    }

    fn reconciler(remote: &Arc<MemoryRemote>) -> Reconciler {
        Reconciler::spawn(remote.clone(), 3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_job_applied_in_order() {
        let remote = Arc::new(MemoryRemote::new());
        let sync = reconciler(&remote);
        sync.enqueue(profile_job("Ana")).expect("enqueue");
        sync.enqueue(profile_job("Ana Reyes")).expect("enqueue");
        sync.flush().await.expect("flush");

        let rows = remote.rows(Collection::Users);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Ana Reyes");
        assert!(sync.failures().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_next(Collection::Users, RemoteError::Transient("503".into()), 2);
        let sync = reconciler(&remote);
        sync.enqueue(profile_job("Ana")).expect("enqueue");
        sync.flush().await.expect("flush");

        assert_eq!(remote.write_count(Collection::Users), 3);
        assert_eq!(remote.rows(Collection::Users).len(), 1);
        assert!(sync.failures().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_failure(Collection::Users, RemoteError::Transient("503".into()));
        let sync = reconciler(&remote);
        sync.enqueue(profile_job("Ana")).expect("enqueue");
        sync.flush().await.expect("flush");

        let failures = sync.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 3);
        assert_eq!(failures[0].job, profile_job("Ana"));
        assert_eq!(remote.write_count(Collection::Users), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_failure(Collection::Users, RemoteError::Unauthorized("JWT expired".into()));
        let sync = reconciler(&remote);
        sync.enqueue(profile_job("Ana")).expect("enqueue");
        sync.flush().await.expect("flush");

        assert_eq!(remote.write_count(Collection::Users), 1);
        let failures = sync.take_failures();
        assert_eq!(failures[0].attempts, 1);
        assert!(matches!(failures[0].last_error, RemoteError::Unauthorized(_)));
        assert!(sync.failures().is_empty());
    }
}
