use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::local::sort_newest_first;
use super::{
    EntitySummary, LedgerError, LocalVisits, ReconcileReport, VisitEntry, VisitStats, VisitStatus,
};
use crate::clock::Clock;
use crate::models::{
    is_local_id, is_valid_rating, Collection, EntityType, VerificationMethod, VisitInput,
    VisitPatch, VisitRecord, LOCAL_USER_ID,
};
use crate::remote::{Filter, Query, RemoteClient, RemoteError, RemoteIdentity, Row};
use crate::store::KeyValueStore;
use crate::utils::local_visit_id;

/// Maximum concurrent uploads while reconciling local visits.
const MAX_CONCURRENT_UPLOADS: usize = 4;

const DESTINATION_JOIN_COLUMNS: &[&str] = &["name", "location", "image_url", "category"];
const DELICACY_JOIN_COLUMNS: &[&str] = &["name", "origin", "image_url", "category"];

pub struct VisitLedger {
    remote: Arc<dyn RemoteClient>,
    local: LocalVisits,
    clock: Arc<dyn Clock>,
}

impl VisitLedger {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            remote,
            local: LocalVisits::new(store),
            clock,
        }
    }

    pub fn local(&self) -> &LocalVisits {
        &self.local
    }

    // ===== Recording =====

    /// Record a visit. Goes to the backend when signed in; any remote failure
    /// (or no session) records it locally instead. Only a local storage
    /// failure is an error.
    pub async fn mark_visited(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        input: VisitInput,
    ) -> Result<VisitRecord, LedgerError> {
        if let Some(rating) = input.rating {
            validate_rating(rating)?;
        }

        let now = self.clock.now();
        let mut record = VisitRecord {
            id: String::new(),
            user_id: String::new(),
            entity_type,
            entity_id: entity_id.to_string(),
            visited_at: now,
            duration_minutes: input.duration_minutes,
            notes: input.notes,
            photos: input.photos,
            rating: input.rating,
            verified: input.verification.verified,
            verification_method: input.verification.method,
            created_at: None,
            updated_at: None,
        };

        if let Some(session) = self.remote.session().await {
            match self.insert_remote(&record, &session.user_id).await {
                Ok(stored) => {
                    info!(visit_id = %stored.id, entity = %entity_type, "Recorded visit remotely");
                    return Ok(stored);
                }
                Err(e) => {
                    warn!(entity = %entity_type, entity_id, error = %e, "Remote visit insert failed, recording locally");
                }
            }
        } else {
            debug!(entity = %entity_type, entity_id, "No backend session, recording visit locally");
        }

        record.id = local_visit_id(now);
        record.user_id = LOCAL_USER_ID.to_string();
        record.created_at = Some(now);
        record.updated_at = Some(now);
        self.local.append(record.clone()).await?;
        Ok(record)
    }

    async fn insert_remote(&self, record: &VisitRecord, user_id: &str) -> Result<VisitRecord, RemoteError> {
        let row = self
            .remote
            .insert(Collection::UserVisits, remote_row(record, user_id))
            .await?;
        parse_record(row)
    }

    // ===== Queries =====

    /// Remote rows merged with any local fallback records, newest first.
    pub async fn has_visited(
        &self,
        entity_id: &str,
        entity_type: EntityType,
    ) -> Result<VisitStatus, LedgerError> {
        let mut visits = self.local.for_entity(entity_id, entity_type).await?;
        if let Some(session) = self.remote.session().await {
            let query = Query::new(Collection::UserVisits)
                .eq("user_id", session.user_id.as_str())
                .eq("entity_id", entity_id)
                .eq("entity_type", entity_type.as_str())
                .order_by("visit_date", false);
            match self.remote.query(&query).await.and_then(parse_records) {
                Ok(remote) => {
                    visits.extend(remote);
                    sort_newest_first(&mut visits);
                }
                Err(e) => warn!(entity_id, error = %e, "Remote visit lookup failed, using local visits"),
            }
        }
        Ok(VisitStatus::from_visits(visits))
    }

    /// Visits newest first, optionally of one entity type. Remote results
    /// carry the joined entity summary; local ones do not.
    pub async fn list_visited(
        &self,
        filter: Option<EntityType>,
    ) -> Result<Vec<VisitEntry>, LedgerError> {
        let mut entries: Vec<VisitEntry> = self
            .local
            .list(filter)
            .await?
            .into_iter()
            .map(|record| VisitEntry {
                record,
                entity: None,
            })
            .collect();
        if let Some(session) = self.remote.session().await {
            match self.list_remote(&session, filter).await {
                Ok(remote) => {
                    entries.extend(remote);
                    entries.sort_by(|a, b| b.record.visited_at.cmp(&a.record.visited_at));
                }
                Err(e) => warn!(error = %e, "Remote visit list failed, using local visits"),
            }
        }
        Ok(entries)
    }

    async fn list_remote(
        &self,
        session: &RemoteIdentity,
        filter: Option<EntityType>,
    ) -> Result<Vec<VisitEntry>, RemoteError> {
        let mut query = Query::new(Collection::UserVisits)
            .eq("user_id", session.user_id.as_str())
            .order_by("visit_date", false)
            .join(Collection::Destinations, "entity_id", DESTINATION_JOIN_COLUMNS)
            .join(Collection::Delicacies, "entity_id", DELICACY_JOIN_COLUMNS);
        if let Some(entity_type) = filter {
            query = query.eq("entity_type", entity_type.as_str());
        }

        self.remote
            .query(&query)
            .await?
            .into_iter()
            .map(|row| -> Result<VisitEntry, RemoteError> {
                let record = parse_record(row.clone())?;
                let joined = match record.entity_type {
                    EntityType::Destination => Collection::Destinations,
                    EntityType::Delicacy => Collection::Delicacies,
                };
                let entity = row
                    .get(joined.table_name())
                    .filter(|v| v.is_object())
                    .and_then(|v| serde_json::from_value::<EntitySummary>(v.clone()).ok());
                Ok(VisitEntry { record, entity })
            })
            .collect()
    }

    /// Visits to one entity across all users. Falls back to the local count.
    pub async fn visit_count(
        &self,
        entity_id: &str,
        entity_type: EntityType,
    ) -> Result<usize, LedgerError> {
        let query = Query::new(Collection::UserVisits)
            .select(&["id"])
            .eq("entity_id", entity_id)
            .eq("entity_type", entity_type.as_str());
        match self.remote.query(&query).await {
            Ok(rows) => Ok(rows.len()),
            Err(e) => {
                warn!(entity_id, error = %e, "Remote visit count failed, counting local visits");
                Ok(self.local.for_entity(entity_id, entity_type).await?.len())
            }
        }
    }

    pub async fn stats(&self) -> Result<VisitStats, LedgerError> {
        let entries = self.list_visited(None).await?;
        let mut stats = VisitStats {
            total: entries.len(),
            ..Default::default()
        };
        for entry in &entries {
            match entry.record.entity_type {
                EntityType::Destination => stats.destinations += 1,
                EntityType::Delicacy => stats.delicacies += 1,
            }
            if entry.record.verified {
                stats.verified += 1;
            }
        }
        Ok(stats)
    }

    // ===== Edits =====

    /// Delete a visit. Local ids never touch the backend.
    pub async fn delete_visit(&self, id: &str) -> Result<(), LedgerError> {
        if is_local_id(id) {
            return self.delete_local(id).await;
        }
        let Some(session) = self.remote.session().await else {
            return self.delete_local(id).await;
        };

        let filters = [
            Filter::eq("id", id),
            Filter::eq("user_id", session.user_id.as_str()),
        ];
        match self.remote.delete(Collection::UserVisits, &filters).await {
            Ok(0) => {
                debug!(visit_id = id, "No remote visit matched, trying local visits");
                self.delete_local(id).await
            }
            Ok(removed) => {
                debug!(visit_id = id, removed, "Deleted remote visit");
                Ok(())
            }
            Err(e) => {
                if self.local.contains(id).await? {
                    warn!(visit_id = id, error = %e, "Remote delete failed, deleting local copy");
                    self.delete_local(id).await
                } else {
                    Err(LedgerError::Remote(e))
                }
            }
        }
    }

    async fn delete_local(&self, id: &str) -> Result<(), LedgerError> {
        if self.local.remove(id).await? {
            Ok(())
        } else {
            Err(LedgerError::NotFound(id.to_string()))
        }
    }

    /// Edit notes, rating, duration or photos of a visit.
    pub async fn update_visit(&self, id: &str, patch: VisitPatch) -> Result<VisitRecord, LedgerError> {
        if patch.is_empty() {
            return Err(LedgerError::Validation("nothing to update".to_string()));
        }
        if let Some(rating) = patch.rating {
            validate_rating(rating)?;
        }

        let now = self.clock.now();
        let mut remote_patch = serde_json::to_value(&patch)
            .map_err(|e| LedgerError::Validation(e.to_string()))?;
        if let Value::Object(ref mut map) = remote_patch {
            map.insert("updated_at".to_string(), json!(now));
        }

        self.modify(id, remote_patch, move |record| {
            patch.apply_to(record);
            record.updated_at = Some(now);
        })
        .await
    }

    /// Mark a visit as corroborated by `method`.
    pub async fn verify_visit(
        &self,
        id: &str,
        method: VerificationMethod,
    ) -> Result<VisitRecord, LedgerError> {
        let now = self.clock.now();
        let remote_patch = json!({
            "is_verified": true,
            "verification_method": method,
            "updated_at": now,
        });
        self.modify(id, remote_patch, move |record| {
            record.verified = true;
            record.verification_method = method;
            record.updated_at = Some(now);
        })
        .await
    }

    async fn modify<F>(&self, id: &str, remote_patch: Row, edit: F) -> Result<VisitRecord, LedgerError>
    where
        F: FnOnce(&mut VisitRecord),
    {
        if is_local_id(id) {
            return self
                .local
                .modify(id, edit)
                .await?
                .ok_or_else(|| LedgerError::NotFound(id.to_string()));
        }

        let session = self
            .remote
            .session()
            .await
            .ok_or(LedgerError::Unauthenticated)?;
        let filters = [
            Filter::eq("id", id),
            Filter::eq("user_id", session.user_id.as_str()),
        ];
        let rows = self
            .remote
            .update(Collection::UserVisits, &filters, remote_patch)
            .await?;
        match rows.into_iter().next() {
            Some(row) => Ok(parse_record(row)?),
            None => Err(LedgerError::NotFound(id.to_string())),
        }
    }

    // ===== Reconciliation =====

    /// Upload local visits under the current session's user. Uploaded
    /// records leave the local ledger; failed ones stay for the next run.
    pub async fn reconcile_local(&self) -> Result<ReconcileReport, LedgerError> {
        let pending = self.local.all().await?;
        let Some(session) = self.remote.session().await else {
            return Ok(ReconcileReport {
                uploaded: 0,
                kept: pending.len(),
            });
        };
        if pending.is_empty() {
            return Ok(ReconcileReport::default());
        }

        let total = pending.len();
        let uploaded: Vec<String> = stream::iter(pending)
            .map(|record| {
                let user_id = session.user_id.clone();
                async move {
                    match self
                        .remote
                        .insert(Collection::UserVisits, remote_row(&record, &user_id))
                        .await
                    {
                        Ok(_) => Some(record.id),
                        Err(e) => {
                            warn!(visit_id = %record.id, error = %e, "Failed to upload local visit");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(MAX_CONCURRENT_UPLOADS)
            .filter_map(|id| async move { id })
            .collect()
            .await;

        let removed = self.local.remove_many(&uploaded).await?;
        info!(uploaded = removed, kept = total - uploaded.len(), "Reconciled local visits");
        Ok(ReconcileReport {
            uploaded: uploaded.len(),
            kept: total - uploaded.len(),
        })
    }
}

fn validate_rating(rating: u8) -> Result<(), LedgerError> {
    if is_valid_rating(rating) {
        Ok(())
    } else {
        Err(LedgerError::Validation(format!(
            "rating must be between 1 and 5, got {}",
            rating
        )))
    }
}

/// Wire shape for a new `user_visits` row. The backend assigns the id and
/// timestamps.
fn remote_row(record: &VisitRecord, user_id: &str) -> Row {
    json!({
        "user_id": user_id,
        "entity_type": record.entity_type,
        "entity_id": record.entity_id,
        "visit_date": record.visited_at,
        "visit_duration": record.duration_minutes,
        "visit_notes": record.notes,
        "photos": record.photos,
        "rating": record.rating,
        "is_verified": record.verified,
        "verification_method": record.verification_method,
    })
}

fn parse_record(row: Row) -> Result<VisitRecord, RemoteError> {
    serde_json::from_value(row)
        .map_err(|e| RemoteError::Unknown(format!("Invalid visit row: {}", e)))
}

fn parse_records(rows: Vec<Row>) -> Result<Vec<VisitRecord>, RemoteError> {
    rows.into_iter().map(parse_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::Verification;
    use crate::remote::MemoryRemote;
    use crate::store::MemoryStore;
    use chrono::Duration;

    struct Fixture {
        remote: Arc<MemoryRemote>,
        clock: Arc<ManualClock>,
        ledger: VisitLedger,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(MemoryRemote::new());
        let clock = Arc::new(ManualClock::starting_now());
        let ledger = VisitLedger::new(remote.clone(), Arc::new(MemoryStore::new()), clock.clone());
        Fixture {
            remote,
            clock,
            ledger,
        }
    }

    fn located() -> VisitInput {
        VisitInput {
            verification: Verification::location(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unauthenticated_mark_is_local_and_listed() {
        let f = fixture();
        let record = f
            .ledger
            .mark_visited("D1", EntityType::Destination, located())
            .await
            .expect("mark");

        assert!(record.id.starts_with("local_"));
        assert_eq!(record.user_id, LOCAL_USER_ID);
        assert_eq!(f.remote.write_count(Collection::UserVisits), 0);

        let listed = f.ledger.list_visited(None).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert!(listed[0].record.verified);
        assert_eq!(listed[0].record.verification_method, VerificationMethod::Location);
        assert!(listed[0].entity.is_none());
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local() {
        let f = fixture();
        f.remote.sign_in("auth-1");
        f.remote.set_failure(
            Collection::UserVisits,
            RemoteError::NotFound("Could not find the table 'public.user_visits'".into()),
        );

        let record = f
            .ledger
            .mark_visited("D1", EntityType::Destination, VisitInput::default())
            .await
            .expect("mark never fails for remote reasons");
        assert!(record.is_local());

        // Reads fall back too.
        let status = f.ledger.has_visited("D1", EntityType::Destination).await.expect("status");
        assert!(status.has_visited);
    }

    #[tokio::test]
    async fn test_signed_in_mark_goes_remote() {
        let f = fixture();
        f.remote.sign_in("auth-1");
        let record = f
            .ledger
            .mark_visited("7", EntityType::Delicacy, VisitInput { rating: Some(4), ..Default::default() })
            .await
            .expect("mark");

        assert!(!record.is_local());
        assert_eq!(record.user_id, "auth-1");
        assert_eq!(record.rating, Some(4));
        assert!(f.ledger.local().all().await.expect("local").is_empty());
    }

    #[tokio::test]
    async fn test_two_marks_are_two_records_newest_first() {
        let f = fixture();
        let first = f
            .ledger
            .mark_visited("D1", EntityType::Destination, VisitInput::default())
            .await
            .expect("first");
        f.clock.advance(Duration::hours(2));
        let second = f
            .ledger
            .mark_visited("D1", EntityType::Destination, VisitInput::default())
            .await
            .expect("second");

        let status = f.ledger.has_visited("D1", EntityType::Destination).await.expect("status");
        assert_eq!(status.visits.len(), 2);
        assert_eq!(status.most_recent.map(|v| v.id), Some(second.id));
        assert_eq!(status.visits[1].id, first.id);

        let other = f.ledger.has_visited("D1", EntityType::Delicacy).await.expect("status");
        assert!(!other.has_visited);
    }

    #[tokio::test]
    async fn test_invalid_rating_rejected_before_io() {
        let f = fixture();
        f.remote.sign_in("auth-1");
        let err = f
            .ledger
            .mark_visited("D1", EntityType::Destination, VisitInput { rating: Some(6), ..Default::default() })
            .await
            .expect_err("rating 6 is invalid");
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(f.remote.write_count(Collection::UserVisits), 0);
        assert!(f.ledger.local().all().await.expect("local").is_empty());
    }

    #[tokio::test]
    async fn test_local_delete_never_calls_remote() {
        let f = fixture();
        let record = f
            .ledger
            .mark_visited("D1", EntityType::Destination, VisitInput::default())
            .await
            .expect("mark");
        f.remote.sign_in("auth-1");

        f.ledger.delete_visit(&record.id).await.expect("delete");
        assert_eq!(f.remote.write_count(Collection::UserVisits), 0);
        assert!(matches!(
            f.ledger.delete_visit(&record.id).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_delete_failure_without_local_copy_fails() {
        let f = fixture();
        f.remote.sign_in("auth-1");
        f.remote.set_failure(Collection::UserVisits, RemoteError::Transient("down".into()));
        let err = f.ledger.delete_visit("42").await.expect_err("nowhere to delete");
        assert!(matches!(err, LedgerError::Remote(RemoteError::Transient(_))));
    }

    #[tokio::test]
    async fn test_remote_delete_scoped_to_user() {
        let f = fixture();
        f.remote.seed(
            Collection::UserVisits,
            vec![
                json!({"id": 1, "user_id": "auth-1", "entity_type": "destination", "entity_id": "D1", "visit_date": "2024-01-01T00:00:00Z"}),
                json!({"id": 2, "user_id": "auth-2", "entity_type": "destination", "entity_id": "D1", "visit_date": "2024-01-01T00:00:00Z"}),
            ],
        );
        f.remote.sign_in("auth-1");
        assert!(matches!(
            f.ledger.delete_visit("2").await,
            Err(LedgerError::NotFound(_))
        ));
        f.ledger.delete_visit("1").await.expect("delete");
        let left: Vec<_> = f.remote.rows(Collection::UserVisits).iter().map(|r| r["id"].clone()).collect();
        assert_eq!(left, vec![json!(2)]);
    }

    #[tokio::test]
    async fn test_remote_delete_of_unknown_id_fails() {
        let f = fixture();
        f.remote.sign_in("auth-1");
        let err = f.ledger.delete_visit("999").await.expect_err("id exists nowhere");
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert_eq!(f.remote.write_count(Collection::UserVisits), 1);
    }

    #[tokio::test]
    async fn test_signed_in_reads_include_local_fallback() {
        let f = fixture();
        f.remote.sign_in("auth-1");
        let remote = f
            .ledger
            .mark_visited("A", EntityType::Destination, VisitInput::default())
            .await
            .expect("remote mark");
        f.clock.advance(Duration::hours(1));
        f.remote.fail_next(Collection::UserVisits, RemoteError::Transient("blip".into()), 1);
        let local = f
            .ledger
            .mark_visited("A", EntityType::Destination, VisitInput::default())
            .await
            .expect("local mark");
        assert!(local.is_local());

        let status = f.ledger.has_visited("A", EntityType::Destination).await.expect("status");
        assert!(status.has_visited);
        assert_eq!(status.most_recent.map(|v| v.id), Some(local.id.clone()));
        assert_eq!(status.visits.len(), 2);
        assert_eq!(status.visits[1].id, remote.id);

        let listed = f.ledger.list_visited(None).await.expect("list");
        let ids: Vec<_> = listed.iter().map(|e| e.record.id.clone()).collect();
        assert_eq!(ids, vec![local.id, remote.id]);
    }

    #[tokio::test]
    async fn test_list_remote_joins_entity() {
        let f = fixture();
        f.remote.seed(
            Collection::Delicacies,
            vec![json!({"id": 3, "name": "Dried Mangoes", "origin": "Cebu", "category": "Snack"})],
        );
        f.remote.sign_in("auth-1");
        f.ledger
            .mark_visited("3", EntityType::Delicacy, VisitInput::default())
            .await
            .expect("mark");

        let listed = f.ledger.list_visited(Some(EntityType::Delicacy)).await.expect("list");
        assert_eq!(listed.len(), 1);
        let entity = listed[0].entity.clone().expect("joined entity");
        assert_eq!(entity.name.as_deref(), Some("Dried Mangoes"));
        assert_eq!(entity.location.as_deref(), Some("Cebu"));

        assert!(f.ledger.list_visited(Some(EntityType::Destination)).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_update_and_verify_local_visit() {
        let f = fixture();
        let record = f
            .ledger
            .mark_visited("D1", EntityType::Destination, VisitInput::default())
            .await
            .expect("mark");
        f.clock.advance(Duration::minutes(10));

        let updated = f
            .ledger
            .update_visit(&record.id, VisitPatch { notes: Some("Great view".into()), ..Default::default() })
            .await
            .expect("update");
        assert_eq!(updated.notes.as_deref(), Some("Great view"));
        assert_eq!(updated.updated_at, Some(f.clock.now()));

        let verified = f
            .ledger
            .verify_visit(&record.id, VerificationMethod::Location)
            .await
            .expect("verify");
        assert!(verified.verified);
        assert_eq!(verified.notes.as_deref(), Some("Great view"));

        assert!(matches!(
            f.ledger.update_visit(&record.id, VisitPatch::default()).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_update_requires_session() {
        let f = fixture();
        let err = f
            .ledger
            .verify_visit("42", VerificationMethod::Location)
            .await
            .expect_err("no session");
        assert!(matches!(err, LedgerError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_remote_verify_updates_row() {
        let f = fixture();
        f.remote.sign_in("auth-1");
        let record = f
            .ledger
            .mark_visited("D1", EntityType::Destination, VisitInput::default())
            .await
            .expect("mark");
        let verified = f
            .ledger
            .verify_visit(&record.id, VerificationMethod::Location)
            .await
            .expect("verify");
        assert!(verified.verified);
        assert_eq!(f.remote.rows(Collection::UserVisits)[0]["is_verified"], json!(true));
    }

    #[tokio::test]
    async fn test_visit_count_and_stats() {
        let f = fixture();
        f.ledger
            .mark_visited("D1", EntityType::Destination, located())
            .await
            .expect("mark");
        f.ledger
            .mark_visited("D1", EntityType::Destination, VisitInput::default())
            .await
            .expect("mark");
        f.ledger
            .mark_visited("C1", EntityType::Delicacy, VisitInput::default())
            .await
            .expect("mark");

        // The backend has none, so the remote count answers zero.
        assert_eq!(f.ledger.visit_count("D1", EntityType::Destination).await.expect("count"), 0);
        f.remote.set_failure(Collection::UserVisits, RemoteError::Transient("down".into()));
        assert_eq!(f.ledger.visit_count("D1", EntityType::Destination).await.expect("count"), 2);

        let stats = f.ledger.stats().await.expect("stats");
        assert_eq!(
            stats,
            VisitStats {
                total: 3,
                destinations: 2,
                delicacies: 1,
                verified: 1
            }
        );
    }

    #[tokio::test]
    async fn test_reconcile_uploads_and_keeps_failures() {
        let f = fixture();
        for id in ["D1", "D2"] {
            f.ledger
                .mark_visited(id, EntityType::Destination, VisitInput::default())
                .await
                .expect("mark");
        }

        let report = f.ledger.reconcile_local().await.expect("reconcile");
        assert_eq!(report, ReconcileReport { uploaded: 0, kept: 2 });

        f.remote.sign_in("auth-9");
        f.remote.fail_next(Collection::UserVisits, RemoteError::Transient("blip".into()), 1);
        let report = f.ledger.reconcile_local().await.expect("reconcile");
        assert_eq!(report, ReconcileReport { uploaded: 1, kept: 1 });
        assert_eq!(f.ledger.local().all().await.expect("local").len(), 1);

        let report = f.ledger.reconcile_local().await.expect("reconcile");
        assert_eq!(report, ReconcileReport { uploaded: 1, kept: 0 });
        let rows = f.remote.rows(Collection::UserVisits);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["user_id"] == "auth-9"));
    }
}
