//! Item repository — the durable store behind the orchestrator.
//!
//! All stage-status mutation goes through the lease protocol here:
//! `claim_batch` stamps a claim token, `commit` / `record_failure` /
//! `release` verify it. A write that finds the token gone reports
//! `LeaseLost` and changes nothing.

use std::time::Duration;

use rusqlite::{params, Row};
use uuid::Uuid;

use crate::pipeline::error::ErrorKind;
use crate::pipeline::retry::RetryDecision;
use crate::stage::{Stage, Status};

use super::{now_ts, ts_after, ts_before, Database, DatabaseError};

/// A raw item row from the database.
#[derive(Debug, Clone)]
pub struct ItemRow {
    pub identifier: String,
    pub metadata: Option<String>,
    pub status: Status,
    pub page_ref: Option<String>,
    pub media_paths: Option<String>,
    pub extracted_text: Option<String>,
    pub translated_text: Option<String>,
    pub published_ref: Option<String>,
    pub fetch_attempts: u32,
    pub media_attempts: u32,
    pub extract_attempts: u32,
    pub translate_attempts: u32,
    pub publish_attempts: u32,
    pub last_error_kind: Option<String>,
    pub last_error: Option<String>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<String>,
    pub retry_after: Option<String>,
    pub written_back_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let raw_status: i64 = row.get("stage_status")?;
        let status = Status::from_i64(raw_status).ok_or_else(|| {
            rusqlite::Error::IntegralValueOutOfRange(0, raw_status)
        })?;
        Ok(Self {
            identifier: row.get("identifier")?,
            metadata: row.get("metadata")?,
            status,
            page_ref: row.get("page_ref")?,
            media_paths: row.get("media_paths")?,
            extracted_text: row.get("extracted_text")?,
            translated_text: row.get("translated_text")?,
            published_ref: row.get("published_ref")?,
            fetch_attempts: row.get("fetch_attempts")?,
            media_attempts: row.get("media_attempts")?,
            extract_attempts: row.get("extract_attempts")?,
            translate_attempts: row.get("translate_attempts")?,
            publish_attempts: row.get("publish_attempts")?,
            last_error_kind: row.get("last_error_kind")?,
            last_error: row.get("last_error")?,
            claimed_by: row.get("claimed_by")?,
            claimed_at: row.get("claimed_at")?,
            retry_after: row.get("retry_after")?,
            written_back_at: row.get("written_back_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Failure count recorded for the given stage.
    pub fn attempts(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Fetch => self.fetch_attempts,
            Stage::MediaAcquire => self.media_attempts,
            Stage::TextExtract => self.extract_attempts,
            Stage::Translate => self.translate_attempts,
            Stage::Publish => self.publish_attempts,
        }
    }

    /// Payload reference produced by the given stage, if committed.
    pub fn payload(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Fetch => self.page_ref.as_deref(),
            Stage::MediaAcquire => self.media_paths.as_deref(),
            Stage::TextExtract => self.extracted_text.as_deref(),
            Stage::Translate => self.translated_text.as_deref(),
            Stage::Publish => self.published_ref.as_deref(),
        }
    }
}

/// Outcome of dedup-guarded creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was created.
    Created,
    /// The identifier was already known; nothing changed.
    Existing,
}

/// Items claimed in one batch, all under the same claim token.
#[derive(Debug)]
pub struct ClaimedBatch {
    pub token: String,
    pub items: Vec<ItemRow>,
}

/// Outcome of an operator reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Reset,
    /// A live lease is outstanding; retry after it expires.
    Busy,
    NotFound,
    /// Target must be a non-terminal ladder status.
    InvalidTarget,
}

/// Creates an item for a newly discovered identifier. Re-discovery of a
/// known identifier is a no-op (the dedup guard).
pub fn insert_discovered(
    db: &Database,
    identifier: &str,
    metadata: Option<&str>,
) -> Result<InsertOutcome, DatabaseError> {
    db.with_conn(|conn| {
        let now = now_ts();
        let changed = conn.execute(
            "INSERT INTO items (identifier, metadata, stage_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(identifier) DO NOTHING",
            params![identifier, metadata, Status::Discovered.as_i64(), now],
        )?;
        Ok(if changed > 0 {
            InsertOutcome::Created
        } else {
            InsertOutcome::Existing
        })
    })
}

/// Finds an item by its identifier.
pub fn find(db: &Database, identifier: &str) -> Result<Option<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM items WHERE identifier = ?1")?;
        let mut rows = stmt.query_map(params![identifier], ItemRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Counts items eligible for the given stage right now: correct input
/// status, no live lease, backoff elapsed.
pub fn eligible_count(
    db: &Database,
    stage: Stage,
    lease_timeout: Duration,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let now = now_ts();
        let lease_cutoff = ts_before(lease_timeout);
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM items
             WHERE stage_status = ?1
               AND (claimed_by IS NULL OR claimed_at < ?2)
               AND (retry_after IS NULL OR retry_after <= ?3)",
            params![stage.input_status().as_i64(), lease_cutoff, now],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Atomically claims up to `limit` eligible items for the given stage,
/// oldest `created_at` first. Exactly one caller can claim a given item
/// while its lease is live; an expired lease is reclaimable.
pub fn claim_batch(
    db: &Database,
    stage: Stage,
    limit: usize,
    lease_timeout: Duration,
) -> Result<ClaimedBatch, DatabaseError> {
    let token = Uuid::new_v4().to_string();
    if limit == 0 {
        return Ok(ClaimedBatch {
            token,
            items: Vec::new(),
        });
    }

    db.with_conn(|conn| {
        let now = now_ts();
        let lease_cutoff = ts_before(lease_timeout);

        // Single statement: SQLite executes it atomically, so two
        // concurrent claimers can never stamp the same row.
        conn.execute(
            "UPDATE items
             SET claimed_by = ?1, claimed_at = ?2, updated_at = ?2
             WHERE identifier IN (
                 SELECT identifier FROM items
                 WHERE stage_status = ?3
                   AND (claimed_by IS NULL OR claimed_at < ?4)
                   AND (retry_after IS NULL OR retry_after <= ?2)
                 ORDER BY created_at ASC, identifier ASC
                 LIMIT ?5
             )
             AND (claimed_by IS NULL OR claimed_at < ?4)",
            params![
                token,
                now,
                stage.input_status().as_i64(),
                lease_cutoff,
                limit as i64
            ],
        )?;

        let mut stmt = conn.prepare(
            "SELECT * FROM items WHERE claimed_by = ?1 ORDER BY created_at ASC, identifier ASC",
        )?;
        let items: Vec<ItemRow> = stmt
            .query_map(params![token], ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ClaimedBatch {
            token: token.clone(),
            items,
        })
    })
}

/// Persists a stage's payload and advances the status in one guarded,
/// durable write. Fails with `LeaseLost` if the caller no longer holds
/// the lease; the payload is then discarded.
pub fn commit(
    db: &Database,
    identifier: &str,
    token: &str,
    stage: Stage,
    payload: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            &format!(
                "UPDATE items
                 SET {} = ?1, stage_status = ?2, last_error = NULL,
                     last_error_kind = NULL, retry_after = NULL,
                     claimed_by = NULL, claimed_at = NULL, updated_at = ?3
                 WHERE identifier = ?4 AND claimed_by = ?5",
                stage.payload_column()
            ),
            params![
                payload,
                stage.output_status().as_i64(),
                now_ts(),
                identifier,
                token
            ],
        )?;
        if changed == 0 {
            return Err(DatabaseError::LeaseLost {
                identifier: identifier.to_string(),
            });
        }
        Ok(())
    })
}

/// Records a classified stage failure per the retry decision: either
/// keep the item at its current status with a backoff window, or park
/// it as invalid. The failing attempt is counted in both cases. Guarded
/// by the claim token like `commit`.
pub fn record_failure(
    db: &Database,
    identifier: &str,
    token: &str,
    stage: Stage,
    kind: ErrorKind,
    message: &str,
    decision: &RetryDecision,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let attempt_col = stage.attempt_column();
        let changed = match decision {
            RetryDecision::Retry { delay } => conn.execute(
                &format!(
                    "UPDATE items
                     SET {col} = {col} + 1, last_error_kind = ?1, last_error = ?2,
                         retry_after = ?3, claimed_by = NULL, claimed_at = NULL,
                         updated_at = ?4
                     WHERE identifier = ?5 AND claimed_by = ?6",
                    col = attempt_col
                ),
                params![
                    kind.as_str(),
                    message,
                    ts_after(*delay),
                    now_ts(),
                    identifier,
                    token
                ],
            )?,
            RetryDecision::Fail => conn.execute(
                &format!(
                    "UPDATE items
                     SET {col} = {col} + 1, stage_status = ?1, last_error_kind = ?2,
                         last_error = ?3, retry_after = NULL, claimed_by = NULL,
                         claimed_at = NULL, updated_at = ?4
                     WHERE identifier = ?5 AND claimed_by = ?6",
                    col = attempt_col
                ),
                params![
                    Status::Invalid.as_i64(),
                    kind.as_str(),
                    message,
                    now_ts(),
                    identifier,
                    token
                ],
            )?,
        };
        if changed == 0 {
            return Err(DatabaseError::LeaseLost {
                identifier: identifier.to_string(),
            });
        }
        Ok(())
    })
}

/// Clears the lease without recording anything.
pub fn release(db: &Database, identifier: &str, token: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE items
             SET claimed_by = NULL, claimed_at = NULL, updated_at = ?1
             WHERE identifier = ?2 AND claimed_by = ?3",
            params![now_ts(), identifier, token],
        )?;
        Ok(())
    })
}

/// Operator-level parking of an item, outside the lease protocol.
pub fn mark_invalid(db: &Database, identifier: &str, reason: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE items
             SET stage_status = ?1, last_error_kind = NULL, last_error = ?2,
                 retry_after = NULL, claimed_by = NULL, claimed_at = NULL,
                 updated_at = ?3
             WHERE identifier = ?4",
            params![Status::Invalid.as_i64(), reason, now_ts(), identifier],
        )?;
        Ok(())
    })
}

/// Operator recovery: rewinds an item to `target`, clearing payload refs
/// and attempt counters for every stage at or after that point, plus all
/// error and backoff state. Refuses while a live lease is outstanding so
/// it stays safe to run against an active orchestrator. Idempotent.
pub fn reset(
    db: &Database,
    identifier: &str,
    target: Status,
    lease_timeout: Duration,
) -> Result<ResetOutcome, DatabaseError> {
    if target.next_stage().is_none() {
        return Ok(ResetOutcome::InvalidTarget);
    }

    let changed = db.with_conn(|conn| {
        let lease_cutoff = ts_before(lease_timeout);

        let mut sets = vec![
            "stage_status = ?1".to_string(),
            "last_error = NULL".to_string(),
            "last_error_kind = NULL".to_string(),
            "retry_after = NULL".to_string(),
            "claimed_by = NULL".to_string(),
            "claimed_at = NULL".to_string(),
            "written_back_at = NULL".to_string(),
            "updated_at = ?2".to_string(),
        ];
        for stage in Stage::ALL {
            if stage.input_status() >= target {
                sets.push(format!("{} = NULL", stage.payload_column()));
                sets.push(format!("{} = 0", stage.attempt_column()));
            }
        }

        let changed = conn.execute(
            &format!(
                "UPDATE items SET {}
                 WHERE identifier = ?3
                   AND (claimed_by IS NULL OR claimed_at < ?4)",
                sets.join(", ")
            ),
            params![target.as_i64(), now_ts(), identifier, lease_cutoff],
        )?;
        Ok(changed)
    })?;

    if changed > 0 {
        log::info!("Item '{}' reset to status '{}'", identifier, target);
        return Ok(ResetOutcome::Reset);
    }
    match find(db, identifier)? {
        Some(_) => Ok(ResetOutcome::Busy),
        None => Ok(ResetOutcome::NotFound),
    }
}

/// Counts items at the given status.
pub fn count_by_status(db: &Database, status: Status) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE stage_status = ?1",
            params![status.as_i64()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Published items whose result pointer has not been written back yet.
pub fn pending_write_back(db: &Database) -> Result<Vec<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM items
             WHERE stage_status = ?1
               AND published_ref IS NOT NULL
               AND written_back_at IS NULL
             ORDER BY created_at ASC",
        )?;
        let items: Vec<ItemRow> = stmt
            .query_map(params![Status::Published.as_i64()], ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    })
}

/// Marks the write-back of the publish pointer as done.
pub fn mark_written_back(db: &Database, identifier: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE items SET written_back_at = ?1, updated_at = ?1 WHERE identifier = ?2",
            params![now_ts(), identifier],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(600);

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn seed(db: &Database, identifier: &str, created_at: &str) {
        insert_discovered(db, identifier, None).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE items SET created_at = ?1 WHERE identifier = ?2",
                params![created_at, identifier],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_insert_is_deduplicated() {
        let db = test_db();
        assert_eq!(
            insert_discovered(&db, "url-1", Some("{\"record_id\":\"r1\"}")).unwrap(),
            InsertOutcome::Created
        );
        assert_eq!(
            insert_discovered(&db, "url-1", None).unwrap(),
            InsertOutcome::Existing
        );

        let item = find(&db, "url-1").unwrap().unwrap();
        assert_eq!(item.status, Status::Discovered);
        // First discovery wins; metadata is not overwritten.
        assert_eq!(item.metadata.as_deref(), Some("{\"record_id\":\"r1\"}"));
        assert_eq!(count_by_status(&db, Status::Discovered).unwrap(), 1);
    }

    #[test]
    fn test_claim_oldest_first() {
        let db = test_db();
        seed(&db, "newer", "2026-02-01T00:00:00.000000Z");
        seed(&db, "older", "2026-01-01T00:00:00.000000Z");

        let batch = claim_batch(&db, Stage::Fetch, 1, LEASE).unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].identifier, "older");
    }

    #[test]
    fn test_claim_skips_leased_items() {
        let db = test_db();
        seed(&db, "only", "2026-01-01T00:00:00.000000Z");

        let first = claim_batch(&db, Stage::Fetch, 5, LEASE).unwrap();
        assert_eq!(first.items.len(), 1);

        let second = claim_batch(&db, Stage::Fetch, 5, LEASE).unwrap();
        assert!(second.items.is_empty());
        assert_eq!(eligible_count(&db, Stage::Fetch, LEASE).unwrap(), 0);
    }

    #[test]
    fn test_expired_lease_is_reclaimable() {
        let db = test_db();
        seed(&db, "stale", "2026-01-01T00:00:00.000000Z");

        claim_batch(&db, Stage::Fetch, 1, LEASE).unwrap();
        // Age the lease past the timeout.
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE items SET claimed_at = '2020-01-01T00:00:00.000000Z'",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let batch = claim_batch(&db, Stage::Fetch, 1, LEASE).unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].identifier, "stale");
    }

    #[test]
    fn test_concurrent_claims_have_single_winner() {
        let db = test_db();
        seed(&db, "contested", "2026-01-01T00:00:00.000000Z");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            handles.push(std::thread::spawn(move || {
                claim_batch(&db, Stage::Fetch, 1, LEASE).unwrap().items.len()
            }));
        }

        let won: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(won, 1);
    }

    #[test]
    fn test_commit_advances_and_clears_error_state() {
        let db = test_db();
        seed(&db, "item", "2026-01-01T00:00:00.000000Z");

        let batch = claim_batch(&db, Stage::Fetch, 1, LEASE).unwrap();
        commit(&db, "item", &batch.token, Stage::Fetch, "{\"page_path\":\"p.html\"}").unwrap();

        let item = find(&db, "item").unwrap().unwrap();
        assert_eq!(item.status, Status::Fetched);
        assert_eq!(item.page_ref.as_deref(), Some("{\"page_path\":\"p.html\"}"));
        assert!(item.claimed_by.is_none());
        assert!(item.last_error.is_none());
        assert_eq!(item.fetch_attempts, 0);
    }

    #[test]
    fn test_commit_without_lease_is_rejected() {
        let db = test_db();
        seed(&db, "item", "2026-01-01T00:00:00.000000Z");

        let result = commit(&db, "item", "bogus-token", Stage::Fetch, "payload");
        assert!(matches!(result, Err(DatabaseError::LeaseLost { .. })));

        // Nothing changed.
        let item = find(&db, "item").unwrap().unwrap();
        assert_eq!(item.status, Status::Discovered);
        assert!(item.page_ref.is_none());
    }

    #[test]
    fn test_record_failure_retry_counts_and_backs_off() {
        let db = test_db();
        seed(&db, "item", "2026-01-01T00:00:00.000000Z");

        let batch = claim_batch(&db, Stage::Fetch, 1, LEASE).unwrap();
        record_failure(
            &db,
            "item",
            &batch.token,
            Stage::Fetch,
            ErrorKind::RetryableRemote,
            "connection timed out",
            &RetryDecision::Retry {
                delay: Duration::from_secs(3600),
            },
        )
        .unwrap();

        let item = find(&db, "item").unwrap().unwrap();
        assert_eq!(item.status, Status::Discovered);
        assert_eq!(item.fetch_attempts, 1);
        assert_eq!(item.last_error_kind.as_deref(), Some("retryable_remote"));
        assert!(item.claimed_by.is_none());
        // Backoff window not yet elapsed — item is not eligible.
        assert_eq!(eligible_count(&db, Stage::Fetch, LEASE).unwrap(), 0);
    }

    #[test]
    fn test_record_failure_fail_parks_item() {
        let db = test_db();
        seed(&db, "gone", "2026-01-01T00:00:00.000000Z");

        let batch = claim_batch(&db, Stage::Fetch, 1, LEASE).unwrap();
        record_failure(
            &db,
            "gone",
            &batch.token,
            Stage::Fetch,
            ErrorKind::ConfirmedAbsent,
            "remote says 404",
            &RetryDecision::Fail,
        )
        .unwrap();

        let item = find(&db, "gone").unwrap().unwrap();
        assert_eq!(item.status, Status::Invalid);
        assert_eq!(item.fetch_attempts, 1);
        // Error stays visible for operator triage.
        assert_eq!(item.last_error.as_deref(), Some("remote says 404"));
        assert_eq!(eligible_count(&db, Stage::Fetch, LEASE).unwrap(), 0);
    }

    #[test]
    fn test_release_clears_lease_only() {
        let db = test_db();
        seed(&db, "item", "2026-01-01T00:00:00.000000Z");

        let batch = claim_batch(&db, Stage::Fetch, 1, LEASE).unwrap();
        release(&db, "item", &batch.token).unwrap();

        let item = find(&db, "item").unwrap().unwrap();
        assert!(item.claimed_by.is_none());
        assert_eq!(item.status, Status::Discovered);
        assert_eq!(item.fetch_attempts, 0);
        assert_eq!(eligible_count(&db, Stage::Fetch, LEASE).unwrap(), 1);
    }

    #[test]
    fn test_reset_rewinds_and_clears() {
        let db = test_db();
        seed(&db, "item", "2026-01-01T00:00:00.000000Z");

        // Walk the item to Fetched, then fail MediaAcquire permanently.
        let batch = claim_batch(&db, Stage::Fetch, 1, LEASE).unwrap();
        commit(&db, "item", &batch.token, Stage::Fetch, "page-payload").unwrap();
        let batch = claim_batch(&db, Stage::MediaAcquire, 1, LEASE).unwrap();
        record_failure(
            &db,
            "item",
            &batch.token,
            Stage::MediaAcquire,
            ErrorKind::UnexpectedContent,
            "boom",
            &RetryDecision::Fail,
        )
        .unwrap();
        assert_eq!(find(&db, "item").unwrap().unwrap().status, Status::Invalid);

        let outcome = reset(&db, "item", Status::Discovered, LEASE).unwrap();
        assert_eq!(outcome, ResetOutcome::Reset);

        let item = find(&db, "item").unwrap().unwrap();
        assert_eq!(item.status, Status::Discovered);
        assert!(item.page_ref.is_none());
        assert_eq!(item.fetch_attempts, 0);
        assert_eq!(item.media_attempts, 0);
        assert!(item.last_error.is_none());
        // Re-claimable for the first stage again.
        assert_eq!(eligible_count(&db, Stage::Fetch, LEASE).unwrap(), 1);
    }

    #[test]
    fn test_reset_to_midpoint_keeps_earlier_payloads() {
        let db = test_db();
        seed(&db, "item", "2026-01-01T00:00:00.000000Z");

        let batch = claim_batch(&db, Stage::Fetch, 1, LEASE).unwrap();
        commit(&db, "item", &batch.token, Stage::Fetch, "page-payload").unwrap();
        let batch = claim_batch(&db, Stage::MediaAcquire, 1, LEASE).unwrap();
        commit(&db, "item", &batch.token, Stage::MediaAcquire, "[\"a.jpg\"]").unwrap();

        reset(&db, "item", Status::Fetched, LEASE).unwrap();

        let item = find(&db, "item").unwrap().unwrap();
        assert_eq!(item.status, Status::Fetched);
        assert_eq!(item.page_ref.as_deref(), Some("page-payload"));
        assert!(item.media_paths.is_none());
    }

    #[test]
    fn test_reset_refuses_live_lease() {
        let db = test_db();
        seed(&db, "item", "2026-01-01T00:00:00.000000Z");
        claim_batch(&db, Stage::Fetch, 1, LEASE).unwrap();

        let outcome = reset(&db, "item", Status::Discovered, LEASE).unwrap();
        assert_eq!(outcome, ResetOutcome::Busy);
    }

    #[test]
    fn test_reset_unknown_and_invalid_target() {
        let db = test_db();
        assert_eq!(
            reset(&db, "missing", Status::Discovered, LEASE).unwrap(),
            ResetOutcome::NotFound
        );
        seed(&db, "item", "2026-01-01T00:00:00.000000Z");
        assert_eq!(
            reset(&db, "item", Status::Published, LEASE).unwrap(),
            ResetOutcome::InvalidTarget
        );
        assert_eq!(
            reset(&db, "item", Status::Invalid, LEASE).unwrap(),
            ResetOutcome::InvalidTarget
        );
    }

    #[test]
    fn test_reset_is_idempotent() {
        let db = test_db();
        seed(&db, "item", "2026-01-01T00:00:00.000000Z");
        let batch = claim_batch(&db, Stage::Fetch, 1, LEASE).unwrap();
        commit(&db, "item", &batch.token, Stage::Fetch, "page").unwrap();

        assert_eq!(
            reset(&db, "item", Status::Discovered, LEASE).unwrap(),
            ResetOutcome::Reset
        );
        assert_eq!(
            reset(&db, "item", Status::Discovered, LEASE).unwrap(),
            ResetOutcome::Reset
        );
        let item = find(&db, "item").unwrap().unwrap();
        assert_eq!(item.status, Status::Discovered);
    }

    #[test]
    fn test_mark_invalid_outside_lease() {
        let db = test_db();
        seed(&db, "item", "2026-01-01T00:00:00.000000Z");

        mark_invalid(&db, "item", "operator parked").unwrap();

        let item = find(&db, "item").unwrap().unwrap();
        assert_eq!(item.status, Status::Invalid);
        assert_eq!(item.last_error.as_deref(), Some("operator parked"));
    }

    #[test]
    fn test_pending_write_back_flow() {
        let db = test_db();
        seed(&db, "item", "2026-01-01T00:00:00.000000Z");

        // Walk the item all the way to Published.
        for stage in Stage::ALL {
            let batch = claim_batch(&db, stage, 1, LEASE).unwrap();
            commit(&db, "item", &batch.token, stage, "payload").unwrap();
        }

        let pending = pending_write_back(&db).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].identifier, "item");

        mark_written_back(&db, "item").unwrap();
        assert!(pending_write_back(&db).unwrap().is_empty());
    }

    #[test]
    fn test_attempts_and_payload_accessors() {
        let db = test_db();
        seed(&db, "item", "2026-01-01T00:00:00.000000Z");
        let batch = claim_batch(&db, Stage::Fetch, 1, LEASE).unwrap();
        commit(&db, "item", &batch.token, Stage::Fetch, "page").unwrap();

        let item = find(&db, "item").unwrap().unwrap();
        assert_eq!(item.payload(Stage::Fetch), Some("page"));
        assert_eq!(item.payload(Stage::MediaAcquire), None);
        assert_eq!(item.attempts(Stage::Fetch), 0);
    }
}
