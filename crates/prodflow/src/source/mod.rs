//! The external task source: where identifiers come from and where the
//! published result pointer is written back.

use log::{info, warn};
use thiserror::Error;

use crate::db::item_repo::{self, InsertOutcome};
use crate::db::Database;
use crate::error::ProdflowError;

pub mod catalog;

pub use catalog::CatalogSource;

/// One record offered by the task source.
#[derive(Debug, Clone)]
pub struct DiscoveredItem {
    /// The product page URL — the pipeline's unique item key.
    pub identifier: String,
    /// Source-side context carried along for the write-back, stored as
    /// JSON on the item row.
    pub metadata: Option<String>,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from task source: {0}")]
    UnexpectedResponse(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::error::ConfigError),
}

/// Contract with the hosted record source. Reads a batch of cleared
/// records; optionally receives the publish pointer back, once per
/// identifier, idempotent if repeated.
pub trait TaskSource: Send + Sync {
    fn discover(&self) -> Result<Vec<DiscoveredItem>, SourceError>;

    fn write_back(
        &self,
        identifier: &str,
        metadata: Option<&str>,
        published_ref: &str,
    ) -> Result<(), SourceError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DiscoveryReport {
    /// Records the source returned.
    pub seen: usize,
    /// Items actually created; the rest were already known.
    pub created: usize,
}

/// Pulls the source's current record list into the item store. Known
/// identifiers are left untouched, so re-running discovery against the
/// same source is always safe.
pub fn discover_into_store(
    db: &Database,
    source: &dyn TaskSource,
) -> Result<DiscoveryReport, ProdflowError> {
    let discovered = source.discover()?;
    let mut report = DiscoveryReport {
        seen: discovered.len(),
        created: 0,
    };

    for record in discovered {
        let outcome =
            item_repo::insert_discovered(db, &record.identifier, record.metadata.as_deref())?;
        if outcome == InsertOutcome::Created {
            report.created += 1;
        }
    }

    info!(
        "Discovery: {} records seen, {} new items",
        report.seen, report.created
    );
    Ok(report)
}

/// Pushes the publish pointer back to the source for every published
/// item that has not been written back yet. A failed write-back is
/// logged and retried on the next run.
pub fn write_back_published(
    db: &Database,
    source: &dyn TaskSource,
) -> Result<usize, ProdflowError> {
    let pending = item_repo::pending_write_back(db)?;
    let mut written = 0;

    for item in pending {
        let Some(published_ref) = item.published_ref.as_deref() else {
            continue;
        };
        match source.write_back(&item.identifier, item.metadata.as_deref(), published_ref) {
            Ok(()) => {
                item_repo::mark_written_back(db, &item.identifier)?;
                written += 1;
            }
            Err(e) => {
                warn!("Write-back failed for '{}': {}", item.identifier, e);
            }
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::item_repo::{claim_batch, commit, find};
    use crate::stage::{Stage, Status};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeSource {
        records: Vec<DiscoveredItem>,
        written: Mutex<Vec<(String, String)>>,
        fail_write_back: bool,
    }

    impl FakeSource {
        fn new(identifiers: &[&str]) -> Self {
            Self {
                records: identifiers
                    .iter()
                    .map(|id| DiscoveredItem {
                        identifier: id.to_string(),
                        metadata: Some(format!("{{\"record_id\":\"rec-{}\"}}", id)),
                    })
                    .collect(),
                written: Mutex::new(Vec::new()),
                fail_write_back: false,
            }
        }
    }

    impl TaskSource for FakeSource {
        fn discover(&self) -> Result<Vec<DiscoveredItem>, SourceError> {
            Ok(self.records.clone())
        }

        fn write_back(
            &self,
            identifier: &str,
            _metadata: Option<&str>,
            published_ref: &str,
        ) -> Result<(), SourceError> {
            if self.fail_write_back {
                return Err(SourceError::UnexpectedResponse("boom".to_string()));
            }
            self.written
                .lock()
                .unwrap()
                .push((identifier.to_string(), published_ref.to_string()));
            Ok(())
        }
    }

    fn publish_item(db: &Database, identifier: &str) {
        for stage in Stage::ALL {
            let batch = claim_batch(db, stage, 1, Duration::from_secs(60)).unwrap();
            commit(db, identifier, &batch.token, stage, "payload").unwrap();
        }
    }

    #[test]
    fn test_discovery_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let source = FakeSource::new(&["url-a", "url-b"]);

        let first = discover_into_store(&db, &source).unwrap();
        assert_eq!(first.seen, 2);
        assert_eq!(first.created, 2);

        let second = discover_into_store(&db, &source).unwrap();
        assert_eq!(second.seen, 2);
        assert_eq!(second.created, 0);

        assert_eq!(
            item_repo::count_by_status(&db, Status::Discovered).unwrap(),
            2
        );
    }

    #[test]
    fn test_write_back_marks_items_once() {
        let db = Database::open_in_memory().unwrap();
        let source = FakeSource::new(&["url-a"]);
        discover_into_store(&db, &source).unwrap();
        publish_item(&db, "url-a");

        assert_eq!(write_back_published(&db, &source).unwrap(), 1);
        assert_eq!(source.written.lock().unwrap().len(), 1);
        assert!(find(&db, "url-a")
            .unwrap()
            .unwrap()
            .written_back_at
            .is_some());

        // Second sweep finds nothing pending.
        assert_eq!(write_back_published(&db, &source).unwrap(), 0);
        assert_eq!(source.written.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_write_back_stays_pending() {
        let db = Database::open_in_memory().unwrap();
        let mut source = FakeSource::new(&["url-a"]);
        source.fail_write_back = true;
        discover_into_store(&db, &source).unwrap();
        publish_item(&db, "url-a");

        assert_eq!(write_back_published(&db, &source).unwrap(), 0);
        assert!(find(&db, "url-a")
            .unwrap()
            .unwrap()
            .written_back_at
            .is_none());

        // Next run, with the source healthy again, catches up.
        source.fail_write_back = false;
        assert_eq!(write_back_published(&db, &source).unwrap(), 1);
    }

    #[test]
    fn test_unpublished_items_are_not_written_back() {
        let db = Database::open_in_memory().unwrap();
        let source = FakeSource::new(&["url-a"]);
        discover_into_store(&db, &source).unwrap();

        assert_eq!(write_back_published(&db, &source).unwrap(), 0);
        assert!(source.written.lock().unwrap().is_empty());
    }
}
