//! The scheduling loop: scan the store for the earliest unfinished
//! stage, claim a batch, run it on that stage's worker pool, persist
//! each outcome, repeat until nothing is claimable or the run is
//! cancelled.
//!
//! The orchestrator is the sole writer of stage status and holds no
//! cross-call state of its own; several instances can share one store
//! as long as claim/commit atomicity holds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, warn};

use crate::db::item_repo;
use crate::db::{Database, DatabaseError};
use crate::stage::Stage;
use crate::worker::job::{StageJob, StageJobResult};
use crate::worker::pool::WorkerPool;

use super::config::PipelineConfig;
use super::error::OrchestratorError;
use super::executor::ExecutorSet;
use super::retry::RetryDecision;

/// Tally of one scheduling run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    /// Stage results durably committed.
    pub committed: u64,
    /// Failures recorded for a later retry.
    pub retried: u64,
    /// Items parked as invalid.
    pub invalidated: u64,
    /// Results discarded because the lease was gone.
    pub lease_lost: u64,
    /// Claim rounds executed.
    pub rounds: u64,
}

pub struct Orchestrator {
    db: Database,
    config: Arc<PipelineConfig>,
    executors: ExecutorSet,
    shutdown: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(db: Database, config: Arc<PipelineConfig>, executors: ExecutorSet) -> Self {
        Self {
            db,
            config,
            executors,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag observed at every claim boundary. Flip it to cancel the run;
    /// in-flight stage calls finish or fail naturally.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Runs the scheduling loop to its fixed point: no stage has any
    /// eligible item left (items waiting out a backoff window or an
    /// outstanding lease are left for a later run).
    pub fn run(&self) -> Result<RunSummary, OrchestratorError> {
        let mut pools: HashMap<Stage, WorkerPool> = HashMap::new();
        let mut summary = RunSummary::default();

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping at claim boundary");
                break;
            }

            let Some(stage) = self.next_runnable_stage()? else {
                break;
            };
            let executor = self
                .executors
                .get(stage)
                .cloned()
                .ok_or(OrchestratorError::MissingExecutor(stage))?;

            let batch = self.with_store(|| {
                item_repo::claim_batch(
                    &self.db,
                    stage,
                    self.config.claim_limit(stage),
                    self.config.lease_timeout,
                )
            })?;
            if batch.items.is_empty() {
                // Another claimer got there first; rescan.
                continue;
            }

            summary.rounds += 1;
            let _round = info_span!("round", stage = %stage, claimed = batch.items.len()).entered();

            let pool = pools.entry(stage).or_insert_with(|| {
                WorkerPool::new(Arc::clone(&executor), self.config.worker_width(stage))
            });

            let token = batch.token;
            let expected = batch.items.len();
            for item in batch.items {
                pool.submit(StageJob { stage, item })?;
            }

            for _ in 0..expected {
                match pool.recv_result_timeout(self.config.lease_timeout) {
                    Some(result) => self.handle_result(&token, result, &mut summary)?,
                    None => {
                        // A worker died or stalled past the lease window;
                        // the remaining leases expire and get reclaimed.
                        warn!(stage = %stage, "Worker result missing, leaving leases to expire");
                        break;
                    }
                }
            }
        }

        for (_, pool) in pools.iter() {
            pool.shutdown();
        }
        for (_, pool) in pools {
            pool.wait();
        }

        info!(
            committed = summary.committed,
            retried = summary.retried,
            invalidated = summary.invalidated,
            lease_lost = summary.lease_lost,
            rounds = summary.rounds,
            "Scheduling run finished"
        );
        Ok(summary)
    }

    /// The earliest stage in the ladder with at least one eligible item.
    fn next_runnable_stage(&self) -> Result<Option<Stage>, OrchestratorError> {
        for stage in Stage::ALL {
            let eligible = self.with_store(|| {
                item_repo::eligible_count(&self.db, stage, self.config.lease_timeout)
            })?;
            if eligible > 0 {
                return Ok(Some(stage));
            }
        }
        Ok(None)
    }

    fn handle_result(
        &self,
        token: &str,
        result: StageJobResult,
        summary: &mut RunSummary,
    ) -> Result<(), OrchestratorError> {
        let StageJobResult {
            stage,
            item,
            outcome,
        } = result;

        match outcome {
            Ok(output) => {
                let value = output.to_column_value()?;
                match self.with_store(|| {
                    item_repo::commit(&self.db, &item.identifier, token, stage, &value)
                }) {
                    Ok(()) => {
                        summary.committed += 1;
                        debug!(item = %item.identifier, stage = %stage, "Stage committed");
                    }
                    Err(OrchestratorError::Database(DatabaseError::LeaseLost { .. })) => {
                        summary.lease_lost += 1;
                        warn!(item = %item.identifier, stage = %stage, "Lease lost, result discarded");
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(stage_error) => {
                let kind = stage_error.kind();
                let message = stage_error.to_string();
                let decision = self
                    .config
                    .retry
                    .decide(stage, item.attempts(stage), kind);
                match self.with_store(|| {
                    item_repo::record_failure(
                        &self.db,
                        &item.identifier,
                        token,
                        stage,
                        kind,
                        &message,
                        &decision,
                    )
                }) {
                    Ok(()) => match decision {
                        RetryDecision::Retry { delay } => {
                            summary.retried += 1;
                            info!(
                                item = %item.identifier,
                                stage = %stage,
                                error = %message,
                                retry_in = ?delay,
                                "Stage failed, will retry"
                            );
                        }
                        RetryDecision::Fail => {
                            summary.invalidated += 1;
                            warn!(
                                item = %item.identifier,
                                stage = %stage,
                                error = %message,
                                "Item parked as invalid"
                            );
                        }
                    },
                    Err(OrchestratorError::Database(DatabaseError::LeaseLost { .. })) => {
                        summary.lease_lost += 1;
                        warn!(item = %item.identifier, stage = %stage, "Lease lost, failure discarded");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Runs a store operation, absorbing "store busy" for up to the
    /// configured tolerance. Busy never counts against any item; past
    /// the tolerance the whole run aborts.
    fn with_store<T>(
        &self,
        mut op: impl FnMut() -> Result<T, DatabaseError>,
    ) -> Result<T, OrchestratorError> {
        let started = Instant::now();
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_busy() => {
                    if started.elapsed() >= self.config.store_busy_tolerance {
                        return Err(OrchestratorError::StoreUnavailable(
                            self.config.store_busy_tolerance,
                        ));
                    }
                    debug!("Item store busy, retrying");
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::item_repo::{insert_discovered, ItemRow};
    use crate::pipeline::error::StageError;
    use crate::pipeline::executor::{StageExecutor, StageOutput};
    use crate::stage::Status;

    struct NeverCalled(Stage);

    impl StageExecutor for NeverCalled {
        fn stage(&self) -> Stage {
            self.0
        }
        fn execute(&self, item: &ItemRow) -> Result<StageOutput, StageError> {
            panic!("executor must not run for item '{}'", item.identifier);
        }
    }

    fn orchestrator_with(db: Database, executors: ExecutorSet) -> Orchestrator {
        Orchestrator::new(db, Arc::new(PipelineConfig::default()), executors)
    }

    #[test]
    fn test_empty_store_run_does_nothing() {
        let db = Database::open_in_memory().unwrap();
        let mut executors = ExecutorSet::new();
        executors.register(Arc::new(NeverCalled(Stage::Fetch)));

        let summary = orchestrator_with(db, executors).run().unwrap();
        assert_eq!(summary.rounds, 0);
        assert_eq!(summary.committed, 0);
    }

    #[test]
    fn test_shutdown_flag_stops_before_claiming() {
        let db = Database::open_in_memory().unwrap();
        insert_discovered(&db, "item", None).unwrap();

        let mut executors = ExecutorSet::new();
        executors.register(Arc::new(NeverCalled(Stage::Fetch)));
        let orchestrator = orchestrator_with(db.clone(), executors);
        orchestrator.shutdown_handle().store(true, Ordering::Relaxed);

        let summary = orchestrator.run().unwrap();
        assert_eq!(summary.rounds, 0);
        // Item untouched and still claimable later.
        let item = item_repo::find(&db, "item").unwrap().unwrap();
        assert_eq!(item.status, Status::Discovered);
        assert!(item.claimed_by.is_none());
    }

    #[test]
    fn test_missing_executor_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        insert_discovered(&db, "item", None).unwrap();

        let result = orchestrator_with(db, ExecutorSet::new()).run();
        assert!(matches!(
            result,
            Err(OrchestratorError::MissingExecutor(Stage::Fetch))
        ));
    }
}
