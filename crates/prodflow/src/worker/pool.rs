use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::pipeline::executor::StageExecutor;
use crate::worker::job::{StageJob, StageJobResult};

/// Bounded pool of stage workers. Each worker pulls claimed items off
/// the job channel, runs the stage executor, and pushes the outcome
/// back; the orchestrator stays the only writer of the store.
pub struct WorkerPool {
    job_sender: Sender<StageJob>,
    result_receiver: Receiver<StageJobResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Creates a pool of `worker_count` threads running `executor`.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(executor: Arc<dyn StageExecutor>, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (job_sender, job_receiver) = bounded::<StageJob>(worker_count * 2);
        let (result_sender, result_receiver) = bounded::<StageJobResult>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_executor = Arc::clone(&executor);

            let handle = thread::spawn(move || {
                run_worker(worker_id, job_rx, result_tx, shutdown_flag, worker_executor);
            });

            workers.push(handle);
        }

        info!(
            "Started {} workers for stage '{}'",
            worker_count,
            executor.stage()
        );

        Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
        }
    }

    pub fn submit(&self, job: StageJob) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(job)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn recv_result(&self) -> Option<StageJobResult> {
        self.result_receiver.recv().ok()
    }

    /// Receives one result, giving up after `timeout`.
    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<StageJobResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        debug!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        debug!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<StageJob>,
    result_sender: Sender<StageJobResult>,
    shutdown: Arc<AtomicBool>,
    executor: Arc<dyn StageExecutor>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => {
                let _span = tracing::info_span!(
                    "stage_call",
                    stage = %job.stage,
                    item = %job.item.identifier,
                    worker = worker_id,
                )
                .entered();

                let outcome = executor.execute(&job.item);

                let result = StageJobResult {
                    stage: job.stage,
                    item: job.item,
                    outcome,
                };
                if let Err(e) = result_sender.send(result) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::item_repo::{claim_batch, insert_discovered};
    use crate::db::Database;
    use crate::pipeline::error::StageError;
    use crate::pipeline::executor::StageOutput;
    use crate::stage::Stage;

    struct Uppercase;

    impl StageExecutor for Uppercase {
        fn stage(&self) -> Stage {
            Stage::TextExtract
        }
        fn execute(
            &self,
            item: &crate::db::item_repo::ItemRow,
        ) -> Result<StageOutput, StageError> {
            Ok(StageOutput::TextExtracted {
                text: item.identifier.to_uppercase(),
            })
        }
    }

    fn claimed_item(identifier: &str) -> crate::db::item_repo::ItemRow {
        let db = Database::open_in_memory().unwrap();
        insert_discovered(&db, identifier, None).unwrap();
        claim_batch(&db, Stage::Fetch, 1, Duration::from_secs(60))
            .unwrap()
            .items
            .remove(0)
    }

    #[test]
    fn test_pool_runs_jobs_and_returns_results() {
        let pool = WorkerPool::new(Arc::new(Uppercase), 2);

        pool.submit(StageJob {
            stage: Stage::TextExtract,
            item: claimed_item("abc"),
        })
        .unwrap();

        let result = pool.recv_result().unwrap();
        assert_eq!(result.item.identifier, "abc");
        match result.outcome.unwrap() {
            StageOutput::TextExtracted { text } => assert_eq!(text, "ABC"),
            other => panic!("unexpected output: {:?}", other),
        }

        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_pool_shutdown_rejects_new_jobs() {
        let pool = WorkerPool::new(Arc::new(Uppercase), 1);
        assert!(!pool.is_shutdown());

        pool.shutdown();
        assert!(pool.is_shutdown());
        let result = pool.submit(StageJob {
            stage: Stage::TextExtract,
            item: claimed_item("x"),
        });
        assert!(matches!(result, Err(WorkerError::ChannelClosed)));

        pool.wait();
    }

    #[test]
    fn test_recv_result_timeout_expires() {
        let pool = WorkerPool::new(Arc::new(Uppercase), 1);
        assert!(pool
            .recv_result_timeout(Duration::from_millis(50))
            .is_none());
        pool.shutdown();
        pool.wait();
    }
}
