use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::stage::Stage;

use super::retry::RetryPolicy;

/// Everything the orchestrator needs for one run, resolved from the
/// application config.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root for saved pages and downloaded media.
    pub data_dir: PathBuf,
    /// Worker width per stage. Fetch stays narrow (each call drives a
    /// full page session); downstream stages are lighter remote calls.
    pub fetch_workers: usize,
    pub media_workers: usize,
    pub extract_workers: usize,
    pub translate_workers: usize,
    pub publish_workers: usize,
    /// How long a claim stays exclusive before it may be reclaimed.
    pub lease_timeout: Duration,
    /// How long to keep retrying a busy store before the run aborts.
    pub store_busy_tolerance: Duration,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fetch_workers: config.workers.fetch,
            media_workers: config.workers.media,
            extract_workers: config.workers.extract,
            translate_workers: config.workers.translate,
            publish_workers: config.workers.publish,
            lease_timeout: Duration::from_secs(config.lease_timeout_secs),
            store_busy_tolerance: Duration::from_secs(config.store_busy_tolerance_secs),
            retry: RetryPolicy {
                max_attempts: config.retry.max_attempts,
                base_delay: Duration::from_millis(config.retry.base_delay_ms),
                max_delay: Duration::from_millis(config.retry.max_delay_ms),
            },
        }
    }

    pub fn worker_width(&self, stage: Stage) -> usize {
        let width = match stage {
            Stage::Fetch => self.fetch_workers,
            Stage::MediaAcquire => self.media_workers,
            Stage::TextExtract => self.extract_workers,
            Stage::Translate => self.translate_workers,
            Stage::Publish => self.publish_workers,
        };
        width.max(1)
    }

    /// Items claimed per scheduling round: enough to keep the stage's
    /// workers busy without hoarding leases.
    pub fn claim_limit(&self, stage: Stage) -> usize {
        self.worker_width(stage) * 2
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
