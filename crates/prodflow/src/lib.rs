pub mod config;
pub mod db;
pub mod error;
pub mod executors;
pub mod logging;
pub mod pipeline;
pub mod source;
pub mod stage;
pub mod worker;

pub use config::{load_config, Config};
pub use error::{ConfigError, ProdflowError, Result, WorkerError};
pub use pipeline::{
    ErrorKind, Orchestrator, OrchestratorError, PipelineConfig, RetryDecision, RetryPolicy,
    StageError, StageExecutor, StageOutput,
};
pub use stage::{Stage, Status};
