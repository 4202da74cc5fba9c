pub mod job;
pub mod pool;

pub use job::{StageJob, StageJobResult};
pub use pool::WorkerPool;
