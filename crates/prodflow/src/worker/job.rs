use crate::db::item_repo::ItemRow;
use crate::pipeline::error::StageError;
use crate::pipeline::executor::StageOutput;
use crate::stage::Stage;

/// One claimed item handed to a stage worker.
#[derive(Debug, Clone)]
pub struct StageJob {
    pub stage: Stage,
    /// Snapshot of the row at claim time.
    pub item: ItemRow,
}

/// What came back from the worker. The orchestrator persists it under
/// the claim token of the batch the item was claimed in.
#[derive(Debug)]
pub struct StageJobResult {
    pub stage: Stage,
    pub item: ItemRow,
    pub outcome: Result<StageOutput, StageError>,
}
