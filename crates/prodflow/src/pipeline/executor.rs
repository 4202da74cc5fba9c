//! The executor seam between the orchestrator and the outside world.
//!
//! Each stage is one implementation of `StageExecutor`: a pure mapping
//! from "item + prior stage output" to "typed output or classified
//! failure". Executors hold no pipeline state of their own.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::item_repo::ItemRow;
use crate::stage::Stage;

use super::error::StageError;

/// Output of the Fetch stage: where the raw page landed plus what was
/// parsed out of it for downstream stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPayload {
    /// Local path of the saved raw page.
    pub page_path: String,
    /// Product title parsed from the page.
    pub title: String,
    /// Media URLs harvested from the gallery and detail sections.
    pub media_urls: Vec<String>,
}

/// Output of the MediaAcquire stage: local paths of downloaded media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    pub paths: Vec<String>,
}

/// Typed result of a successful stage execution. The orchestrator
/// serializes it into the item's per-stage payload column on commit.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Fetched(FetchPayload),
    MediaAcquired(MediaPayload),
    TextExtracted { text: String },
    Translated { text: String },
    Published { remote_ref: String },
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::Fetched(_) => Stage::Fetch,
            StageOutput::MediaAcquired(_) => Stage::MediaAcquire,
            StageOutput::TextExtracted { .. } => Stage::TextExtract,
            StageOutput::Translated { .. } => Stage::Translate,
            StageOutput::Published { .. } => Stage::Publish,
        }
    }

    /// Serialized column value for the payload column of this output's
    /// stage. Structured payloads become JSON; text payloads are stored
    /// as-is.
    pub fn to_column_value(&self) -> Result<String, serde_json::Error> {
        match self {
            StageOutput::Fetched(payload) => serde_json::to_string(payload),
            StageOutput::MediaAcquired(payload) => serde_json::to_string(&payload.paths),
            StageOutput::TextExtracted { text } => Ok(text.clone()),
            StageOutput::Translated { text } => Ok(text.clone()),
            StageOutput::Published { remote_ref } => Ok(remote_ref.clone()),
        }
    }
}

/// One stage's capability. Implementations wrap a single external call
/// and translate its failures into the three-way classification.
pub trait StageExecutor: Send + Sync {
    /// The stage this executor serves.
    fn stage(&self) -> Stage;

    /// Runs the stage for one claimed item.
    fn execute(&self, item: &ItemRow) -> Result<StageOutput, StageError>;
}

/// The executors available to an orchestrator, one per stage at most.
#[derive(Clone, Default)]
pub struct ExecutorSet {
    map: HashMap<Stage, Arc<dyn StageExecutor>>,
}

impl ExecutorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under its own stage. The last registration
    /// for a stage wins.
    pub fn register(&mut self, executor: Arc<dyn StageExecutor>) {
        self.map.insert(executor.stage(), executor);
    }

    pub fn get(&self, stage: Stage) -> Option<&Arc<dyn StageExecutor>> {
        self.map.get(&stage)
    }
}

impl FromIterator<Arc<dyn StageExecutor>> for ExecutorSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn StageExecutor>>>(iter: I) -> Self {
        let mut set = Self::new();
        for executor in iter {
            set.register(executor);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_payload_roundtrips_through_column_value() {
        let output = StageOutput::Fetched(FetchPayload {
            page_path: "pages/12345.html".to_string(),
            title: "widget".to_string(),
            media_urls: vec!["https://cdn.example.com/a.jpg".to_string()],
        });
        let value = output.to_column_value().unwrap();
        let parsed: FetchPayload = serde_json::from_str(&value).unwrap();
        assert_eq!(parsed.page_path, "pages/12345.html");
        assert_eq!(parsed.media_urls.len(), 1);
    }

    #[test]
    fn test_media_payload_is_a_plain_json_array() {
        let output = StageOutput::MediaAcquired(MediaPayload {
            paths: vec!["media/1/a.jpg".to_string(), "media/1/b.jpg".to_string()],
        });
        let value = output.to_column_value().unwrap();
        let parsed: Vec<String> = serde_json::from_str(&value).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_text_outputs_stored_verbatim() {
        let output = StageOutput::Translated {
            text: "hello world".to_string(),
        };
        assert_eq!(output.to_column_value().unwrap(), "hello world");
    }

    #[test]
    fn test_output_stage_mapping() {
        let output = StageOutput::Published {
            remote_ref: "https://drive.example.com/f/1".to_string(),
        };
        assert_eq!(output.stage(), Stage::Publish);
    }
}
