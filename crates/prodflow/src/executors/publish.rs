//! Publish stage: upload the assembled product bundle to the external
//! store and keep the returned file reference.

use log::debug;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::{resolve_credential, PublishConfig};
use crate::db::item_repo::ItemRow;
use crate::error::ConfigError;
use crate::pipeline::error::StageError;
use crate::pipeline::executor::{FetchPayload, StageExecutor, StageOutput};
use crate::stage::Stage;

use super::{build_client, classify_service_status, page_file_stem, transport_error};

#[derive(Serialize)]
struct PublishRequest<'a> {
    name: String,
    folder: &'a str,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct PublishResponse {
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

pub struct Publisher {
    http: Client,
    endpoint: String,
    token: String,
    folder: String,
}

impl Publisher {
    pub fn new(config: &PublishConfig) -> Result<Self, ConfigError> {
        if config.endpoint.is_empty() {
            return Err(ConfigError::Validation {
                message: "publish.endpoint must be set".to_string(),
            });
        }
        Ok(Self {
            http: build_client(config.timeout_secs, None)?,
            endpoint: config.endpoint.clone(),
            token: resolve_credential(&config.token_env)?,
            folder: config.folder.clone(),
        })
    }
}

impl StageExecutor for Publisher {
    fn stage(&self) -> Stage {
        Stage::Publish
    }

    fn execute(&self, item: &ItemRow) -> Result<StageOutput, StageError> {
        let request = PublishRequest {
            name: format!("{}.json", page_file_stem(&item.identifier)),
            folder: &self.folder,
            content: bundle(item),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .map_err(|e| transport_error("publish request", e))?;

        if let Some(error) = classify_service_status(response.status()) {
            return Err(error);
        }

        let parsed: PublishResponse = response.json().map_err(|e| {
            StageError::UnexpectedContent(format!("malformed publish response: {}", e))
        })?;

        let remote_ref = parsed.link.or(parsed.id).ok_or_else(|| {
            StageError::UnexpectedContent("publish response had no file reference".to_string())
        })?;

        debug!("Published '{}' as {}", item.identifier, remote_ref);

        Ok(StageOutput::Published { remote_ref })
    }
}

/// Everything downstream consumers need, in one document: identifier,
/// title, translated text, and the local media inventory.
fn bundle(item: &ItemRow) -> serde_json::Value {
    let title = item
        .page_ref
        .as_deref()
        .and_then(|raw| serde_json::from_str::<FetchPayload>(raw).ok())
        .map(|p| p.title)
        .unwrap_or_default();
    let media: Vec<String> = item
        .media_paths
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();

    serde_json::json!({
        "identifier": item.identifier,
        "title": title,
        "extracted_text": item.extracted_text.clone().unwrap_or_default(),
        "translated_text": item.translated_text.clone().unwrap_or_default(),
        "media_files": media,
    })
}
