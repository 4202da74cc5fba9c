//! Task source backed by a hosted record catalog (Notion-style REST
//! API): paginated database query filtered on a "cleared" checkbox,
//! plus a one-property write-back of the published file link.

use log::{info, warn};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::config::{resolve_credential, SourceConfig};
use crate::error::ConfigError;

use super::{DiscoveredItem, SourceError, TaskSource};

const API_VERSION: &str = "2022-06-28";

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<CatalogRecord>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct CatalogRecord {
    id: String,
    #[serde(default)]
    properties: serde_json::Value,
}

pub struct CatalogSource {
    http: Client,
    base_url: String,
    token: String,
    database_id: String,
    page_size: u32,
    cleared_property: String,
    url_property: String,
    link_property: String,
}

impl CatalogSource {
    pub fn new(config: &SourceConfig) -> Result<Self, ConfigError> {
        if config.database_id.is_empty() {
            return Err(ConfigError::Validation {
                message: "source.database_id must be set".to_string(),
            });
        }
        Ok(Self {
            http: crate::executors::build_client(30, None)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: resolve_credential(&config.token_env)?,
            database_id: config.database_id.clone(),
            page_size: config.page_size,
            cleared_property: config.cleared_property.clone(),
            url_property: config.url_property.clone(),
            link_property: config.link_property.clone(),
        })
    }

    fn query_page(&self, cursor: Option<&str>) -> Result<QueryResponse, SourceError> {
        let mut body = serde_json::json!({
            "page_size": self.page_size,
            "filter": {
                "property": self.cleared_property,
                "checkbox": { "equals": true }
            }
        });
        if let Some(cursor) = cursor {
            body["start_cursor"] = serde_json::json!(cursor);
        }

        let response = self
            .http
            .post(format!(
                "{}/databases/{}/query",
                self.base_url, self.database_id
            ))
            .bearer_auth(&self.token)
            .header("Notion-Version", API_VERSION)
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::UnexpectedResponse(format!(
                "catalog query returned {}",
                status
            )));
        }

        Ok(response.json()?)
    }
}

impl TaskSource for CatalogSource {
    fn discover(&self) -> Result<Vec<DiscoveredItem>, SourceError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.query_page(cursor.as_deref())?;

            for record in &page.results {
                match record_url(&record.properties, &self.url_property) {
                    Some(url) => items.push(DiscoveredItem {
                        identifier: url,
                        metadata: Some(record_metadata(&record.id)),
                    }),
                    None => {
                        warn!("Catalog record '{}' has no URL property, skipping", record.id);
                    }
                }
            }

            if page.has_more {
                cursor = page.next_cursor;
                if cursor.is_none() {
                    return Err(SourceError::UnexpectedResponse(
                        "has_more set without next_cursor".to_string(),
                    ));
                }
            } else {
                break;
            }
        }

        info!("Catalog returned {} cleared records", items.len());
        Ok(items)
    }

    fn write_back(
        &self,
        identifier: &str,
        metadata: Option<&str>,
        published_ref: &str,
    ) -> Result<(), SourceError> {
        let record_id = metadata_record_id(metadata).ok_or_else(|| {
            SourceError::UnexpectedResponse(format!(
                "item '{}' carries no source record id",
                identifier
            ))
        })?;

        let body = serde_json::json!({
            "properties": {
                (self.link_property.as_str()): {
                    "files": [{
                        "name": "product_data.json",
                        "external": { "url": published_ref }
                    }]
                }
            }
        });

        let response = self
            .http
            .patch(format!("{}/pages/{}", self.base_url, record_id))
            .bearer_auth(&self.token)
            .header("Notion-Version", API_VERSION)
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::UnexpectedResponse(format!(
                "write-back for record '{}' returned {}",
                record_id, status
            )));
        }

        info!("Record '{}' updated with file {}", record_id, published_ref);
        Ok(())
    }
}

/// Pulls the product URL out of a record's properties.
fn record_url(properties: &serde_json::Value, url_property: &str) -> Option<String> {
    properties
        .get(url_property)?
        .get("url")?
        .as_str()
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

/// Item metadata preserving the source record id for the write-back.
fn record_metadata(record_id: &str) -> String {
    serde_json::json!({ "record_id": record_id }).to_string()
}

fn metadata_record_id(metadata: Option<&str>) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(metadata?).ok()?;
    value["record_id"].as_str().map(str::to_string)
}
