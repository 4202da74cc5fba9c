//! MediaAcquire stage: download the media URLs harvested by Fetch into
//! a per-item directory. Already-downloaded files are kept, so a retry
//! only fetches what is still missing.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;

use crate::db::item_repo::ItemRow;
use crate::error::ConfigError;
use crate::pipeline::error::StageError;
use crate::pipeline::executor::{FetchPayload, MediaPayload, StageExecutor, StageOutput};
use crate::stage::Stage;

use super::{build_client, classify_resource_status, page_file_stem, transport_error};

pub struct MediaDownloader {
    http: Client,
    media_dir: PathBuf,
}

impl MediaDownloader {
    pub fn new(data_dir: &Path, timeout_secs: u64) -> Result<Self, ConfigError> {
        Ok(Self {
            http: build_client(timeout_secs, None)?,
            media_dir: data_dir.join("media"),
        })
    }

    fn download(&self, url: &str, path_base: &Path) -> Result<Option<PathBuf>, StageError> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|e| transport_error("media request", e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            // One vanished image does not doom the item.
            warn!("Media URL gone, skipping: {}", url);
            return Ok(None);
        }
        if let Some(error) = classify_resource_status(status) {
            return Err(error);
        }

        // Fall back to the content type when the URL path has no
        // usable extension.
        let mut path = path_base.to_path_buf();
        if path.extension().is_none() {
            let ext = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .and_then(|ct| mime_guess::get_mime_extensions_str(ct))
                .and_then(|exts| exts.first())
                .copied()
                .unwrap_or("bin");
            path.set_extension(ext);
        }

        let bytes = response
            .bytes()
            .map_err(|e| transport_error("media body", e))?;
        std::fs::write(&path, &bytes).map_err(|e| {
            StageError::UnexpectedContent(format!(
                "failed to save media '{}': {}",
                path.display(),
                e
            ))
        })?;

        debug!("Saved media: {} ({} bytes)", path.display(), bytes.len());
        Ok(Some(path))
    }
}

impl StageExecutor for MediaDownloader {
    fn stage(&self) -> Stage {
        Stage::MediaAcquire
    }

    fn execute(&self, item: &ItemRow) -> Result<StageOutput, StageError> {
        let payload: FetchPayload = item
            .page_ref
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .ok_or_else(|| {
                StageError::UnexpectedContent("fetch payload missing or unreadable".to_string())
            })?;

        let item_dir = self.media_dir.join(page_file_stem(&item.identifier));
        std::fs::create_dir_all(&item_dir).map_err(|e| {
            StageError::UnexpectedContent(format!(
                "failed to create media directory '{}': {}",
                item_dir.display(),
                e
            ))
        })?;

        let mut paths = Vec::new();
        for (index, url) in payload.media_urls.iter().enumerate() {
            let path_base = item_dir.join(format!("{:02}_{}", index, url_basename(url)));

            if path_base.extension().is_some() && path_base.exists() {
                debug!("Media already present, skipping: {}", path_base.display());
                paths.push(path_base.display().to_string());
                continue;
            }

            if let Some(path) = self.download(url, &path_base)? {
                paths.push(path.display().to_string());
            }
        }

        Ok(StageOutput::MediaAcquired(MediaPayload { paths }))
    }
}

/// Last path segment of a URL, query stripped. Empty segments fall back
/// to a generic name.
fn url_basename(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_query.rsplit('/').next().unwrap_or("");
    if name.is_empty() {
        "image".to_string()
    } else {
        name.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            })
            .collect()
    }
}
