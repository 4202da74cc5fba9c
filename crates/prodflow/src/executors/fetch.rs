//! Fetch stage: pull the raw product page, check it actually rendered,
//! harvest media URLs, and persist the page to disk.

use std::path::{Path, PathBuf};

use log::debug;
use regex::Regex;
use reqwest::blocking::Client;

use crate::config::FetchConfig;
use crate::db::item_repo::ItemRow;
use crate::error::ConfigError;
use crate::pipeline::error::StageError;
use crate::pipeline::executor::{FetchPayload, StageExecutor, StageOutput};
use crate::stage::Stage;

use super::{build_client, classify_resource_status, page_file_stem, transport_error};

pub struct PageFetcher {
    http: Client,
    pages_dir: PathBuf,
    title_re: Regex,
    image_re: Regex,
    absent_markers: Vec<Regex>,
}

impl PageFetcher {
    pub fn new(config: &FetchConfig, data_dir: &Path) -> Result<Self, ConfigError> {
        let compile = |name: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                name: name.to_string(),
                reason: e.to_string(),
            })
        };

        let title_re = compile("fetch.title_pattern", &config.title_pattern)?;
        let image_re = compile("fetch.image_pattern", &config.image_pattern)?;
        let absent_markers = config
            .absent_markers
            .iter()
            .map(|m| compile("fetch.absent_markers", m))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            http: build_client(config.timeout_secs, Some(&config.user_agent))?,
            pages_dir: data_dir.join("pages"),
            title_re,
            image_re,
            absent_markers,
        })
    }

    /// Parses the title landmark and media URLs out of a page body.
    ///
    /// A delisted marker is a confirmed absence. A missing title with no
    /// marker is unexpected content — often an incompletely rendered
    /// page — and goes through the bounded retry path instead.
    fn parse_page(&self, body: &str) -> Result<(String, Vec<String>), StageError> {
        for marker in &self.absent_markers {
            if marker.is_match(body) {
                return Err(StageError::ConfirmedAbsent(
                    "page carries a delisted marker".to_string(),
                ));
            }
        }

        let title = self
            .title_re
            .captures(body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                StageError::UnexpectedContent("title landmark missing from page".to_string())
            })?;

        let mut media_urls = Vec::new();
        for captures in self.image_re.captures_iter(body) {
            if let Some(url) = captures.get(1) {
                let url = url.as_str().to_string();
                if !media_urls.contains(&url) {
                    media_urls.push(url);
                }
            }
        }

        Ok((title, media_urls))
    }

    fn save_page(&self, identifier: &str, body: &str) -> Result<PathBuf, StageError> {
        std::fs::create_dir_all(&self.pages_dir).map_err(|e| {
            StageError::UnexpectedContent(format!(
                "failed to create page directory '{}': {}",
                self.pages_dir.display(),
                e
            ))
        })?;
        let path = self
            .pages_dir
            .join(format!("{}.html", page_file_stem(identifier)));
        std::fs::write(&path, body).map_err(|e| {
            StageError::UnexpectedContent(format!(
                "failed to save page '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(path)
    }
}

impl StageExecutor for PageFetcher {
    fn stage(&self) -> Stage {
        Stage::Fetch
    }

    fn execute(&self, item: &ItemRow) -> Result<StageOutput, StageError> {
        let response = self
            .http
            .get(&item.identifier)
            .send()
            .map_err(|e| transport_error("page request", e))?;

        if let Some(error) = classify_resource_status(response.status()) {
            return Err(error);
        }

        let body = response
            .text()
            .map_err(|e| transport_error("page body", e))?;

        let (title, media_urls) = self.parse_page(&body)?;
        let page_path = self.save_page(&item.identifier, &body)?;

        debug!(
            "Fetched '{}': title '{}', {} media URLs",
            item.identifier,
            title,
            media_urls.len()
        );

        Ok(StageOutput::Fetched(FetchPayload {
            page_path: page_path.display().to_string(),
            title,
            media_urls,
        }))
    }
}
