//! Concrete stage executors.
//!
//! Each wraps one external capability and translates its failures into
//! the three-way classification the orchestrator consumes. Remote
//! status codes never leak past this module.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;

use crate::config::Config;
use crate::error::ConfigError;
use crate::pipeline::error::StageError;
use crate::pipeline::executor::ExecutorSet;

pub mod extract;
pub mod fetch;
pub mod media;
pub mod publish;
pub mod translate;

pub use extract::TextExtractor;
pub use fetch::PageFetcher;
pub use media::MediaDownloader;
pub use publish::Publisher;
pub use translate::Translator;

/// Builds the full production executor set from the application config.
pub fn standard_executors(config: &Config) -> Result<ExecutorSet, ConfigError> {
    let mut set = ExecutorSet::new();
    set.register(Arc::new(PageFetcher::new(&config.fetch, &config.data_dir)?));
    set.register(Arc::new(MediaDownloader::new(
        &config.data_dir,
        config.fetch.timeout_secs,
    )?));
    set.register(Arc::new(TextExtractor::new(&config.ocr)));
    set.register(Arc::new(Translator::new(&config.translate)?));
    set.register(Arc::new(Publisher::new(&config.publish)?));
    Ok(set)
}

pub(crate) fn build_client(
    timeout_secs: u64,
    user_agent: Option<&str>,
) -> Result<Client, ConfigError> {
    let mut builder = Client::builder().timeout(Duration::from_secs(timeout_secs));
    if let Some(agent) = user_agent {
        builder = builder.user_agent(agent.to_string());
    }
    builder
        .build()
        .map_err(|e| ConfigError::HttpClient(e.to_string()))
}

/// Classifies a transport-level failure (connect, timeout, body read).
pub(crate) fn transport_error(context: &str, error: reqwest::Error) -> StageError {
    if error.is_decode() {
        StageError::UnexpectedContent(format!("{}: {}", context, error))
    } else {
        StageError::RetryableRemote(format!("{}: {}", context, error))
    }
}

/// Classifies a status code from a *resource* URL (product page, media
/// file): here 404/410 means the resource itself is confirmed gone.
pub(crate) fn classify_resource_status(status: StatusCode) -> Option<StageError> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        404 | 410 => StageError::ConfirmedAbsent(format!("remote returned {}", status)),
        429 => StageError::RetryableRemote(format!("rate limited: {}", status)),
        500..=599 => StageError::RetryableRemote(format!("remote error: {}", status)),
        _ => StageError::UnexpectedContent(format!("unexpected status {}", status)),
    })
}

/// Classifies a status code from a *service* endpoint (translator,
/// publisher, task source): a 404 there is a misconfigured call, never
/// an absent item.
pub(crate) fn classify_service_status(status: StatusCode) -> Option<StageError> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        429 => StageError::RetryableRemote(format!("rate limited: {}", status)),
        500..=599 => StageError::RetryableRemote(format!("service error: {}", status)),
        _ => StageError::UnexpectedContent(format!("unexpected status {}", status)),
    })
}

/// A stable file stem for an identifier: the numeric offer id when the
/// URL carries one, otherwise the identifier itself sanitized down to
/// `[A-Za-z0-9_]` and truncated.
pub(crate) fn page_file_stem(identifier: &str) -> String {
    if let Some(pos) = identifier.find("/offer/") {
        let digits: String = identifier[pos + "/offer/".len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if !digits.is_empty() {
            return digits;
        }
    }
    identifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(80)
        .collect()
}
