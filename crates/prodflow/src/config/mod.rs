//! Application configuration: one JSON file, serde defaults for every
//! field, and a semantic validation pass after parsing.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// SQLite file path. Falls back to `~/.prodflow/data/prodflow.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Root directory for saved pages and downloaded media.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub workers: WorkersConfig,

    /// How long a claim stays exclusive before another worker may
    /// reclaim it, in seconds.
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,

    /// How long a busy store is tolerated before a run aborts, seconds.
    #[serde(default = "default_store_busy_tolerance_secs")]
    pub store_busy_tolerance_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub translate: TranslateConfig,

    #[serde(default)]
    pub publish: PublishConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            data_dir: default_data_dir(),
            workers: WorkersConfig::default(),
            lease_timeout_secs: default_lease_timeout_secs(),
            store_busy_tolerance_secs: default_store_busy_tolerance_secs(),
            retry: RetryConfig::default(),
            source: SourceConfig::default(),
            fetch: FetchConfig::default(),
            ocr: OcrConfig::default(),
            translate: TranslateConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_lease_timeout_secs() -> u64 {
    600
}

fn default_store_busy_tolerance_secs() -> u64 {
    30
}

/// Worker width per stage. Fetch stays narrow because each call drives
/// a full page session; OCR scales with cores; the remote-call stages
/// sit in between.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    #[serde(default = "default_fetch_workers")]
    pub fetch: usize,
    #[serde(default = "default_remote_workers")]
    pub media: usize,
    #[serde(default = "default_extract_workers")]
    pub extract: usize,
    #[serde(default = "default_remote_workers")]
    pub translate: usize,
    #[serde(default = "default_remote_workers")]
    pub publish: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            fetch: default_fetch_workers(),
            media: default_remote_workers(),
            extract: default_extract_workers(),
            translate: default_remote_workers(),
            publish: default_remote_workers(),
        }
    }
}

fn default_fetch_workers() -> usize {
    1
}

fn default_remote_workers() -> usize {
    4
}

fn default_extract_workers() -> usize {
    num_cpus::get().clamp(1, 8)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

/// Task source: a hosted database of product records cleared for
/// processing.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(default = "default_source_base_url")]
    pub base_url: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_source_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub database_id: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Checkbox property marking records cleared for processing.
    #[serde(default = "default_cleared_property")]
    pub cleared_property: String,
    /// URL property naming the product page.
    #[serde(default = "default_url_property")]
    pub url_property: String,
    /// Files property receiving the published result link.
    #[serde(default = "default_link_property")]
    pub link_property: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_base_url(),
            token_env: default_source_token_env(),
            database_id: String::new(),
            page_size: default_page_size(),
            cleared_property: default_cleared_property(),
            url_property: default_url_property(),
            link_property: default_link_property(),
        }
    }
}

fn default_source_base_url() -> String {
    "https://api.notion.com/v1".to_string()
}

fn default_source_token_env() -> String {
    "PRODFLOW_SOURCE_TOKEN".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_cleared_property() -> String {
    "CLEARED FOR SCRAPE".to_string()
}

fn default_url_property() -> String {
    "PRIMARY SUPPLIER".to_string()
}

fn default_link_property() -> String {
    "PUBLISHED DATA".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Pattern matching the title landmark on a well-formed page.
    #[serde(default = "default_title_pattern")]
    pub title_pattern: String,
    /// Pattern harvesting media URLs out of the page.
    #[serde(default = "default_image_pattern")]
    pub image_pattern: String,
    /// Markers the remote renders when an item has been taken down.
    /// Matching one is a confirmed absence, not a parse failure.
    #[serde(default = "default_absent_markers")]
    pub absent_markers: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
            title_pattern: default_title_pattern(),
            image_pattern: default_image_pattern(),
            absent_markers: default_absent_markers(),
        }
    }
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("prodflow/{}", env!("CARGO_PKG_VERSION"))
}

fn default_title_pattern() -> String {
    r#"class="title-text"[^>]*>([^<]+)<"#.to_string()
}

fn default_image_pattern() -> String {
    r#"<img[^>]+src="(https?://[^"]+\.(?:jpg|jpeg|png|webp)[^"]*)""#.to_string()
}

fn default_absent_markers() -> Vec<String> {
    vec!["商品已下架".to_string(), "offer-removed".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OcrConfig {
    /// Tesseract language codes, joined for multi-language pages.
    #[serde(default = "default_ocr_languages")]
    pub languages: Vec<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: default_ocr_languages(),
        }
    }
}

fn default_ocr_languages() -> Vec<String> {
    vec!["chi_sim".to_string(), "eng".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslateConfig {
    #[serde(default = "default_translate_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_translate_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_translate_model")]
    pub model: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            endpoint: default_translate_endpoint(),
            api_key_env: default_translate_key_env(),
            model: default_translate_model(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_translate_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_translate_key_env() -> String {
    "PRODFLOW_TRANSLATE_KEY".to_string()
}

fn default_translate_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_publish_token_env")]
    pub token_env: String,
    /// Remote folder receiving the published bundles.
    #[serde(default = "default_publish_folder")]
    pub folder: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token_env: default_publish_token_env(),
            folder: default_publish_folder(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_publish_token_env() -> String {
    "PRODFLOW_PUBLISH_TOKEN".to_string()
}

fn default_publish_folder() -> String {
    "product_data".to_string()
}

/// Loads and validates a config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.retry.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "retry.max_attempts must be at least 1".to_string(),
        });
    }
    if config.lease_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "lease_timeout_secs must be positive".to_string(),
        });
    }

    for (name, pattern) in [
        ("fetch.title_pattern", &config.fetch.title_pattern),
        ("fetch.image_pattern", &config.fetch.image_pattern),
    ] {
        if let Err(e) = regex::Regex::new(pattern) {
            return Err(ConfigError::InvalidPattern {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }
    }
    for marker in &config.fetch.absent_markers {
        if let Err(e) = regex::Regex::new(marker) {
            return Err(ConfigError::InvalidPattern {
                name: "fetch.absent_markers".to_string(),
                reason: e.to_string(),
            });
        }
    }

    Ok(())
}

/// Resolves a credential named by an environment variable.
pub fn resolve_credential(env_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_name).map_err(|_| ConfigError::MissingCredential(env_name.to_string()))
}
