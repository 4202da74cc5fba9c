//! Translate stage: send the extracted Chinese text through a
//! chat-completions endpoint and keep the translated document.

use log::debug;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::{resolve_credential, TranslateConfig};
use crate::db::item_repo::ItemRow;
use crate::error::ConfigError;
use crate::pipeline::error::StageError;
use crate::pipeline::executor::{FetchPayload, StageExecutor, StageOutput};
use crate::stage::Stage;

use super::{build_client, classify_service_status, transport_error};

const SYSTEM_PROMPT: &str = "You are a professional e-commerce translator. \
    Translate all Chinese keys and values in JSON to English. \
    Preserve JSON structure exactly. \
    If keys have '_chn', change to '_en'.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

pub struct Translator {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl Translator {
    pub fn new(config: &TranslateConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            http: build_client(config.timeout_secs, None)?,
            endpoint: config.endpoint.clone(),
            api_key: resolve_credential(&config.api_key_env)?,
            model: config.model.clone(),
        })
    }
}

impl StageExecutor for Translator {
    fn stage(&self) -> Stage {
        Stage::Translate
    }

    fn execute(&self, item: &ItemRow) -> Result<StageOutput, StageError> {
        let Some(document) = source_document(item) else {
            // Nothing to translate; pass the item through.
            return Ok(StageOutput::Translated {
                text: String::new(),
            });
        };

        let user_prompt = format!(
            "Translate this JSON:\n{}",
            serde_json::to_string_pretty(&document).unwrap_or_else(|_| document.to_string())
        );
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| transport_error("translation request", e))?;

        if let Some(error) = classify_service_status(response.status()) {
            return Err(error);
        }

        let parsed: ChatResponse = response.json().map_err(|e| {
            StageError::UnexpectedContent(format!("malformed translation response: {}", e))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                StageError::UnexpectedContent("translation response had no content".to_string())
            })?;

        debug!(
            "Translated '{}' ({} characters)",
            item.identifier,
            content.len()
        );

        Ok(StageOutput::Translated { text: content })
    }
}

/// Assembles the source-language document for one item: the page title
/// plus whatever OCR pulled out of the media. `None` when there is
/// nothing worth sending.
fn source_document(item: &ItemRow) -> Option<serde_json::Value> {
    let title = item
        .page_ref
        .as_deref()
        .and_then(|raw| serde_json::from_str::<FetchPayload>(raw).ok())
        .map(|p| p.title)
        .unwrap_or_default();
    let image_text = item.extracted_text.clone().unwrap_or_default();

    if title.trim().is_empty() && image_text.trim().is_empty() {
        return None;
    }

    Some(serde_json::json!({
        "title_chn": title,
        "image_text_chn": image_text,
    }))
}
