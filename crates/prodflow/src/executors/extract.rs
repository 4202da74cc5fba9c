//! TextExtract stage: run OCR over each downloaded media file and join
//! whatever text comes out, in media order. Individual images that fail
//! to decode are skipped; the stage only fails when nothing at all was
//! readable.

use std::io::Cursor;

use log::warn;

use crate::config::OcrConfig;
use crate::db::item_repo::ItemRow;
use crate::pipeline::error::StageError;
use crate::pipeline::executor::{StageExecutor, StageOutput};
use crate::stage::Stage;

pub struct TextExtractor {
    languages: String,
}

impl TextExtractor {
    pub fn new(config: &OcrConfig) -> Self {
        let languages = if config.languages.is_empty() {
            "eng".to_string()
        } else {
            config.languages.join("+")
        };
        Self { languages }
    }

    fn ocr_image(&self, image_data: &[u8]) -> Result<String, String> {
        let _span = tracing::info_span!("ocr").entered();

        let img = image::load_from_memory(image_data)
            .map_err(|e| format!("failed to load image: {}", e))?;

        // Convert to PNG in memory for leptess
        let mut png_data = Vec::new();
        let mut cursor = Cursor::new(&mut png_data);
        img.write_to(&mut cursor, image::ImageFormat::Png)
            .map_err(|e| format!("failed to convert image: {}", e))?;

        let mut lt = leptess::LepTess::new(None, &self.languages)
            .map_err(|e| format!("failed to initialize Tesseract: {}", e))?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| format!("failed to set image for OCR: {}", e))?;

        lt.get_utf8_text().map_err(|e| format!("OCR failed: {}", e))
    }
}

impl StageExecutor for TextExtractor {
    fn stage(&self) -> Stage {
        Stage::TextExtract
    }

    fn execute(&self, item: &ItemRow) -> Result<StageOutput, StageError> {
        let paths: Vec<String> = item
            .media_paths
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .ok_or_else(|| {
                StageError::UnexpectedContent("media payload missing or unreadable".to_string())
            })?;

        if paths.is_empty() {
            // An item without media simply has nothing to extract.
            return Ok(StageOutput::TextExtracted {
                text: String::new(),
            });
        }

        let mut sections = Vec::new();
        let mut failures = 0usize;
        for path in &paths {
            let data = match std::fs::read(path) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Cannot read media file '{}': {}", path, e);
                    failures += 1;
                    continue;
                }
            };
            match self.ocr_image(&data) {
                Ok(text) => {
                    let cleaned = clean_ocr_text(&text);
                    if !cleaned.is_empty() {
                        sections.push(cleaned);
                    }
                }
                Err(e) => {
                    warn!("OCR failed for '{}': {}", path, e);
                    failures += 1;
                }
            }
        }

        if failures == paths.len() {
            return Err(StageError::UnexpectedContent(format!(
                "none of the {} media files could be read or recognized",
                paths.len()
            )));
        }

        Ok(StageOutput::TextExtracted {
            text: sections.join("\n\n"),
        })
    }
}

/// Normalizes raw OCR output: trimmed lines, blanks dropped.
fn clean_ocr_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::item_repo::{claim_batch, commit, insert_discovered};
    use crate::db::Database;
    use std::time::Duration;

    fn item_with_media(media_paths: &str) -> ItemRow {
        let db = Database::open_in_memory().unwrap();
        insert_discovered(&db, "https://example.com/offer/1.html", None).unwrap();
        let batch = claim_batch(&db, Stage::Fetch, 1, Duration::from_secs(60)).unwrap();
        commit(
            &db,
            "https://example.com/offer/1.html",
            &batch.token,
            Stage::Fetch,
            "{\"page_path\":\"p\",\"title\":\"t\",\"media_urls\":[]}",
        )
        .unwrap();
        let batch = claim_batch(&db, Stage::MediaAcquire, 1, Duration::from_secs(60)).unwrap();
        commit(
            &db,
            "https://example.com/offer/1.html",
            &batch.token,
            Stage::MediaAcquire,
            media_paths,
        )
        .unwrap();
        claim_batch(&db, Stage::TextExtract, 1, Duration::from_secs(60))
            .unwrap()
            .items
            .remove(0)
    }

    #[test]
    fn test_languages_joined() {
        let extractor = TextExtractor::new(&OcrConfig {
            languages: vec!["chi_sim".to_string(), "eng".to_string()],
        });
        assert_eq!(extractor.languages, "chi_sim+eng");

        let fallback = TextExtractor::new(&OcrConfig { languages: vec![] });
        assert_eq!(fallback.languages, "eng");
    }

    #[test]
    fn test_clean_ocr_text() {
        assert_eq!(
            clean_ocr_text("  Stainless Widget  \n\n  500 pieces \n\n"),
            "Stainless Widget\n500 pieces"
        );
        assert_eq!(clean_ocr_text("\n \n"), "");
    }

    #[test]
    fn test_empty_media_list_yields_empty_text() {
        let extractor = TextExtractor::new(&OcrConfig::default());
        let item = item_with_media("[]");

        match extractor.execute(&item).unwrap() {
            StageOutput::TextExtracted { text } => assert!(text.is_empty()),
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[test]
    fn test_all_files_unreadable_is_unexpected_content() {
        let extractor = TextExtractor::new(&OcrConfig::default());
        let item = item_with_media("[\"/nonexistent/a.jpg\", \"/nonexistent/b.jpg\"]");

        let result = extractor.execute(&item);
        assert!(matches!(result, Err(StageError::UnexpectedContent(_))));
    }

    #[test]
    fn test_missing_media_payload_is_unexpected_content() {
        let extractor = TextExtractor::new(&OcrConfig::default());
        let db = Database::open_in_memory().unwrap();
        insert_discovered(&db, "https://example.com/offer/1.html", None).unwrap();
        let item = claim_batch(&db, Stage::Fetch, 1, Duration::from_secs(60))
            .unwrap()
            .items
            .remove(0);

        let result = extractor.execute(&item);
        assert!(matches!(result, Err(StageError::UnexpectedContent(_))));
    }
}
