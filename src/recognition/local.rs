use super::{text_or_sentinel, TextRecognizer};
use crate::config::RecognitionConfig;
use crate::error::{ScanError, ScanResult};
use crate::frame::{Frame, DEFAULT_JPEG_QUALITY};
use async_trait::async_trait;
use leptess::{LepTess, Variable};
use tracing::{debug, info};

/// On-device recognition with Tesseract
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    language: String,
    tessdata_path: Option<String>,
    char_whitelist: Option<String>,
}

impl TesseractRecognizer {
    pub fn new(language: String, tessdata_path: Option<String>, char_whitelist: Option<String>) -> Self {
        Self {
            language,
            tessdata_path,
            char_whitelist,
        }
    }

    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self::new(
            config.language.clone(),
            config.tessdata_path.clone(),
            config.char_whitelist.clone(),
        )
    }

    fn run(&self, image: &[u8]) -> ScanResult<String> {
        // A fresh engine per call keeps the non-Send handle on one thread
        let mut engine = LepTess::new(self.tessdata_path.as_deref(), &self.language)
            .map_err(|e| ScanError::recognition_failed(format!("Tesseract init failed: {}", e)))?;

        if let Some(whitelist) = &self.char_whitelist {
            engine
                .set_variable(Variable::TesseditCharWhitelist, whitelist)
                .map_err(|e| {
                    ScanError::recognition_failed(format!("Failed to set whitelist: {}", e))
                })?;
        }

        engine
            .set_image_from_mem(image)
            .map_err(|e| ScanError::recognition_failed(format!("Tesseract rejected image: {}", e)))?;

        let text = engine
            .get_utf8_text()
            .map_err(|e| ScanError::recognition_failed(format!("Tesseract output: {}", e)))?;

        Ok(text_or_sentinel(Some(&text)))
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn recognize(&self, frame: &Frame) -> ScanResult<String> {
        let image = frame.to_jpeg(DEFAULT_JPEG_QUALITY)?;
        debug!(
            "Running Tesseract ({}) on frame {} ({}x{})",
            self.language, frame.id, frame.width, frame.height
        );

        let engine = self.clone();
        let text = tokio::task::spawn_blocking(move || engine.run(&image))
            .await
            .map_err(|e| ScanError::recognition_failed(format!("Tesseract task panicked: {}", e)))??;

        info!("Local recognition returned {} chars", text.chars().count());
        Ok(text)
    }
}
