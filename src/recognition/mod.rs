//! Image-to-Text Adapter
//!
//! A `TextRecognizer` turns one still frame into text. Two engines exist: a
//! local Tesseract engine (feature `tesseract`) and a remote text-detection
//! endpoint. `TextAdapter` picks between them and keeps at most one call in
//! flight.

mod adapter;
#[cfg(feature = "tesseract")]
mod local;
mod remote;

use crate::error::ScanResult;
use crate::frame::Frame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use adapter::TextAdapter;
#[cfg(feature = "tesseract")]
pub use local::TesseractRecognizer;
pub use remote::{
    parse_annotate_response, AnnotateRequest, AnnotateResponse, VisionClient,
};

/// Result text when an engine ran successfully but found nothing
pub const NO_TEXT_DETECTED: &str = "No text detected";

/// Which engine performs recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionMode {
    Local,
    Remote,
}

impl fmt::Display for RecognitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionMode::Local => f.write_str("local"),
            RecognitionMode::Remote => f.write_str("remote"),
        }
    }
}

impl std::str::FromStr for RecognitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(RecognitionMode::Local),
            "remote" => Ok(RecognitionMode::Remote),
            other => Err(format!("unknown recognition mode '{}'", other)),
        }
    }
}

/// Single-shot image-to-text engine
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn recognize(&self, frame: &Frame) -> ScanResult<String>;
}

/// Map blank engine output to the "nothing found" sentinel
pub(crate) fn text_or_sentinel(text: Option<&str>) -> String {
    match text {
        Some(t) if !t.trim().is_empty() => t.to_string(),
        _ => NO_TEXT_DETECTED.to_string(),
    }
}
