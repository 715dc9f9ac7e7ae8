use super::{text_or_sentinel, TextRecognizer};
use crate::config::RecognitionConfig;
use crate::error::{ScanError, ScanResult};
use crate::frame::{Frame, DEFAULT_JPEG_QUALITY};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
pub struct AnnotateRequest {
    pub requests: Vec<AnnotateImageRequest>,
}

#[derive(Debug, Serialize)]
pub struct AnnotateImageRequest {
    pub image: ImageContent,
    pub features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
pub struct ImageContent {
    /// Base64-encoded image bytes
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
}

impl AnnotateRequest {
    /// One TEXT_DETECTION request for an encoded image
    pub fn text_detection(image: &[u8]) -> Self {
        Self {
            requests: vec![AnnotateImageRequest {
                image: ImageContent {
                    content: STANDARD.encode(image),
                },
                features: vec![Feature {
                    kind: "TEXT_DETECTION".to_string(),
                }],
            }],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AnnotateResponse {
    #[serde(default)]
    pub responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotateImageResponse {
    pub full_text_annotation: Option<TextAnnotation>,
    pub error: Option<ApiStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TextAnnotation {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiStatus>,
}

/// Text of the first response. A response without `fullTextAnnotation`
/// means nothing was found, not that recognition failed.
pub fn parse_annotate_response(response: &AnnotateResponse) -> ScanResult<String> {
    let Some(first) = response.responses.first() else {
        return Ok(text_or_sentinel(None));
    };

    if let Some(status) = &first.error {
        return Err(ScanError::recognition_failed(format!(
            "text detection error {}: {}",
            status.code, status.message
        )));
    }

    Ok(text_or_sentinel(
        first.full_text_annotation.as_ref().map(|a| a.text.as_str()),
    ))
}

/// Client for an `images:annotate` style text-detection endpoint
pub struct VisionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl VisionClient {
    /// The request deadline is owned by `TextAdapter`, not the HTTP client
    pub fn new<S: Into<String>>(endpoint: S, api_key: Option<String>) -> ScanResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ScanError::network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn from_config(config: &RecognitionConfig) -> ScanResult<Self> {
        if config.api_key.is_none() {
            warn!("No API key configured for {}; requests may be rejected", config.endpoint);
        }
        Self::new(config.endpoint.clone(), config.api_key.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn annotate(&self, request: &AnnotateRequest) -> ScanResult<AnnotateResponse> {
        let mut call = self.http.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            call = call.query(&[("key", key)]);
        }

        let response = call.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .filter(|m| !m.is_empty())
                .unwrap_or(body);
            return Err(ScanError::network(format!("HTTP {}: {}", status, message)));
        }

        response
            .json::<AnnotateResponse>()
            .await
            .map_err(|e| ScanError::recognition_failed(format!("malformed response: {}", e)))
    }
}

#[async_trait]
impl TextRecognizer for VisionClient {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn recognize(&self, frame: &Frame) -> ScanResult<String> {
        let jpeg = frame.to_jpeg(DEFAULT_JPEG_QUALITY)?;
        debug!(
            "Sending frame {} ({} JPEG bytes) to {}",
            frame.id,
            jpeg.len(),
            self.endpoint
        );

        let request = AnnotateRequest::text_detection(&jpeg);
        let response = self.annotate(&request).await?;
        let text = parse_annotate_response(&response)?;

        info!("Remote text detection returned {} chars", text.chars().count());
        Ok(text)
    }
}
