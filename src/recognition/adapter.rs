use super::{RecognitionMode, TextRecognizer, VisionClient};
use crate::config::RecognitionConfig;
use crate::error::{ScanError, ScanResult};
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Resets the in-flight flag however the call ends, including cancellation
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Dispatches recognition to the local or remote engine, one call at a time
#[derive(Clone)]
pub struct TextAdapter {
    local: Option<Arc<dyn TextRecognizer>>,
    remote: Option<Arc<dyn TextRecognizer>>,
    timeout: Option<Duration>,
    in_flight: Arc<AtomicBool>,
}

impl TextAdapter {
    pub fn new(
        local: Option<Arc<dyn TextRecognizer>>,
        remote: Option<Arc<dyn TextRecognizer>>,
    ) -> Self {
        Self {
            local,
            remote,
            timeout: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bound each call; expiry fails with `Timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Engines available under this build and configuration
    pub fn from_config(config: &RecognitionConfig) -> ScanResult<Self> {
        let remote: Arc<dyn TextRecognizer> = Arc::new(VisionClient::from_config(config)?);

        #[cfg(feature = "tesseract")]
        let local: Option<Arc<dyn TextRecognizer>> =
            Some(Arc::new(super::TesseractRecognizer::from_config(config)));
        #[cfg(not(feature = "tesseract"))]
        let local: Option<Arc<dyn TextRecognizer>> = None;

        Ok(Self::new(local, Some(remote)).with_timeout(config.timeout()))
    }

    /// A fresh adapter sharing engines but with its own in-flight slot
    pub fn fork(&self) -> Self {
        Self {
            local: self.local.clone(),
            remote: self.remote.clone(),
            timeout: self.timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn supports(&self, mode: RecognitionMode) -> bool {
        self.engine(mode).is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn engine(&self, mode: RecognitionMode) -> Option<&Arc<dyn TextRecognizer>> {
        match mode {
            RecognitionMode::Local => self.local.as_ref(),
            RecognitionMode::Remote => self.remote.as_ref(),
        }
    }

    /// Recognize text in `frame`. A second call while one is pending fails
    /// immediately with `OperationInProgress`.
    pub async fn recognize(&self, frame: &Frame, mode: RecognitionMode) -> ScanResult<String> {
        let engine = self.engine(mode).cloned().ok_or_else(|| {
            ScanError::recognition_failed(format!("no {} recognition engine available", mode))
        })?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Rejected recognize on frame {}: another call is pending", frame.id);
            return Err(ScanError::OperationInProgress);
        }
        let _guard = InFlight(Arc::clone(&self.in_flight));

        debug!("Recognizing frame {} with {} engine", frame.id, engine.name());
        match self.timeout {
            Some(after) => tokio::time::timeout(after, engine.recognize(frame))
                .await
                .map_err(|_| ScanError::Timeout { after })?,
            None => engine.recognize(frame).await,
        }
    }
}
