use super::interface::CameraBackend;
use super::source::CaptureSource;
use crate::config::CameraConfig;
use crate::error::{CamscanError, Result};
use std::sync::Arc;

/// Builder for a `CaptureSource`
pub struct CaptureSourceBuilder {
    backend: Option<Arc<dyn CameraBackend>>,
    config: Option<CameraConfig>,
}

impl CaptureSourceBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            config: None,
        }
    }

    /// Use an explicit backend (mock, custom platform)
    pub fn backend(mut self, backend: Arc<dyn CameraBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Camera settings for the platform backend
    pub fn config(mut self, config: CameraConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<CaptureSource> {
        if let Some(backend) = self.backend {
            return Ok(CaptureSource::new(backend));
        }

        let config = self
            .config
            .ok_or_else(|| CamscanError::system("Camera backend or configuration must be specified"))?;

        platform_backend(config).map(CaptureSource::new)
    }
}

impl Default for CaptureSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
fn platform_backend(config: CameraConfig) -> Result<Arc<dyn CameraBackend>> {
    let backend = super::gst_backend::GstCameraBackend::new(config)?;
    Ok(Arc::new(backend))
}

#[cfg(not(all(feature = "camera", target_os = "linux")))]
fn platform_backend(_config: CameraConfig) -> Result<Arc<dyn CameraBackend>> {
    Err(CamscanError::system(
        "No camera backend available on this platform; build with the `camera` feature on Linux",
    ))
}
