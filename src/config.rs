use crate::camera::Facing;
use crate::recognition::RecognitionMode;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ScannerConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub barcode: BarcodeConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Which camera to prefer when several are available
    #[serde(default = "default_preferred_facing")]
    pub preferred_facing: Facing,

    /// Requested capture resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Requested frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BarcodeConfig {
    /// Delay between continuous decode attempts
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Optional region of interest; only this crop is handed to the decoder
    #[serde(default)]
    pub scan_region: Option<ScanRegion>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RecognitionConfig {
    /// Default engine when the caller does not pick one
    #[serde(default = "default_recognition_mode")]
    pub mode: RecognitionMode,

    /// Upper bound on one recognize call, 0 disables it
    #[serde(default = "default_recognition_timeout_secs")]
    pub timeout_secs: u64,

    /// Tesseract language code
    #[serde(default = "default_language")]
    pub language: String,

    /// Characters the local engine may emit
    #[serde(default = "default_char_whitelist")]
    pub char_whitelist: Option<String>,

    /// Directory holding Tesseract traineddata files
    #[serde(default)]
    pub tessdata_path: Option<String>,

    /// Remote text-detection endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Credential for the remote endpoint. Supply it through the environment,
    /// never in a checked-in file.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SessionConfig {
    /// Capacity of the session event bus
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

/// Fractional region of interest, all values in 0..=1 relative to the frame
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ScanRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ScanRegion {
    /// Centered region covering the given fraction of each dimension
    pub fn centered(width: f32, height: f32) -> Self {
        Self {
            x: (1.0 - width) / 2.0,
            y: (1.0 - height) / 2.0,
            width,
            height,
        }
    }

    pub fn is_valid(&self) -> bool {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        in_unit(self.x)
            && in_unit(self.y)
            && self.width > 0.0
            && self.height > 0.0
            && self.x + self.width <= 1.0 + f32::EPSILON
            && self.y + self.height <= 1.0 + f32::EPSILON
    }

    /// Pixel rectangle (x, y, width, height) for a frame of the given size
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
        let x = (self.x * frame_width as f32).floor() as u32;
        let y = (self.y * frame_height as f32).floor() as u32;
        let w = ((self.width * frame_width as f32).round() as u32)
            .clamp(1, frame_width.saturating_sub(x).max(1));
        let h = ((self.height * frame_height as f32).round() as u32)
            .clamp(1, frame_height.saturating_sub(y).max(1));
        (x, y, w, h)
    }
}

impl ScannerConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("camscan.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.preferred_facing", "environment")?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("barcode.scan_interval_ms", default_scan_interval_ms())?
            .set_default("recognition.mode", "remote")?
            .set_default(
                "recognition.timeout_secs",
                default_recognition_timeout_secs(),
            )?
            .set_default("recognition.language", default_language())?
            .set_default("recognition.endpoint", default_endpoint())?
            .set_default(
                "session.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // CAMSCAN_RECOGNITION__API_KEY -> recognition.api_key
            .add_source(
                Environment::with_prefix("CAMSCAN")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: ScannerConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!(
            "Final configuration: {:#?} (api key {})",
            config,
            if config.recognition.api_key.is_some() {
                "set"
            } else {
                "unset"
            }
        );

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.barcode.scan_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Barcode scan_interval_ms must be greater than 0".to_string(),
            ));
        }

        if let Some(region) = &self.barcode.scan_region {
            if !region.is_valid() {
                return Err(ConfigError::Message(format!(
                    "Barcode scan_region {:?} must lie within the frame and have a positive area",
                    region
                )));
            }
        }

        if self.recognition.mode == RecognitionMode::Remote
            && self.recognition.endpoint.trim().is_empty()
        {
            return Err(ConfigError::Message(
                "Recognition endpoint must be set for remote mode".to_string(),
            ));
        }

        if self.session.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl RecognitionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl BarcodeConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            barcode: BarcodeConfig::default(),
            recognition: RecognitionConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            preferred_facing: default_preferred_facing(),
            resolution: default_camera_resolution(),
            fps: default_camera_fps(),
        }
    }
}

impl Default for BarcodeConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_scan_interval_ms(),
            scan_region: None,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            mode: default_recognition_mode(),
            timeout_secs: default_recognition_timeout_secs(),
            language: default_language(),
            char_whitelist: default_char_whitelist(),
            tessdata_path: None,
            endpoint: default_endpoint(),
            api_key: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

// Default value functions
fn default_preferred_facing() -> Facing {
    Facing::Environment
}
fn default_camera_resolution() -> (u32, u32) {
    (1280, 720)
}
fn default_camera_fps() -> u32 {
    30
}

fn default_scan_interval_ms() -> u64 {
    200
}

fn default_recognition_mode() -> RecognitionMode {
    RecognitionMode::Remote
}
fn default_recognition_timeout_secs() -> u64 {
    30
}
fn default_language() -> String {
    "eng".to_string()
}
fn default_char_whitelist() -> Option<String> {
    Some("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789".to_string())
}
fn default_endpoint() -> String {
    "https://vision.googleapis.com/v1/images:annotate".to_string()
}

fn default_event_bus_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ScannerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.camera.preferred_facing, Facing::Environment);
        assert_eq!(config.barcode.scan_interval(), Duration::from_millis(200));
        assert_eq!(config.recognition.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_config_validation() {
        let mut config = ScannerConfig::default();
        config.camera.resolution = (0, 0);
        assert!(config.validate().is_err());

        config.camera.resolution = (640, 480);
        assert!(config.validate().is_ok());

        config.barcode.scan_region = Some(ScanRegion {
            x: 0.5,
            y: 0.5,
            width: 0.8,
            height: 0.2,
        });
        assert!(config.validate().is_err());

        config.barcode.scan_region = Some(ScanRegion::centered(0.6, 0.4));
        assert!(config.validate().is_ok());

        config.recognition.endpoint = "  ".to_string();
        assert!(config.validate().is_err());

        config.recognition.mode = RecognitionMode::Local;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let mut config = RecognitionConfig::default();
        config.timeout_secs = 0;
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
preferred_facing = "front"
fps = 15

[barcode]
scan_interval_ms = 300
scan_region = {{ x = 0.15, y = 0.3, width = 0.7, height = 0.3 }}

[recognition]
mode = "local"
language = "deu"
"#
        )
        .unwrap();

        let config = ScannerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.camera.preferred_facing, Facing::Front);
        assert_eq!(config.camera.fps, 15);
        assert_eq!(config.camera.resolution, (1280, 720));
        assert_eq!(config.barcode.scan_interval_ms, 300);
        assert!(config.barcode.scan_region.is_some());
        assert_eq!(config.recognition.mode, RecognitionMode::Local);
        assert_eq!(config.recognition.language, "deu");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScannerConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.camera.fps, 30);
        assert_eq!(config.recognition.mode, RecognitionMode::Remote);
    }

    #[test]
    fn test_scan_region_to_pixels() {
        let region = ScanRegion::centered(0.5, 0.5);
        assert_eq!(region.to_pixels(640, 480), (160, 120, 320, 240));
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = ScannerConfig::default();
        config.recognition.api_key = Some("secret".to_string());
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("secret"));
    }
}
