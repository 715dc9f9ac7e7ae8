use crate::error::ScanResult;
use crate::frame::Frame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which way the requested camera should face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Back,
    Front,
    Environment,
}

impl Facing {
    /// Label keywords that identify a camera with this facing
    pub fn label_keywords(&self) -> &'static [&'static str] {
        match self {
            Facing::Back | Facing::Environment => &["back", "rear", "environment"],
            Facing::Front => &["front", "user", "face"],
        }
    }

    /// Whether a device label advertises this facing
    pub fn matches_label(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.label_keywords().iter().any(|k| label.contains(k))
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Facing::Back => "back",
            Facing::Front => "front",
            Facing::Environment => "environment",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "back" => Ok(Facing::Back),
            "front" => Ok(Facing::Front),
            "environment" => Ok(Facing::Environment),
            other => Err(format!("unknown facing '{}'", other)),
        }
    }
}

/// A camera the platform reports as available
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDevice {
    /// Backend-specific identifier (device path for V4L2)
    pub id: String,
    /// Human-readable label
    pub label: String,
}

impl CameraDevice {
    pub fn new<S: Into<String>>(id: S, label: S) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    /// Facing inferred from the label, if it says anything about it
    pub fn facing(&self) -> Option<Facing> {
        if Facing::Front.matches_label(&self.label) {
            Some(Facing::Front)
        } else if Facing::Back.matches_label(&self.label) {
            Some(Facing::Back)
        } else {
            None
        }
    }
}

/// Pick the device matching `preferred`, otherwise the first one
pub fn select_device(devices: &[CameraDevice], preferred: Facing) -> Option<&CameraDevice> {
    devices
        .iter()
        .find(|d| preferred.matches_label(&d.label))
        .or_else(|| devices.first())
}

/// Platform camera access
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Backend identifier for logs
    fn name(&self) -> &'static str;

    /// Enumerate video input devices
    async fn list_devices(&self) -> ScanResult<Vec<CameraDevice>>;

    /// Open a live stream on `device`. Must fail with `PermissionDenied` when
    /// the platform refuses access, and must not leave anything running when
    /// it fails.
    async fn open(&self, device: &CameraDevice) -> ScanResult<Box<dyn CameraStream>>;
}

/// A live camera stream
pub trait CameraStream: Send {
    /// Copy out the current video frame. May block briefly while the
    /// pipeline produces one.
    fn snapshot(&mut self) -> ScanResult<Frame>;

    /// Stop every underlying media track. Called exactly once by the owning
    /// `CaptureHandle`.
    fn stop(&mut self);
}
