use super::interface::{CameraBackend, CameraDevice, CameraStream};
use crate::error::{ScanError, ScanResult};
use crate::frame::{Frame, FrameFormat};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Call counters shared between a mock backend and its streams
#[derive(Debug, Default)]
pub struct MockCameraStats {
    pub opened: AtomicUsize,
    pub stopped: AtomicUsize,
    pub snapshots: AtomicUsize,
    last_opened: Mutex<Option<String>>,
}

impl MockCameraStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn snapshots(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    pub fn last_opened(&self) -> Option<String> {
        self.last_opened.lock().clone()
    }
}

/// Camera backend for tests and hardware-less runs
pub struct MockCameraBackend {
    devices: Vec<CameraDevice>,
    deny_permission: AtomicBool,
    open_delay: Option<Duration>,
    frame: Frame,
    stats: Arc<MockCameraStats>,
}

impl MockCameraBackend {
    pub fn new(devices: Vec<CameraDevice>) -> Self {
        Self {
            devices,
            deny_permission: AtomicBool::new(false),
            open_delay: None,
            frame: Frame::new(vec![255; 64 * 48], 64, 48, FrameFormat::Gray8),
            stats: Arc::new(MockCameraStats::default()),
        }
    }

    /// A front and a rear camera, front listed first
    pub fn phone() -> Self {
        Self::new(vec![
            CameraDevice::new("mock:0", "Front Camera"),
            CameraDevice::new("mock:1", "Back Camera"),
        ])
    }

    /// Frame returned by every snapshot
    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frame = frame;
        self
    }

    /// Simulate a slow permission prompt
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn deny_permission(&self, deny: bool) {
        self.deny_permission.store(deny, Ordering::SeqCst);
    }

    pub fn stats(&self) -> Arc<MockCameraStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl CameraBackend for MockCameraBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn list_devices(&self) -> ScanResult<Vec<CameraDevice>> {
        Ok(self.devices.clone())
    }

    async fn open(&self, device: &CameraDevice) -> ScanResult<Box<dyn CameraStream>> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(ScanError::PermissionDenied);
        }

        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        *self.stats.last_opened.lock() = Some(device.id.clone());
        debug!("Mock camera '{}' opened", device.label);

        Ok(Box::new(MockCameraStream {
            frame: self.frame.clone(),
            stats: Arc::clone(&self.stats),
            stopped: false,
        }))
    }
}

struct MockCameraStream {
    frame: Frame,
    stats: Arc<MockCameraStats>,
    stopped: bool,
}

impl CameraStream for MockCameraStream {
    fn snapshot(&mut self) -> ScanResult<Frame> {
        if self.stopped {
            return Err(ScanError::invalid_state("mock stream stopped"));
        }
        self.stats.snapshots.fetch_add(1, Ordering::SeqCst);
        let mut frame = self.frame.clone();
        frame.timestamp = std::time::SystemTime::now();
        Ok(frame)
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stats.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}
