use super::interface::{select_device, CameraBackend, CameraDevice, CameraStream, Facing};
use crate::error::{ScanError, ScanResult};
use crate::frame::Frame;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Counters for acquisitions and releases performed through a `CaptureSource`
#[derive(Debug, Default)]
pub struct CaptureStats {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl CaptureStats {
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Handles currently holding a live camera
    pub fn live(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }
}

struct HandleInner {
    id: Uuid,
    device: CameraDevice,
    acquired_at: DateTime<Utc>,
    stream: Mutex<Option<Box<dyn CameraStream>>>,
    stats: Arc<CaptureStats>,
}

impl HandleInner {
    fn snapshot(&self) -> ScanResult<Frame> {
        match self.stream.lock().as_mut() {
            Some(stream) => stream.snapshot(),
            None => Err(ScanError::invalid_state(format!(
                "capture handle {} already released",
                self.id
            ))),
        }
    }

    fn release(&self) -> bool {
        let stream = self.stream.lock().take();
        match stream {
            Some(mut stream) => {
                stream.stop();
                self.stats.released.fetch_add(1, Ordering::SeqCst);
                info!(
                    "Released camera '{}' (handle {}, held since {})",
                    self.device.label, self.id, self.acquired_at
                );
                true
            }
            None => {
                debug!("Capture handle {} already released", self.id);
                false
            }
        }
    }

    fn is_live(&self) -> bool {
        self.stream.lock().is_some()
    }
}

/// Exclusive ownership of an open camera stream.
///
/// Not `Clone`: exactly one owner may release it. Dropping the handle
/// releases the camera if nobody did so explicitly.
pub struct CaptureHandle {
    inner: Arc<HandleInner>,
}

impl CaptureHandle {
    fn new(device: CameraDevice, stream: Box<dyn CameraStream>, stats: Arc<CaptureStats>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                device,
                acquired_at: Utc::now(),
                stream: Mutex::new(Some(stream)),
                stats,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn device(&self) -> &CameraDevice {
        &self.inner.device
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.inner.acquired_at
    }

    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    /// Snapshot the current frame. Fails with `InvalidState` once released.
    pub fn capture_frame(&self) -> ScanResult<Frame> {
        self.inner.snapshot()
    }

    /// Stop the stream. Returns `false` if it was already released.
    pub fn release(&self) -> bool {
        self.inner.release()
    }

    /// Non-owning frame access for decode loops. A tap never keeps the
    /// camera alive and cannot release it.
    pub fn tap(&self) -> FrameTap {
        FrameTap {
            handle_id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if self.inner.release() {
            warn!(
                "Capture handle {} dropped while live; camera released on teardown",
                self.inner.id
            );
        }
    }
}

impl fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Read-only view of a `CaptureHandle`'s frames
#[derive(Clone)]
pub struct FrameTap {
    handle_id: Uuid,
    inner: Weak<HandleInner>,
}

impl FrameTap {
    pub fn handle_id(&self) -> Uuid {
        self.handle_id
    }

    pub fn snapshot(&self) -> ScanResult<Frame> {
        match self.inner.upgrade() {
            Some(inner) => inner.snapshot(),
            None => Err(ScanError::invalid_state(format!(
                "capture handle {} no longer exists",
                self.handle_id
            ))),
        }
    }

    pub fn is_live(&self) -> bool {
        self.inner.upgrade().map(|i| i.is_live()).unwrap_or(false)
    }
}

/// Capture Source: camera acquisition, snapshots and uploads
pub struct CaptureSource {
    backend: Arc<dyn CameraBackend>,
    stats: Arc<CaptureStats>,
}

impl CaptureSource {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    pub async fn list_devices(&self) -> ScanResult<Vec<CameraDevice>> {
        self.backend.list_devices().await
    }

    /// Open the camera best matching `preferred`
    pub async fn acquire(&self, preferred: Facing) -> ScanResult<CaptureHandle> {
        let devices = self.backend.list_devices().await?;
        debug!(
            "{} backend reported {} camera device(s)",
            self.backend.name(),
            devices.len()
        );

        let device = select_device(&devices, preferred)
            .cloned()
            .ok_or(ScanError::NoDeviceFound)?;

        if !preferred.matches_label(&device.label) {
            debug!(
                "No '{}' camera among {} device(s); falling back to '{}'",
                preferred,
                devices.len(),
                device.label
            );
        }

        let stream = self.backend.open(&device).await?;
        self.stats.acquired.fetch_add(1, Ordering::SeqCst);

        let handle = CaptureHandle::new(device, stream, Arc::clone(&self.stats));
        info!(
            "Acquired camera '{}' ({}) as handle {}",
            handle.device().label,
            handle.device().id,
            handle.id()
        );
        Ok(handle)
    }

    /// Snapshot the current frame from a live handle
    pub fn capture_frame(&self, handle: &CaptureHandle) -> ScanResult<Frame> {
        handle.capture_frame()
    }

    /// Decode an uploaded image into the same `Frame` type a snapshot yields
    pub fn from_upload(&self, bytes: &[u8]) -> ScanResult<Frame> {
        let frame = Frame::from_encoded(bytes)?;
        debug!(
            "Accepted uploaded image as frame {} ({}x{}, {:?})",
            frame.id, frame.width, frame.height, frame.format
        );
        Ok(frame)
    }

    /// Idempotent release
    pub fn release(&self, handle: &CaptureHandle) {
        handle.release();
    }
}
