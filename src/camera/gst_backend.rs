use super::interface::{CameraBackend, CameraDevice, CameraStream};
use crate::config::CameraConfig;
use crate::error::{ScanError, ScanResult};
use crate::frame::{Frame, FrameFormat};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::{ClockTime, DeviceMonitor, MessageView, Pipeline, State};
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use tracing::{debug, error, info, trace, warn};

/// V4L2 cameras through a GStreamer pipeline ending in an appsink
pub struct GstCameraBackend {
    config: CameraConfig,
}

impl GstCameraBackend {
    pub fn new(config: CameraConfig) -> ScanResult<Self> {
        gstreamer::init().map_err(|e| {
            ScanError::invalid_state(format!("Failed to initialize GStreamer: {}", e))
        })?;

        info!(
            "GStreamer camera backend ready ({}x{} @ {}fps)",
            config.resolution.0, config.resolution.1, config.fps
        );
        Ok(Self { config })
    }

    fn enumerate() -> ScanResult<Vec<CameraDevice>> {
        let monitor = DeviceMonitor::new();
        monitor.add_filter(Some("Video/Source"), None);
        monitor.start().map_err(|e| {
            ScanError::invalid_state(format!("Failed to start device monitor: {}", e))
        })?;

        let devices = monitor
            .devices()
            .into_iter()
            .filter_map(|device| {
                let label = device.display_name().to_string();
                let properties = device.properties()?;
                let path = properties
                    .get::<String>("api.v4l2.path")
                    .or_else(|_| properties.get::<String>("device.path"))
                    .ok()?;
                Some(CameraDevice::new(path, label))
            })
            .collect();

        monitor.stop();
        Ok(devices)
    }

    /// Probe the device node so a refused open surfaces as `PermissionDenied`
    /// instead of a generic pipeline failure.
    fn check_access(path: &str) -> ScanResult<()> {
        match std::fs::OpenOptions::new().read(true).write(true).open(path) {
            Ok(_) => Ok(()),
            Err(e) => match e.raw_os_error() {
                Some(code) if code == libc::EACCES || code == libc::EPERM => {
                    Err(ScanError::PermissionDenied)
                }
                Some(code) if code == libc::ENOENT || code == libc::ENODEV || code == libc::ENXIO => {
                    Err(ScanError::NoDeviceFound)
                }
                _ => Err(ScanError::invalid_state(format!(
                    "Cannot open camera {}: {}",
                    path, e
                ))),
            },
        }
    }

    fn build_pipeline_string(&self, path: &str) -> String {
        let (width, height) = self.config.resolution;
        format!(
            "v4l2src device={} do-timestamp=true ! \
             videoconvert ! videoscale ! videorate ! \
             video/x-raw,format=RGB,width={},height={},framerate={}/1 ! \
             appsink name=sink sync=false max-buffers=1 drop=true",
            path, width, height, self.config.fps
        )
    }

    fn start_pipeline(&self, device: &CameraDevice) -> ScanResult<GstCameraStream> {
        Self::check_access(&device.id)?;

        let pipeline_desc = self.build_pipeline_string(&device.id);
        debug!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| ScanError::invalid_state(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| ScanError::invalid_state("Failed to downcast to Pipeline"))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| ScanError::invalid_state("Failed to get appsink element"))?
            .downcast::<AppSink>()
            .map_err(|_| ScanError::invalid_state("Failed to downcast to AppSink"))?;

        let stream = GstCameraStream {
            pipeline,
            appsink,
            stopped: false,
        };

        // From here on `stream` owns the pipeline; dropping it on an error
        // path sets it back to Null.
        if let Err(e) = stream.pipeline.set_state(State::Playing) {
            return Err(stream.pipeline_error(format!("Failed to start pipeline: {}", e)));
        }

        let (result, current, _) = stream.pipeline.state(ClockTime::from_seconds(5));
        if let Err(e) = result {
            return Err(stream.pipeline_error(format!("Pipeline did not reach Playing: {}", e)));
        }

        info!(
            "GStreamer pipeline for '{}' is {:?}",
            device.label, current
        );
        Ok(stream)
    }
}

#[async_trait]
impl CameraBackend for GstCameraBackend {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    async fn list_devices(&self) -> ScanResult<Vec<CameraDevice>> {
        tokio::task::spawn_blocking(Self::enumerate)
            .await
            .map_err(|e| ScanError::invalid_state(format!("Device enumeration panicked: {}", e)))?
    }

    async fn open(&self, device: &CameraDevice) -> ScanResult<Box<dyn CameraStream>> {
        let backend = GstCameraBackend {
            config: self.config.clone(),
        };
        let device = device.clone();
        let stream = tokio::task::spawn_blocking(move || backend.start_pipeline(&device))
            .await
            .map_err(|e| ScanError::invalid_state(format!("Camera open panicked: {}", e)))??;
        Ok(Box::new(stream))
    }
}

struct GstCameraStream {
    pipeline: Pipeline,
    appsink: AppSink,
    stopped: bool,
}

impl GstCameraStream {
    /// Turn the first error on the bus into a `ScanError`, falling back to `context`
    fn pipeline_error(&self, context: String) -> ScanError {
        let bus_error = self.pipeline.bus().and_then(|bus| {
            bus.pop_filtered(&[gstreamer::MessageType::Error])
                .and_then(|msg| match msg.view() {
                    MessageView::Error(err) => Some(err.error().to_string()),
                    _ => None,
                })
        });

        match bus_error {
            Some(message) if message.to_lowercase().contains("permission denied") => {
                error!("Camera access denied: {}", message);
                ScanError::PermissionDenied
            }
            Some(message) => {
                error!("{}: {}", context, message);
                ScanError::invalid_state(format!("{}: {}", context, message))
            }
            None => {
                error!("{}", context);
                ScanError::invalid_state(context)
            }
        }
    }
}

impl CameraStream for GstCameraStream {
    fn snapshot(&mut self) -> ScanResult<Frame> {
        if self.stopped {
            return Err(ScanError::invalid_state("camera stream stopped"));
        }

        let sample = self
            .appsink
            .try_pull_sample(ClockTime::from_mseconds(500))
            .ok_or_else(|| ScanError::invalid_state("No frame available from camera"))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| ScanError::invalid_state("No buffer in sample"))?;
        let caps = sample
            .caps()
            .ok_or_else(|| ScanError::invalid_state("No caps in sample"))?;
        let video_info = VideoInfo::from_caps(caps)
            .map_err(|e| ScanError::invalid_state(format!("Failed to get video info: {}", e)))?;
        let map = buffer
            .map_readable()
            .map_err(|e| ScanError::invalid_state(format!("Failed to map buffer: {}", e)))?;

        let width = video_info.width();
        let height = video_info.height();
        let stride = video_info.stride()[0] as usize;
        let row_bytes = width as usize * 3;
        let bytes = map.as_slice();

        // Drop stride padding so the frame is tightly packed RGB
        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let line = bytes
                .get(start..start + row_bytes)
                .ok_or_else(|| ScanError::invalid_state("Camera buffer shorter than caps"))?;
            data.extend_from_slice(line);
        }

        trace!("Captured RGB frame ({}x{}, stride {})", width, height, stride);
        Ok(Frame::new(data, width, height, FrameFormat::Rgb24))
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Err(e) = self.pipeline.set_state(State::Null) {
            warn!("Failed to stop camera pipeline cleanly: {}", e);
        } else {
            debug!("Camera pipeline set to Null");
        }
    }
}

impl Drop for GstCameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}
