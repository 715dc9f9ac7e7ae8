mod builder;
#[cfg(all(feature = "camera", target_os = "linux"))]
mod gst_backend;
mod interface;
mod mock;
mod source;
#[cfg(test)]
mod tests;

pub use builder::CaptureSourceBuilder;
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use gst_backend::GstCameraBackend;
pub use interface::{select_device, CameraBackend, CameraDevice, CameraStream, Facing};
pub use mock::{MockCameraBackend, MockCameraStats};
pub use source::{CaptureHandle, CaptureSource, CaptureStats, FrameTap};
