use crate::error::{ScanError, ScanResult};
use image::{DynamicImage, GrayImage, ImageFormat, ImageOutputFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

static FRAME_COUNTER: AtomicU64 = AtomicU64::new(0);

/// JPEG quality used whenever a raw frame has to be encoded for an engine
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Pixel layout of the bytes held by a [`Frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Encoded JPEG image
    Jpeg,
    /// Encoded PNG image
    Png,
    /// Packed 8-bit RGB, row major, no padding
    Rgb24,
    /// Single 8-bit luma plane, row major, no padding
    Gray8,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Jpeg | FrameFormat::Png => 0, // Variable size, compressed
            FrameFormat::Rgb24 => 3,
            FrameFormat::Gray8 => 1,
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Jpeg | FrameFormat::Png)
    }
}

/// Where a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameOrigin {
    Camera,
    Upload,
}

/// Immutable still image, either a camera snapshot or an uploaded file.
/// Adapters only ever see this type, so they do not care where it came from.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Unique frame identifier
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Frame bytes (shared, never mutated)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    pub format: FrameFormat,
    pub origin: FrameOrigin,
}

impl Frame {
    /// Create a new camera frame
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: FrameFormat) -> Self {
        Self {
            id: FRAME_COUNTER.fetch_add(1, Ordering::Relaxed),
            timestamp: SystemTime::now(),
            data: Arc::new(data),
            width,
            height,
            format,
            origin: FrameOrigin::Camera,
        }
    }

    /// Build a frame from an encoded image file (JPEG or PNG). The image is
    /// decoded once to learn its dimensions and reject unreadable input.
    pub fn from_encoded(bytes: &[u8]) -> ScanResult<Self> {
        if bytes.is_empty() {
            return Err(ScanError::recognition_failed("uploaded image is empty"));
        }

        let format = match image::guess_format(bytes) {
            Ok(ImageFormat::Jpeg) => FrameFormat::Jpeg,
            Ok(ImageFormat::Png) => FrameFormat::Png,
            Ok(other) => {
                return Err(ScanError::recognition_failed(format!(
                    "unsupported image format: {:?}",
                    other
                )))
            }
            Err(e) => {
                return Err(ScanError::recognition_failed(format!(
                    "unrecognized image data: {}",
                    e
                )))
            }
        };

        let decoded = image::load_from_memory(bytes)
            .map_err(|e| ScanError::recognition_failed(format!("failed to decode image: {}", e)))?;

        let mut frame = Self::new(bytes.to_vec(), decoded.width(), decoded.height(), format);
        frame.origin = FrameOrigin::Upload;
        Ok(frame)
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => true,
        }
    }

    /// Decode or wrap the frame bytes as an image
    pub fn to_image(&self) -> ScanResult<DynamicImage> {
        match self.format {
            FrameFormat::Jpeg | FrameFormat::Png => image::load_from_memory(&self.data)
                .map_err(|e| {
                    ScanError::recognition_failed(format!(
                        "failed to decode frame {}: {}",
                        self.id, e
                    ))
                }),
            FrameFormat::Rgb24 => RgbImage::from_raw(self.width, self.height, self.data.to_vec())
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| self.size_mismatch()),
            FrameFormat::Gray8 => GrayImage::from_raw(self.width, self.height, self.data.to_vec())
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| self.size_mismatch()),
        }
    }

    /// Luma plane of the frame
    pub fn to_luma(&self) -> ScanResult<GrayImage> {
        if self.format == FrameFormat::Gray8 {
            return GrayImage::from_raw(self.width, self.height, self.data.to_vec())
                .ok_or_else(|| self.size_mismatch());
        }
        Ok(self.to_image()?.to_luma8())
    }

    /// JPEG bytes for the frame, re-using the original bytes when already JPEG
    pub fn to_jpeg(&self, quality: u8) -> ScanResult<Vec<u8>> {
        if self.format == FrameFormat::Jpeg {
            return Ok(self.data.to_vec());
        }

        let image = self.to_image()?;
        let mut buf = Vec::new();
        image
            .to_rgb8()
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(quality))
            .map_err(|e| {
                ScanError::recognition_failed(format!("failed to encode frame {}: {}", self.id, e))
            })?;
        Ok(buf)
    }

    fn size_mismatch(&self) -> ScanError {
        ScanError::recognition_failed(format!(
            "frame {} holds {} bytes, expected {:?} for {}x{} {:?}",
            self.id,
            self.data.len(),
            self.expected_size(),
            self.width,
            self.height,
            self.format
        ))
    }
}
