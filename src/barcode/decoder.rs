use crate::config::ScanRegion;
use crate::error::ScanResult;
use crate::frame::Frame;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// Barcode family a payload was read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Symbology {
    QrCode,
    /// Any other format, named the way the decoding library names it
    /// (`CODE_128`, `EAN_13`, ...)
    Other(String),
}

impl fmt::Display for Symbology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbology::QrCode => f.write_str("QR_CODE"),
            Symbology::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedCode {
    pub payload: String,
    pub symbology: Symbology,
}

/// Single-frame barcode decoding strategy.
///
/// `Ok(None)` means the frame was readable but held no code. `Err` means the
/// frame itself could not be used; continuous decoding skips such frames.
pub trait BarcodeDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, frame: &Frame) -> ScanResult<Option<DecodedCode>>;
}

/// QR decoding with `rqrr`
#[derive(Debug, Clone, Default)]
pub struct QrDecoder {
    region: Option<ScanRegion>,
}

impl QrDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only look inside `region` of each frame
    pub fn with_region(region: Option<ScanRegion>) -> Self {
        Self { region }
    }

}

fn crop(luma: GrayImage, region: Option<ScanRegion>) -> GrayImage {
    match region {
        Some(region) => {
            let (x, y, w, h) = region.to_pixels(luma.width(), luma.height());
            image::imageops::crop_imm(&luma, x, y, w, h).to_image()
        }
        None => luma,
    }
}

impl BarcodeDecoder for QrDecoder {
    fn name(&self) -> &'static str {
        "rqrr"
    }

    fn decode(&self, frame: &Frame) -> ScanResult<Option<DecodedCode>> {
        let gray = crop(frame.to_luma()?, self.region);
        let (width, height) = (gray.width() as usize, gray.height() as usize);

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(width, height, |x, y| {
            gray.get_pixel(x as u32, y as u32).0[0]
        });

        let grids = prepared.detect_grids();
        trace!("Frame {}: {} candidate QR grid(s)", frame.id, grids.len());

        for grid in grids {
            match grid.decode() {
                Ok((_, content)) => {
                    return Ok(Some(DecodedCode {
                        payload: content,
                        symbology: Symbology::QrCode,
                    }));
                }
                Err(e) => {
                    debug!("QR grid decode failed on frame {}: {:?}", frame.id, e);
                }
            }
        }

        Ok(None)
    }
}

/// QR through `rqrr` first, then every other format `rxing` reads
/// (EAN/UPC, Code 128, Code 39, ITF, Data Matrix, ...)
#[derive(Debug, Clone, Default)]
pub struct MultiFormatDecoder {
    qr: QrDecoder,
    region: Option<ScanRegion>,
}

impl MultiFormatDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(region: Option<ScanRegion>) -> Self {
        Self {
            qr: QrDecoder::with_region(region),
            region,
        }
    }
}

impl BarcodeDecoder for MultiFormatDecoder {
    fn name(&self) -> &'static str {
        "rqrr+rxing"
    }

    fn decode(&self, frame: &Frame) -> ScanResult<Option<DecodedCode>> {
        if let Some(code) = self.qr.decode(frame)? {
            return Ok(Some(code));
        }

        let gray = crop(frame.to_luma()?, self.region);
        let (width, height) = (gray.width(), gray.height());

        match rxing::helpers::detect_in_luma(gray.into_raw(), width, height, None) {
            Ok(found) => {
                let symbology = match found.getBarcodeFormat() {
                    rxing::BarcodeFormat::QR_CODE => Symbology::QrCode,
                    other => Symbology::Other(format!("{:?}", other)),
                };
                Ok(Some(DecodedCode {
                    payload: found.getText().to_string(),
                    symbology,
                }))
            }
            Err(e) => {
                // Not-found is the common case; checksum and format misses
                // are just as unusable for this frame
                trace!("Frame {}: no code from rxing ({:?})", frame.id, e);
                Ok(None)
            }
        }
    }
}
