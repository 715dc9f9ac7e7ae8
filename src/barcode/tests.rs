use super::*;
use crate::camera::{CaptureHandle, CaptureSource, Facing, MockCameraBackend};
use crate::error::{ScanError, ScanResult};
use crate::frame::{Frame, FrameFormat};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Reports a payload once it has seen `after` frames
struct ScriptedDecoder {
    seen: AtomicUsize,
    after: usize,
    payload: &'static str,
}

impl ScriptedDecoder {
    fn new(after: usize, payload: &'static str) -> Self {
        Self {
            seen: AtomicUsize::new(0),
            after,
            payload,
        }
    }
}

impl BarcodeDecoder for ScriptedDecoder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn decode(&self, _frame: &Frame) -> ScanResult<Option<DecodedCode>> {
        let seen = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if seen == 1 {
            // First frame is unreadable; the loop must shrug it off
            return Err(ScanError::recognition_failed("corrupt frame"));
        }
        if seen >= self.after {
            Ok(Some(DecodedCode {
                payload: self.payload.to_string(),
                symbology: Symbology::Other("EAN_13".to_string()),
            }))
        } else {
            Ok(None)
        }
    }
}

async fn live_handle() -> (CaptureSource, CaptureHandle) {
    let source = CaptureSource::new(Arc::new(MockCameraBackend::phone()));
    let handle = source.acquire(Facing::Back).await.unwrap();
    (source, handle)
}

#[test]
fn test_qr_decoder_blank_frame_has_no_code() {
    let decoder = QrDecoder::new();
    let frame = Frame::new(vec![255; 120 * 80], 120, 80, FrameFormat::Gray8);
    assert_eq!(decoder.decode(&frame).unwrap(), None);
}

#[test]
fn test_qr_decoder_with_region_crops() {
    let decoder = QrDecoder::with_region(Some(crate::config::ScanRegion::centered(0.6, 0.4)));
    let frame = Frame::new(vec![0; 3 * 100 * 50], 100, 50, FrameFormat::Rgb24);
    assert_eq!(decoder.decode(&frame).unwrap(), None);
}

#[test]
fn test_qr_decoder_rejects_malformed_frame() {
    let decoder = QrDecoder::new();
    let frame = Frame::new(vec![0; 10], 120, 80, FrameFormat::Gray8);
    assert!(matches!(
        decoder.decode(&frame),
        Err(ScanError::RecognitionFailed { .. })
    ));
}

/// Render a Code 128 symbol for `payload` as a grayscale frame
fn code128_frame(payload: &str) -> Frame {
    use rxing::Writer;

    let matrix = rxing::MultiFormatWriter::default()
        .encode(payload, &rxing::BarcodeFormat::CODE_128, 400, 100)
        .unwrap();
    let (width, height) = (matrix.getWidth(), matrix.getHeight());

    let mut pixels = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.push(if matrix.get(x, y) { 0 } else { 255 });
        }
    }
    Frame::new(pixels, width, height, FrameFormat::Gray8)
}

#[test]
fn test_multi_format_decoder_reads_code128() {
    let decoder = MultiFormatDecoder::new();
    let code = decoder.decode(&code128_frame("0123456789")).unwrap().unwrap();

    assert_eq!(code.payload, "0123456789");
    assert_eq!(code.symbology, Symbology::Other("CODE_128".to_string()));

    // The QR-only decoder does not see linear codes
    assert_eq!(QrDecoder::new().decode(&code128_frame("0123456789")).unwrap(), None);
}

#[test]
fn test_multi_format_decoder_blank_frame_has_no_code() {
    let decoder = MultiFormatDecoder::with_region(Some(crate::config::ScanRegion::centered(0.8, 0.8)));
    let frame = Frame::new(vec![255; 120 * 80], 120, 80, FrameFormat::Gray8);
    assert_eq!(decoder.decode(&frame).unwrap(), None);
}

#[tokio::test]
async fn test_continuous_decode_reads_linear_code_from_camera() {
    let source = CaptureSource::new(Arc::new(
        MockCameraBackend::phone().with_frame(code128_frame("0123456789")),
    ));
    let handle = source.acquire(Facing::Back).await.unwrap();
    let adapter = BarcodeAdapter::new(Arc::new(MultiFormatDecoder::new()), Duration::from_millis(5));

    let (tx, mut rx) = mpsc::unbounded_channel();
    adapter
        .start_continuous_decode(
            &handle,
            move |code| {
                let _ = tx.send(code);
            },
            |_| {},
        )
        .unwrap();

    let code = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code.payload, "0123456789");
    source.release(&handle);
}

#[tokio::test]
async fn test_continuous_decode_fires_once_and_stops() {
    let (_source, handle) = live_handle().await;
    let adapter = BarcodeAdapter::new(
        Arc::new(ScriptedDecoder::new(3, "0123456789")),
        Duration::from_millis(5),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let error_tx = tx.clone();
    adapter
        .start_continuous_decode(
            &handle,
            move |code| {
                let _ = tx.send(Ok(code));
            },
            move |err| {
                let _ = error_tx.send(Err(err));
            },
        )
        .unwrap();

    let first = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.payload, "0123456789");

    // Both senders are gone once the loop ends, so the channel closes
    assert!(timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .is_none());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!adapter.is_running(&handle));
}

#[tokio::test]
async fn test_second_loop_on_same_handle_is_rejected() {
    let (_source, handle) = live_handle().await;
    let adapter = BarcodeAdapter::new(
        Arc::new(ScriptedDecoder::new(usize::MAX, "never")),
        Duration::from_millis(5),
    );

    adapter.start_continuous_decode(&handle, |_| {}, |_| {}).unwrap();
    assert_eq!(
        adapter.start_continuous_decode(&handle, |_| {}, |_| {}),
        Err(ScanError::OperationInProgress)
    );

    adapter.stop(&handle);
    adapter.stop(&handle);
    assert!(!adapter.is_running(&handle));

    // A fresh loop may start once the old one is gone
    adapter.start_continuous_decode(&handle, |_| {}, |_| {}).unwrap();
    adapter.stop(&handle);
}

#[tokio::test]
async fn test_stop_suppresses_callbacks() {
    let (_source, handle) = live_handle().await;
    let adapter = BarcodeAdapter::new(
        Arc::new(ScriptedDecoder::new(usize::MAX, "never")),
        Duration::from_millis(5),
    );
    let fired = Arc::new(AtomicUsize::new(0));

    let on_result = Arc::clone(&fired);
    let on_error = Arc::clone(&fired);
    adapter
        .start_continuous_decode(
            &handle,
            move |_| {
                on_result.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                on_error.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    adapter.stop(&handle);
    handle.release();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_lost_camera_reports_error() {
    let (_source, handle) = live_handle().await;
    let adapter = BarcodeAdapter::new(
        Arc::new(ScriptedDecoder::new(usize::MAX, "never")),
        Duration::from_millis(5),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    adapter
        .start_continuous_decode(&handle, |_| {}, move |err| {
            let _ = tx.send(err);
        })
        .unwrap();

    // Camera disappears underneath a running loop without `stop`
    handle.release();

    let err = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(err, ScanError::NoDeviceFound);
}

#[tokio::test]
async fn test_start_on_released_handle_is_invalid() {
    let (_source, handle) = live_handle().await;
    handle.release();

    let adapter = BarcodeAdapter::new(Arc::new(QrDecoder::new()), Duration::from_millis(5));
    assert!(matches!(
        adapter.start_continuous_decode(&handle, |_| {}, |_| {}),
        Err(ScanError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_decode_once_on_blank_upload() {
    let adapter = BarcodeAdapter::new(Arc::new(QrDecoder::new()), Duration::from_millis(5));
    let frame = Frame::new(vec![200; 64 * 64], 64, 64, FrameFormat::Gray8);
    assert_eq!(adapter.decode_once(frame).await.unwrap(), None);
}
