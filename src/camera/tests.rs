use super::*;
use crate::error::ScanError;
use crate::frame::{Frame, FrameFormat, FrameOrigin};
use std::io::Cursor;
use std::sync::Arc;

fn create_test_source(backend: MockCameraBackend) -> (CaptureSource, Arc<MockCameraStats>) {
    let stats = backend.stats();
    let source = CaptureSourceBuilder::new()
        .backend(Arc::new(backend))
        .build()
        .unwrap();
    (source, stats)
}

#[test]
fn test_facing_label_matching() {
    assert!(Facing::Environment.matches_label("Back Camera"));
    assert!(Facing::Back.matches_label("camera2 0, facing REAR"));
    assert!(Facing::Front.matches_label("FaceTime HD Camera"));
    assert!(!Facing::Front.matches_label("Back Camera"));
    assert_eq!("Environment".parse::<Facing>().unwrap(), Facing::Environment);
    assert!("sideways".parse::<Facing>().is_err());
}

#[test]
fn test_select_device_prefers_matching_label() {
    let devices = vec![
        CameraDevice::new("0", "Front Camera"),
        CameraDevice::new("1", "Back Camera"),
    ];

    assert_eq!(select_device(&devices, Facing::Back).unwrap().id, "1");
    assert_eq!(select_device(&devices, Facing::Front).unwrap().id, "0");
}

#[test]
fn test_select_device_falls_back_to_first() {
    let devices = vec![
        CameraDevice::new("/dev/video2", "USB2.0 HD UVC WebCam"),
        CameraDevice::new("/dev/video4", "Integrated Camera"),
    ];

    assert_eq!(
        select_device(&devices, Facing::Environment).unwrap().id,
        "/dev/video2"
    );
    assert!(select_device(&[], Facing::Environment).is_none());
}

#[tokio::test]
async fn test_acquire_picks_back_camera() {
    let (source, stats) = create_test_source(MockCameraBackend::phone());

    let handle = source.acquire(Facing::Environment).await.unwrap();
    assert!(handle.is_live());
    assert_eq!(handle.device().label, "Back Camera");
    assert_eq!(stats.last_opened().as_deref(), Some("mock:1"));
    assert_eq!(source.stats().live(), 1);

    source.release(&handle);
    assert!(!handle.is_live());
    assert_eq!(stats.stopped(), 1);
}

#[tokio::test]
async fn test_acquire_without_devices_fails() {
    let (source, stats) = create_test_source(MockCameraBackend::new(vec![]));

    let result = source.acquire(Facing::Back).await;
    assert_eq!(result.unwrap_err(), ScanError::NoDeviceFound);
    assert_eq!(stats.opened(), 0);
    assert_eq!(source.stats().acquired(), 0);
}

#[tokio::test]
async fn test_acquire_permission_denied() {
    let backend = MockCameraBackend::phone();
    backend.deny_permission(true);
    let (source, stats) = create_test_source(backend);

    let result = source.acquire(Facing::Back).await;
    assert_eq!(result.unwrap_err(), ScanError::PermissionDenied);
    assert_eq!(stats.opened(), 0);
    assert_eq!(source.stats().live(), 0);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let (source, stats) = create_test_source(MockCameraBackend::phone());
    let handle = source.acquire(Facing::Back).await.unwrap();

    source.release(&handle);
    source.release(&handle);
    assert!(!handle.release());

    assert_eq!(stats.stopped(), 1);
    assert_eq!(source.stats().released(), 1);
}

#[tokio::test]
async fn test_capture_frame_after_release_is_invalid() {
    let (source, _stats) = create_test_source(MockCameraBackend::phone());
    let handle = source.acquire(Facing::Back).await.unwrap();

    let frame = source.capture_frame(&handle).unwrap();
    assert_eq!(frame.origin, FrameOrigin::Camera);

    source.release(&handle);
    assert!(matches!(
        source.capture_frame(&handle),
        Err(ScanError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_drop_releases_camera() {
    let (source, stats) = create_test_source(MockCameraBackend::phone());

    let tap = {
        let handle = source.acquire(Facing::Back).await.unwrap();
        handle.tap()
    };

    assert_eq!(stats.stopped(), 1);
    assert!(!tap.is_live());
    assert!(matches!(tap.snapshot(), Err(ScanError::InvalidState { .. })));
    assert_eq!(source.stats().live(), 0);
}

#[tokio::test]
async fn test_tap_follows_handle() {
    let frame = Frame::new(vec![7; 12], 4, 3, FrameFormat::Gray8);
    let (source, stats) = create_test_source(MockCameraBackend::phone().with_frame(frame));
    let handle = source.acquire(Facing::Back).await.unwrap();
    let tap = handle.tap();

    assert_eq!(tap.handle_id(), handle.id());
    let snap = tap.snapshot().unwrap();
    assert_eq!((snap.width, snap.height), (4, 3));
    assert_eq!(stats.snapshots(), 1);

    handle.release();
    assert!(!tap.is_live());
}

#[test]
fn test_from_upload_produces_frame() {
    let (source, _stats) = create_test_source(MockCameraBackend::phone());

    let mut png = Vec::new();
    image::RgbImage::from_pixel(10, 6, image::Rgb([0, 0, 0]))
        .write_to(&mut Cursor::new(&mut png), image::ImageOutputFormat::Png)
        .unwrap();

    let frame = source.from_upload(&png).unwrap();
    assert_eq!(frame.origin, FrameOrigin::Upload);
    assert_eq!((frame.width, frame.height), (10, 6));

    assert!(matches!(
        source.from_upload(b"GIF89a nope"),
        Err(ScanError::RecognitionFailed { .. })
    ));
}

#[test]
fn test_builder_validation() {
    let result = CaptureSourceBuilder::new().build();
    assert!(result.is_err());

    if let Err(crate::error::CamscanError::System { message }) = result {
        assert!(message.contains("must be specified"));
    } else {
        panic!("Expected system error for missing backend");
    }
}
