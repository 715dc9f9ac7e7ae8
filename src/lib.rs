pub mod barcode;
pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod keyboard_input;
pub mod recognition;
pub mod session;

pub use barcode::{
    BarcodeAdapter, BarcodeDecoder, DecodedCode, MultiFormatDecoder, QrDecoder, Symbology,
};
pub use camera::{
    CameraBackend, CameraDevice, CaptureHandle, CaptureSource, CaptureSourceBuilder, Facing,
    MockCameraBackend,
};
pub use config::ScannerConfig;
pub use error::{CamscanError, Result, ScanError, ScanResult};
pub use events::{EventBus, EventFilter, EventReceiver, ScanEvent, UserIntent};
pub use frame::{Frame, FrameFormat, FrameOrigin};
pub use keyboard_input::KeyboardInputHandler;
pub use recognition::{RecognitionMode, TextAdapter, TextRecognizer, VisionClient};
pub use session::{DecodeResult, ScanMode, ScanSession, ScanSource, SessionSettings, SessionState};
