use crate::barcode::{DecodedCode, Symbology};
use crate::error::ScanError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a session is scanning for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Barcode,
    Text,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Barcode => f.write_str("barcode"),
            ScanMode::Text => f.write_str("text"),
        }
    }
}

/// Where the session's image comes from
#[derive(Clone, PartialEq, Eq)]
pub enum ScanSource {
    Camera,
    /// Encoded image file contents
    Upload(Bytes),
}

impl fmt::Debug for ScanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanSource::Camera => f.write_str("Camera"),
            ScanSource::Upload(bytes) => write!(f, "Upload({} bytes)", bytes.len()),
        }
    }
}

/// Terminal success value of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeResult {
    Barcode { payload: String, symbology: Symbology },
    Text(String),
}

impl DecodeResult {
    /// Decoded payload or recognized text
    pub fn content(&self) -> &str {
        match self {
            DecodeResult::Barcode { payload, .. } => payload,
            DecodeResult::Text(text) => text,
        }
    }
}

impl From<DecodedCode> for DecodeResult {
    fn from(code: DecodedCode) -> Self {
        DecodeResult::Barcode {
            payload: code.payload,
            symbology: code.symbology,
        }
    }
}

impl fmt::Display for DecodeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeResult::Barcode { payload, symbology } => write!(f, "[{}] {}", symbology, payload),
            DecodeResult::Text(text) => f.write_str(text),
        }
    }
}

/// Lifecycle of one scan attempt.
///
/// `Result` and `Error` carry their value, so a result and an error can
/// never coexist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    Acquiring,
    Active,
    Deciding,
    Result(DecodeResult),
    Error(ScanError),
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Acquiring => "acquiring",
            SessionState::Active => "active",
            SessionState::Deciding => "deciding",
            SessionState::Result(_) => "result",
            SessionState::Error(_) => "error",
        }
    }

    /// States in which the session may hold a camera
    pub fn may_hold_camera(&self) -> bool {
        matches!(
            self,
            SessionState::Acquiring | SessionState::Active | SessionState::Deciding
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Result(_) | SessionState::Error(_))
    }

    /// Nothing is running: idle or terminal
    pub fn is_settled(&self) -> bool {
        !self.may_hold_camera()
    }

    pub fn result(&self) -> Option<&DecodeResult> {
        match self {
            SessionState::Result(result) => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ScanError> {
        match self {
            SessionState::Error(error) => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Result(result) => write!(f, "result: {}", result),
            SessionState::Error(error) => write!(f, "error: {}", error),
            other => f.write_str(other.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(SessionState::Idle.is_settled());
        assert!(!SessionState::Idle.is_terminal());
        assert!(SessionState::Deciding.may_hold_camera());
        let done = SessionState::Result(DecodeResult::Text("HELLO".to_string()));
        assert!(done.is_terminal());
        assert_eq!(done.result().map(|r| r.content()), Some("HELLO"));
        assert_eq!(done.error(), None);
        assert_eq!(
            SessionState::Error(ScanError::NoDeviceFound).to_string(),
            "error: No camera devices found"
        );
    }

    #[test]
    fn test_barcode_result_from_code() {
        let result: DecodeResult = DecodedCode {
            payload: "0123456789".to_string(),
            symbology: Symbology::QrCode,
        }
        .into();
        assert_eq!(result.content(), "0123456789");
        assert_eq!(result.to_string(), "[QR_CODE] 0123456789");
    }

    #[test]
    fn test_upload_debug_hides_contents() {
        let source = ScanSource::Upload(Bytes::from_static(&[1, 2, 3]));
        assert_eq!(format!("{:?}", source), "Upload(3 bytes)");
    }
}
