//! Scan Session Controller
//!
//! One `ScanSession` drives a scan attempt through
//! `Idle -> Acquiring -> Active -> Deciding -> Result | Error`, owns the
//! camera while it does, and publishes every transition on the `EventBus`.

mod controller;
mod state;

pub use controller::{ScanSession, SessionSettings};
pub use state::{DecodeResult, ScanMode, ScanSource, SessionState};
