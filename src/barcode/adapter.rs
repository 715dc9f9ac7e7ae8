use super::decoder::{BarcodeDecoder, DecodedCode};
use crate::camera::{CaptureHandle, FrameTap};
use crate::error::{ScanError, ScanResult};
use crate::frame::Frame;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Consecutive failed snapshots after which the camera counts as unusable
const MAX_CONSECUTIVE_CAPTURE_FAILURES: u32 = 25;

struct DecodeLoop {
    token: CancellationToken,
    task: JoinHandle<()>,
}

enum Attempt {
    Decoded(DecodedCode),
    Empty,
    BadFrame(ScanError),
    NoFrame(ScanError),
}

/// Continuous best-effort decoding against a live camera
pub struct BarcodeAdapter {
    decoder: Arc<dyn BarcodeDecoder>,
    interval: Duration,
    loops: Mutex<HashMap<Uuid, DecodeLoop>>,
}

impl BarcodeAdapter {
    pub fn new(decoder: Arc<dyn BarcodeDecoder>, interval: Duration) -> Self {
        Self {
            decoder,
            interval,
            loops: Mutex::new(HashMap::new()),
        }
    }

    pub fn decoder_name(&self) -> &'static str {
        self.decoder.name()
    }

    /// Start decoding frames from `handle` until a code is found or `stop`
    /// is called. `on_result` runs at most once and ends the loop; `on_error`
    /// runs only when the camera stops yielding frames altogether.
    pub fn start_continuous_decode<R, E>(
        &self,
        handle: &CaptureHandle,
        on_result: R,
        on_error: E,
    ) -> ScanResult<()>
    where
        R: FnOnce(DecodedCode) + Send + 'static,
        E: FnOnce(ScanError) + Send + 'static,
    {
        if !handle.is_live() {
            return Err(ScanError::invalid_state(format!(
                "cannot decode from released capture handle {}",
                handle.id()
            )));
        }

        let mut loops = self.loops.lock();
        loops.retain(|_, l| !l.task.is_finished());
        if loops.contains_key(&handle.id()) {
            return Err(ScanError::OperationInProgress);
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(run_decode_loop(
            handle.tap(),
            Arc::clone(&self.decoder),
            self.interval,
            token.clone(),
            on_result,
            on_error,
        ));

        info!(
            "Continuous {} decode started on handle {} (every {:?})",
            self.decoder.name(),
            handle.id(),
            self.interval
        );
        loops.insert(handle.id(), DecodeLoop { token, task });
        Ok(())
    }

    /// Cancel the loop for `handle`. No callback fires after this returns.
    pub fn stop(&self, handle: &CaptureHandle) {
        self.stop_by_id(handle.id());
    }

    pub fn stop_by_id(&self, handle_id: Uuid) {
        if let Some(decode_loop) = self.loops.lock().remove(&handle_id) {
            decode_loop.token.cancel();
            decode_loop.task.abort();
            debug!("Continuous decode stopped on handle {}", handle_id);
        }
    }

    /// Whether a loop is still running for `handle`
    pub fn is_running(&self, handle: &CaptureHandle) -> bool {
        self.loops
            .lock()
            .get(&handle.id())
            .map(|l| !l.task.is_finished())
            .unwrap_or(false)
    }

    /// Decode a single still frame (uploads)
    pub async fn decode_once(&self, frame: Frame) -> ScanResult<Option<DecodedCode>> {
        let decoder = Arc::clone(&self.decoder);
        tokio::task::spawn_blocking(move || decoder.decode(&frame))
            .await
            .map_err(|e| ScanError::recognition_failed(format!("decoder panicked: {}", e)))?
    }
}

impl Drop for BarcodeAdapter {
    fn drop(&mut self) {
        for (_, decode_loop) in self.loops.lock().drain() {
            decode_loop.token.cancel();
            decode_loop.task.abort();
        }
    }
}

async fn run_decode_loop<R, E>(
    tap: FrameTap,
    decoder: Arc<dyn BarcodeDecoder>,
    interval: Duration,
    token: CancellationToken,
    on_result: R,
    on_error: E,
) where
    R: FnOnce(DecodedCode) + Send + 'static,
    E: FnOnce(ScanError) + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts: u64 = 0;
    let mut capture_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Decode loop for handle {} cancelled after {} attempt(s)", tap.handle_id(), attempts);
                return;
            }
            _ = ticker.tick() => {}
        }

        if !tap.is_live() {
            warn!(
                "Camera behind handle {} went away during continuous decode",
                tap.handle_id()
            );
            if !token.is_cancelled() {
                on_error(ScanError::NoDeviceFound);
            }
            return;
        }

        attempts += 1;
        let attempt_tap = tap.clone();
        let attempt_decoder = Arc::clone(&decoder);
        let attempt = tokio::task::spawn_blocking(move || {
            let frame = match attempt_tap.snapshot() {
                Ok(frame) => frame,
                Err(e) => return Attempt::NoFrame(e),
            };
            match attempt_decoder.decode(&frame) {
                Ok(Some(code)) => Attempt::Decoded(code),
                Ok(None) => Attempt::Empty,
                Err(e) => Attempt::BadFrame(e),
            }
        })
        .await;

        if token.is_cancelled() {
            return;
        }

        match attempt {
            Ok(Attempt::Decoded(code)) => {
                info!(
                    "Decoded {} payload on handle {} after {} attempt(s)",
                    code.symbology,
                    tap.handle_id(),
                    attempts
                );
                on_result(code);
                return;
            }
            Ok(Attempt::Empty) => {
                capture_failures = 0;
                trace!("Attempt {}: no code in frame", attempts);
            }
            Ok(Attempt::BadFrame(e)) => {
                capture_failures = 0;
                debug!("Attempt {}: skipping unreadable frame: {}", attempts, e);
            }
            Ok(Attempt::NoFrame(e)) => {
                capture_failures += 1;
                debug!(
                    "Attempt {}: no frame from camera ({}/{}): {}",
                    attempts, capture_failures, MAX_CONSECUTIVE_CAPTURE_FAILURES, e
                );
                if capture_failures >= MAX_CONSECUTIVE_CAPTURE_FAILURES {
                    warn!(
                        "Camera behind handle {} produced no frames for {} attempts",
                        tap.handle_id(),
                        capture_failures
                    );
                    on_error(ScanError::NoDeviceFound);
                    return;
                }
            }
            Err(e) => {
                warn!("Decode attempt {} panicked: {}", attempts, e);
            }
        }
    }
}
