use super::state::{DecodeResult, ScanMode, ScanSource, SessionState};
use crate::barcode::{BarcodeAdapter, MultiFormatDecoder};
use crate::camera::{CaptureHandle, CaptureSource, Facing, FrameTap};
use crate::config::ScannerConfig;
use crate::error::{ScanError, ScanResult};
use crate::events::{EventBus, ScanEvent};
use crate::frame::Frame;
use crate::recognition::{RecognitionMode, TextAdapter};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-session choices that do not change between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub facing: Facing,
    pub recognition_mode: RecognitionMode,
}

impl SessionSettings {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            facing: config.camera.preferred_facing,
            recognition_mode: config.recognition.mode,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            facing: Facing::Environment,
            recognition_mode: RecognitionMode::Remote,
        }
    }
}

/// Image handed to the decision step
enum Still {
    Ready(Frame),
    Snapshot(FrameTap),
}

struct Core {
    state: SessionState,
    /// Bumped by every start, stop and reset. Outcomes tagged with an
    /// older epoch are discarded.
    epoch: u64,
    request: Option<(ScanMode, ScanSource)>,
    /// Recognition slot for the current attempt. Replaced on every start so
    /// a cancelled call still unwinding cannot block the next attempt.
    text: TextAdapter,
    handle: Option<CaptureHandle>,
    pending: Option<JoinHandle<()>>,
    closed: bool,
}

struct SessionInner {
    id: Uuid,
    settings: SessionSettings,
    source: Arc<CaptureSource>,
    barcode: Arc<BarcodeAdapter>,
    text: TextAdapter,
    events: EventBus,
    state_tx: watch::Sender<SessionState>,
    core: Mutex<Core>,
}

impl SessionInner {
    fn transition(&self, core: &mut Core, next: SessionState) {
        if core.state == next {
            return;
        }
        let from = std::mem::replace(&mut core.state, next.clone());
        info!("Session {}: {} -> {}", self.id, from.label(), next.label());

        self.state_tx.send_replace(next.clone());
        self.events.emit(ScanEvent::StateChanged {
            session_id: self.id,
            from,
            to: next,
            timestamp: SystemTime::now(),
        });
    }

    /// The single release path for the session's camera
    fn release_camera(&self, core: &mut Core) {
        if let Some(handle) = core.handle.take() {
            self.barcode.stop(&handle);
            handle.release();
            self.events.emit(ScanEvent::CameraReleased {
                session_id: self.id,
                handle_id: handle.id(),
                timestamp: SystemTime::now(),
            });
        }
    }

    fn cancel_pending(&self, core: &mut Core) {
        if let Some(task) = core.pending.take() {
            task.abort();
            debug!("Session {}: pending operation cancelled", self.id);
        }
    }

    fn fail(&self, core: &mut Core, error: ScanError) {
        self.release_camera(core);
        self.transition(core, SessionState::Error(error.clone()));
        self.events.emit(ScanEvent::Failed {
            session_id: self.id,
            error,
            timestamp: SystemTime::now(),
        });
    }

    fn succeed(&self, core: &mut Core, mode: ScanMode, result: DecodeResult) {
        self.release_camera(core);
        self.transition(core, SessionState::Result(result.clone()));
        self.events.emit(ScanEvent::ResultReady {
            session_id: self.id,
            mode,
            result,
            timestamp: SystemTime::now(),
        });
    }

    /// Apply the outcome of a decode or recognition started under `epoch`
    fn complete(&self, epoch: u64, mode: ScanMode, outcome: ScanResult<DecodeResult>) {
        let mut core = self.core.lock();

        if core.epoch != epoch || !core.state.may_hold_camera() {
            let reason = format!(
                "{} outcome from attempt {} arrived while session {} is {} (attempt {})",
                mode,
                epoch,
                self.id,
                core.state.label(),
                core.epoch
            );
            self.events.emit(ScanEvent::OutcomeDiscarded {
                session_id: self.id,
                reason,
            });
            return;
        }

        // The finishing task is the pending one; detach rather than abort
        core.pending.take();
        match outcome {
            Ok(result) => self.succeed(&mut core, mode, result),
            Err(e) => self.fail(&mut core, e),
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if let Some(task) = core.pending.take() {
            task.abort();
        }
        if let Some(handle) = core.handle.take() {
            self.barcode.stop(&handle);
            if handle.release() {
                info!("Session {} torn down; camera released", self.id);
            }
        }
    }
}

/// Scan Session Controller.
///
/// Owns the camera for the duration of one scan attempt and guarantees it is
/// released on every way out: result, error, `stop()`, `shutdown()` or drop
/// of the last clone. Clones share the same session.
#[derive(Clone)]
pub struct ScanSession {
    inner: Arc<SessionInner>,
}

impl ScanSession {
    pub fn new(
        source: Arc<CaptureSource>,
        barcode: Arc<BarcodeAdapter>,
        text: TextAdapter,
        settings: SessionSettings,
        events: EventBus,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let id = Uuid::new_v4();
        debug!(
            "Session {} created (facing {}, {} recognition, {} camera backend)",
            id,
            settings.facing,
            settings.recognition_mode,
            source.backend_name()
        );

        Self {
            inner: Arc::new(SessionInner {
                id,
                settings,
                source,
                barcode,
                text: text.fork(),
                events,
                state_tx,
                core: Mutex::new(Core {
                    state: SessionState::Idle,
                    epoch: 0,
                    request: None,
                    text: text.fork(),
                    handle: None,
                    pending: None,
                    closed: false,
                }),
            }),
        }
    }

    /// Multi-format barcode decoding and text recognition wired from
    /// configuration
    pub fn from_config(
        config: &ScannerConfig,
        source: Arc<CaptureSource>,
        events: EventBus,
    ) -> ScanResult<Self> {
        let decoder = Arc::new(MultiFormatDecoder::with_region(config.barcode.scan_region));
        let barcode = Arc::new(BarcodeAdapter::new(decoder, config.barcode.scan_interval()));
        let text = TextAdapter::from_config(&config.recognition)?;

        Ok(Self::new(
            source,
            barcode,
            text,
            SessionSettings::from_config(config),
            events,
        ))
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn settings(&self) -> SessionSettings {
        self.inner.settings
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state.clone()
    }

    pub fn result(&self) -> Option<DecodeResult> {
        self.inner.core.lock().state.result().cloned()
    }

    pub fn error(&self) -> Option<ScanError> {
        self.inner.core.lock().state.error().cloned()
    }

    /// Mode of the current or most recent attempt
    pub fn mode(&self) -> Option<ScanMode> {
        self.inner.core.lock().request.as_ref().map(|(mode, _)| *mode)
    }

    pub fn holds_camera(&self) -> bool {
        self.inner.core.lock().handle.is_some()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// State updates, latest value first
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Wait until the session is idle or terminal
    pub async fn wait_until_settled(&self) -> SessionState {
        let mut rx = self.watch();
        let settled = match rx.wait_for(|state| state.is_settled()).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        settled
    }

    /// Begin a scan attempt. Only valid from `Idle`.
    ///
    /// Camera sources return once the camera is live (`Active`); barcode
    /// sessions start decoding immediately, text sessions wait for
    /// `capture()`. Uploads go straight to `Deciding`.
    pub async fn start(&self, mode: ScanMode, source: ScanSource) -> ScanResult<()> {
        if mode == ScanMode::Text && !self.inner.text.supports(self.inner.settings.recognition_mode)
        {
            return Err(ScanError::recognition_failed(format!(
                "{} text recognition is not available in this build",
                self.inner.settings.recognition_mode
            )));
        }

        let epoch = {
            let mut core = self.inner.core.lock();
            if core.closed {
                return Err(ScanError::invalid_state("session has been shut down"));
            }
            if core.state != SessionState::Idle {
                return Err(ScanError::invalid_state(format!(
                    "cannot start a {} scan while {}",
                    mode,
                    core.state.label()
                )));
            }
            core.epoch += 1;
            core.request = Some((mode, source.clone()));
            core.text = self.inner.text.fork();
            self.inner.transition(&mut core, SessionState::Acquiring);
            core.epoch
        };

        match source {
            ScanSource::Camera => self.start_camera(epoch, mode).await,
            ScanSource::Upload(bytes) => self.start_upload(epoch, mode, &bytes),
        }
    }

    async fn start_camera(&self, epoch: u64, mode: ScanMode) -> ScanResult<()> {
        let acquired = self.inner.source.acquire(self.inner.settings.facing).await;

        let mut core = self.inner.core.lock();
        if core.epoch != epoch {
            if let Ok(handle) = acquired {
                warn!(
                    "Session {} stopped while acquiring; releasing camera '{}'",
                    self.inner.id,
                    handle.device().label
                );
                handle.release();
            }
            return Err(ScanError::invalid_state(
                "session was stopped while acquiring the camera",
            ));
        }

        let handle = match acquired {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.fail(&mut core, e.clone());
                return Err(e);
            }
        };

        self.inner.events.emit(ScanEvent::CameraAcquired {
            session_id: self.inner.id,
            handle_id: handle.id(),
            device: handle.device().label.clone(),
            timestamp: SystemTime::now(),
        });

        if mode == ScanMode::Barcode {
            let on_result = {
                let inner = Arc::downgrade(&self.inner);
                move |code: crate::barcode::DecodedCode| {
                    if let Some(inner) = inner.upgrade() {
                        inner.complete(epoch, ScanMode::Barcode, Ok(code.into()));
                    }
                }
            };
            let on_error = {
                let inner = Arc::downgrade(&self.inner);
                move |error: ScanError| {
                    if let Some(inner) = inner.upgrade() {
                        inner.complete(epoch, ScanMode::Barcode, Err(error));
                    }
                }
            };

            let started = self
                .inner
                .barcode
                .start_continuous_decode(&handle, on_result, on_error);
            core.handle = Some(handle);
            if let Err(e) = started {
                self.inner.fail(&mut core, e.clone());
                return Err(e);
            }
        } else {
            core.handle = Some(handle);
        }

        self.inner.transition(&mut core, SessionState::Active);
        Ok(())
    }

    fn start_upload(&self, epoch: u64, mode: ScanMode, bytes: &[u8]) -> ScanResult<()> {
        let decoded = self.inner.source.from_upload(bytes);

        let mut core = self.inner.core.lock();
        if core.epoch != epoch {
            return Err(ScanError::invalid_state(
                "session was stopped while reading the upload",
            ));
        }

        match decoded {
            Ok(frame) => {
                self.inner.transition(&mut core, SessionState::Deciding);
                self.spawn_decision(&mut core, epoch, mode, Still::Ready(frame));
                Ok(())
            }
            Err(e) => {
                self.inner.fail(&mut core, e.clone());
                Err(e)
            }
        }
    }

    /// Snapshot the live camera and recognize it (text sessions only)
    pub fn capture(&self) -> ScanResult<()> {
        let mut core = self.inner.core.lock();
        let mode = core.request.as_ref().map(|(mode, _)| *mode);

        match (&core.state, mode) {
            (SessionState::Active, Some(ScanMode::Text)) => {}
            (SessionState::Deciding, _) => return Err(ScanError::OperationInProgress),
            (SessionState::Active, _) => {
                return Err(ScanError::invalid_state(
                    "barcode sessions decode continuously; capture is for text",
                ))
            }
            (state, _) => {
                return Err(ScanError::invalid_state(format!(
                    "cannot capture while {}",
                    state.label()
                )))
            }
        }

        let tap = match core.handle.as_ref() {
            Some(handle) => handle.tap(),
            None => return Err(ScanError::invalid_state("no live camera to capture from")),
        };

        let epoch = core.epoch;
        self.inner.transition(&mut core, SessionState::Deciding);
        self.spawn_decision(&mut core, epoch, ScanMode::Text, Still::Snapshot(tap));
        Ok(())
    }

    fn spawn_decision(&self, core: &mut Core, epoch: u64, mode: ScanMode, still: Still) {
        let inner: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let barcode = Arc::clone(&self.inner.barcode);
        let text = core.text.clone();
        let recognition_mode = self.inner.settings.recognition_mode;

        let task = tokio::spawn(async move {
            let outcome = decide(still, mode, &barcode, &text, recognition_mode).await;
            if let Some(inner) = inner.upgrade() {
                inner.complete(epoch, mode, outcome);
            }
        });
        core.pending = Some(task);
    }

    /// Cancel whatever is running and release the camera. Idempotent;
    /// a no-op when nothing is running.
    pub fn stop(&self) {
        let mut core = self.inner.core.lock();
        core.epoch += 1;
        self.inner.cancel_pending(&mut core);
        self.inner.release_camera(&mut core);

        if core.state.may_hold_camera() {
            info!("Session {} stopped while {}", self.inner.id, core.state.label());
            self.inner.transition(&mut core, SessionState::Idle);
        } else {
            debug!("Session {}: stop() while {} is a no-op", self.inner.id, core.state.label());
        }
    }

    /// Leave a result or error and return to `Idle`
    pub fn reset(&self) -> ScanResult<()> {
        let mut core = self.inner.core.lock();
        match &core.state {
            SessionState::Idle => Ok(()),
            SessionState::Result(_) | SessionState::Error(_) => {
                core.epoch += 1;
                self.inner.release_camera(&mut core);
                self.inner.transition(&mut core, SessionState::Idle);
                Ok(())
            }
            other => Err(ScanError::invalid_state(format!(
                "cannot reset while {}; stop the session first",
                other.label()
            ))),
        }
    }

    /// Scan again with the previous mode and source
    pub async fn restart(&self) -> ScanResult<()> {
        let (mode, source) = self
            .inner
            .core
            .lock()
            .request
            .clone()
            .ok_or_else(|| ScanError::invalid_state("no previous scan to restart"))?;

        self.stop();
        self.reset()?;
        self.start(mode, source).await
    }

    /// Stop and refuse further starts
    pub fn shutdown(&self) {
        self.stop();
        let mut core = self.inner.core.lock();
        core.closed = true;
        self.inner.transition(&mut core, SessionState::Idle);
        info!("Session {} shut down", self.inner.id);
    }
}

async fn decide(
    still: Still,
    mode: ScanMode,
    barcode: &BarcodeAdapter,
    text: &TextAdapter,
    recognition_mode: RecognitionMode,
) -> ScanResult<DecodeResult> {
    let frame = match still {
        Still::Ready(frame) => frame,
        Still::Snapshot(tap) => tokio::task::spawn_blocking(move || tap.snapshot())
            .await
            .map_err(|e| ScanError::invalid_state(format!("snapshot task failed: {}", e)))??,
    };

    match mode {
        ScanMode::Text => text
            .recognize(&frame, recognition_mode)
            .await
            .map(DecodeResult::Text),
        ScanMode::Barcode => barcode
            .decode_once(frame)
            .await?
            .map(DecodeResult::from)
            .ok_or_else(|| ScanError::recognition_failed("no barcode found in image")),
    }
}
