use crate::error::Result;
use crate::events::{EventBus, ScanEvent, UserIntent};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::{Duration, SystemTime};
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Map a key press to what the user wants
pub fn intent_for_key(key: &KeyEvent) -> Option<UserIntent> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char(' ') | KeyCode::Enter => Some(UserIntent::Capture),
        KeyCode::Char('r') | KeyCode::Char('R') => Some(UserIntent::Retry),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(UserIntent::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(UserIntent::Quit)
        }
        _ => None,
    }
}

/// Reads keys in raw mode and publishes them as `ScanEvent::Intent`
pub struct KeyboardInputHandler {
    event_bus: EventBus,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keys on a blocking thread
    pub fn start(&self) -> Result<JoinHandle<()>> {
        info!("Keyboard input active: SPACE captures, r scans again, q quits");

        let event_bus = self.event_bus.clone();
        let cancellation_token = self.cancellation_token.clone();

        let task = task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }
            debug!("Raw mode enabled");

            while !cancellation_token.is_cancelled() {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let key = match event::read() {
                            Ok(Event::Key(key)) => key,
                            Ok(_) => continue,
                            Err(e) => {
                                warn!("Failed to read keyboard event: {}", e);
                                continue;
                            }
                        };

                        let Some(intent) = intent_for_key(&key) else {
                            debug!("Ignoring key {:?}", key.code);
                            continue;
                        };

                        debug!("Key {:?} -> {:?}", key.code, intent);
                        if let Err(e) = event_bus.publish(ScanEvent::Intent {
                            intent,
                            timestamp: SystemTime::now(),
                        }) {
                            warn!("Failed to publish {:?}: {}", intent, e);
                        }

                        if intent == UserIntent::Quit {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            } else {
                debug!("Raw mode disabled");
            }
        });

        Ok(task)
    }

    pub fn stop(&self) {
        self.cancellation_token.cancel();
        // The reader thread also restores the terminal, but it may be
        // blocked in poll for up to 100ms
        let _ = disable_raw_mode();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

impl Drop for KeyboardInputHandler {
    fn drop(&mut self) {
        if !self.cancellation_token.is_cancelled() {
            self.stop();
        }
    }
}
