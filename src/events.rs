use crate::error::{EventBusError, ScanError};
use crate::session::{DecodeResult, ScanMode, SessionState};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Requests coming from the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserIntent {
    /// Snapshot the live camera and recognize it
    Capture,
    /// Leave the current result or error and scan again
    Retry,
    /// Stop the session and exit
    Quit,
}

/// Events published by scan sessions and the input layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// A session moved between states
    StateChanged {
        session_id: Uuid,
        from: SessionState,
        to: SessionState,
        timestamp: SystemTime,
    },
    /// A session opened a camera
    CameraAcquired {
        session_id: Uuid,
        handle_id: Uuid,
        device: String,
        timestamp: SystemTime,
    },
    /// A session released its camera
    CameraReleased {
        session_id: Uuid,
        handle_id: Uuid,
        timestamp: SystemTime,
    },
    /// A session produced its terminal result
    ResultReady {
        session_id: Uuid,
        mode: ScanMode,
        result: DecodeResult,
        timestamp: SystemTime,
    },
    /// A session ended in an error
    Failed {
        session_id: Uuid,
        error: ScanError,
        timestamp: SystemTime,
    },
    /// A late callback or result was dropped because the session moved on
    OutcomeDiscarded { session_id: Uuid, reason: String },
    /// Key press or other user request
    Intent {
        intent: UserIntent,
        timestamp: SystemTime,
    },
}

impl ScanEvent {
    pub fn timestamp(&self) -> SystemTime {
        match self {
            ScanEvent::StateChanged { timestamp, .. } => *timestamp,
            ScanEvent::CameraAcquired { timestamp, .. } => *timestamp,
            ScanEvent::CameraReleased { timestamp, .. } => *timestamp,
            ScanEvent::ResultReady { timestamp, .. } => *timestamp,
            ScanEvent::Failed { timestamp, .. } => *timestamp,
            ScanEvent::OutcomeDiscarded { .. } => SystemTime::now(),
            ScanEvent::Intent { timestamp, .. } => *timestamp,
        }
    }

    /// Session the event belongs to, if any
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            ScanEvent::StateChanged { session_id, .. }
            | ScanEvent::CameraAcquired { session_id, .. }
            | ScanEvent::CameraReleased { session_id, .. }
            | ScanEvent::ResultReady { session_id, .. }
            | ScanEvent::Failed { session_id, .. }
            | ScanEvent::OutcomeDiscarded { session_id, .. } => Some(*session_id),
            ScanEvent::Intent { .. } => None,
        }
    }

    pub fn description(&self) -> String {
        match self {
            ScanEvent::StateChanged { from, to, .. } => {
                format!("Session {} -> {}", from.label(), to.label())
            }
            ScanEvent::CameraAcquired { device, .. } => format!("Camera '{}' acquired", device),
            ScanEvent::CameraReleased { handle_id, .. } => {
                format!("Camera handle {} released", handle_id)
            }
            ScanEvent::ResultReady { mode, result, .. } => {
                format!("{} result: {}", mode, result)
            }
            ScanEvent::Failed { error, .. } => format!("Session failed: {}", error),
            ScanEvent::OutcomeDiscarded { reason, .. } => {
                format!("Discarded late outcome: {}", reason)
            }
            ScanEvent::Intent { intent, .. } => format!("User intent: {:?}", intent),
        }
    }

    /// Event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ScanEvent::StateChanged { .. } => "state_changed",
            ScanEvent::CameraAcquired { .. } => "camera_acquired",
            ScanEvent::CameraReleased { .. } => "camera_released",
            ScanEvent::ResultReady { .. } => "result_ready",
            ScanEvent::Failed { .. } => "failed",
            ScanEvent::OutcomeDiscarded { .. } => "outcome_discarded",
            ScanEvent::Intent { .. } => "intent",
        }
    }
}

/// Broadcast bus between sessions and whatever renders them
pub struct EventBus {
    sender: broadcast::Sender<ScanEvent>,
    debug_logging: bool,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }

    /// Subscribe through a filter
    pub fn receiver(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.subscribe(), filter, name.to_string())
    }

    /// Publish to all subscribers. Never blocks, so it is safe to call from
    /// decode callbacks and while holding session state.
    pub fn publish(&self, event: ScanEvent) -> Result<usize, EventBusError> {
        if self.debug_logging {
            debug!("Publishing event: {}", event.description());
        }

        match &event {
            ScanEvent::ResultReady { mode, result, .. } => {
                info!("{} result ready: {}", mode, result);
            }
            ScanEvent::Failed { error, .. } => {
                error!("Scan session failed: {}", error);
            }
            ScanEvent::OutcomeDiscarded { reason, .. } => {
                warn!("Discarded late outcome: {}", reason);
            }
            _ => {}
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Publish, ignoring the no-subscriber case
    pub fn emit(&self, event: ScanEvent) {
        if let Err(e) = self.publish(event) {
            if self.debug_logging {
                debug!("Event not delivered: {}", e);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
    /// Events from one session, plus user intents
    Session(Uuid),
    Custom(fn(&ScanEvent) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &ScanEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Session(id) => event.session_id().map_or(true, |s| s == *id),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<ScanEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<ScanEvent>, filter: EventFilter, name: String) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Next event passing the filter
    pub async fn recv(&mut self) -> Result<ScanEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!("Receiver '{}' received event: {}", self.name, event.description());
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<Option<ScanEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Drain everything currently queued that passes the filter
    pub fn drain(&mut self) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(Some(event)) => events.push(event),
                Ok(None) | Err(EventBusError::ChannelClosed) => return events,
                Err(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn intent(intent: UserIntent) -> ScanEvent {
        ScanEvent::Intent {
            intent,
            timestamp: SystemTime::now(),
        }
    }

    fn failed(session_id: Uuid) -> ScanEvent {
        ScanEvent::Failed {
            session_id,
            error: ScanError::NoDeviceFound,
            timestamp: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let subscriber_count = event_bus.publish(intent(UserIntent::Capture)).unwrap();
        assert_eq!(subscriber_count, 1);

        match receiver.recv().await.unwrap() {
            ScanEvent::Intent { intent, .. } => assert_eq!(intent, UserIntent::Capture),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let event_bus = EventBus::new(10);
        assert!(!event_bus.has_subscribers());
        assert!(event_bus.publish(intent(UserIntent::Quit)).is_err());

        // emit swallows the same failure
        event_bus.emit(intent(UserIntent::Quit));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(intent(UserIntent::Retry)).unwrap();

        timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_event_filter() {
        let session = Uuid::new_v4();
        let other = Uuid::new_v4();

        let by_type = EventFilter::EventTypes(vec!["failed"]);
        assert!(by_type.matches(&failed(session)));
        assert!(!by_type.matches(&intent(UserIntent::Capture)));

        let by_session = EventFilter::Session(session);
        assert!(by_session.matches(&failed(session)));
        assert!(!by_session.matches(&failed(other)));
        assert!(by_session.matches(&intent(UserIntent::Quit)));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let session = Uuid::new_v4();
        let mut receiver = event_bus.receiver(EventFilter::EventTypes(vec!["failed"]), "test");

        event_bus.publish(intent(UserIntent::Capture)).unwrap();
        event_bus.publish(failed(session)).unwrap();

        let received = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.session_id(), Some(session));
        assert!(receiver.drain().is_empty());
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_skipped() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.receiver(EventFilter::All, "slow");

        for _ in 0..5 {
            event_bus.publish(intent(UserIntent::Capture)).unwrap();
        }

        assert!(matches!(
            receiver.recv().await,
            Err(EventBusError::Lagged { skipped: 3 })
        ));
        assert_eq!(receiver.drain().len(), 2);
    }

    #[test]
    fn test_event_properties() {
        let event = ScanEvent::StateChanged {
            session_id: Uuid::new_v4(),
            from: SessionState::Idle,
            to: SessionState::Acquiring,
            timestamp: SystemTime::now(),
        };

        assert_eq!(event.event_type(), "state_changed");
        assert_eq!(event.description(), "Session idle -> acquiring");
    }
}
