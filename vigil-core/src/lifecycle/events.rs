use tokio::sync::broadcast;

use vigil_model::{ActiveStream, WatchHistoryEntry};

/// Event published by the lifecycle for every observed session change.
///
/// `Update` fires on each poll a session is present; `Stop` fires exactly
/// once, after the session has been persisted to history.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Update { stream: ActiveStream },
    Stop { entry: WatchHistoryEntry },
}

impl SessionEvent {
    pub fn user_name(&self) -> &str {
        match self {
            SessionEvent::Update { stream } => &stream.user_name,
            SessionEvent::Stop { entry } => &entry.user_name,
        }
    }
}

/// Bounded broadcast bus. Slow subscribers lag and lose the oldest events;
/// the receiver side logs the drop and continues.
pub type EventSender = broadcast::Sender<SessionEvent>;
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

pub fn event_bus(capacity: usize) -> EventSender {
    let (tx, _rx) = broadcast::channel(capacity.max(1));
    tx
}
