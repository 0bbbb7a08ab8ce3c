use crate::error::EventsError;
use crate::messages::WsMessage;
use tokio::sync::{broadcast, mpsc};

/// Best-effort, non-blocking destination for broadcast messages.
///
/// Publishers log a failed `publish` and carry on; nothing in the engine waits on
/// a sink.
pub trait EventSink: Send + Sync {
    fn publish(&self, message: WsMessage) -> Result<(), EventsError>;
}

impl EventSink for broadcast::Sender<WsMessage> {
    fn publish(&self, message: WsMessage) -> Result<(), EventsError> {
        self.send(message).map(|_| ()).map_err(|_| EventsError::NoSubscribers)
    }
}

impl EventSink for mpsc::UnboundedSender<WsMessage> {
    fn publish(&self, message: WsMessage) -> Result<(), EventsError> {
        self.send(message).map_err(|e| EventsError::Rejected(e.to_string()))
    }
}
