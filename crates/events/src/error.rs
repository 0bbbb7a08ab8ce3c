use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventsError {
    #[error("Failed to serialize event message: {0}")]
    Serialization(String),

    #[error("No subscriber is listening for events")]
    NoSubscribers,

    #[error("Event sink rejected the message: {0}")]
    Rejected(String),
}
