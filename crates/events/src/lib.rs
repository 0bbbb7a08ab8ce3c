//! # Meridian Events
//!
//! This crate defines the real-time event structures pushed out of the engine:
//! partial bar snapshots, completed bars, strategy status changes and log lines.
//!
//! As a Layer 0 crate, it depends only on `core-types` and provides the definitive
//! wire shape for every broadcast. Delivery goes through the [`EventSink`] trait,
//! implemented for `tokio::sync::broadcast::Sender<WsMessage>`.

// Declare the modules that make up this crate.
pub mod error;
pub mod messages;
pub mod sink;

// Re-export the core types to provide a clean public API.
pub use error::EventsError;
pub use messages::{BarPrices, BarUpdate, LogLevel, LogMessage, StrategyStatusChange, WsMessage};
pub use sink::EventSink;
