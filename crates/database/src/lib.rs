//! # Meridian Database Crate
//!
//! Durable storage for per-account strategy state: which strategies are
//! enabled, on which symbols, with which settings. The strategy manager treats
//! this store as the authority and keeps only a cache in memory.
//!
//! ## Public API
//!
//! - `StrategyStateStore`: the persistence collaborator trait the engine depends on.
//! - `DbRepository`: the PostgreSQL implementation, built on a `PgPool`.
//! - `InMemoryStateStore`: a process-local implementation for tests and for
//!   running without a database.
//! - `connect`, `connect_to`, `run_migrations`: pool setup.
//! - `DbError`: the specific error types that can be returned from this crate.

pub mod connection;
pub mod error;
pub mod repository;
pub mod state;

pub use connection::{connect, connect_to, run_migrations};
pub use error::DbError;
pub use repository::DbRepository;
pub use state::{InMemoryStateStore, StrategyState, StrategyStateStore};
