//! Append-only log of every inbound message.
//!
//! SQLite in WAL mode: one single-connection writer pool for the ingestion
//! path and a separate read-only pool for history and statistics, so a large
//! history query never queues behind (or in front of) live appends.

pub mod message_store;
pub mod schema;

pub use message_store::{HistoryStats, MessageStore, MetricStats};
