//! Ingestion pipeline: drains the handoff queue and applies each message to
//! the store, the reading cache and the alarm path.

pub mod ingestion;

pub use ingestion::{IngestionPipeline, Outcome, PipelineEvent, PipelineStatus};
