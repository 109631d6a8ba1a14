//! Room telemetry ingestion over MQTT.
//!
//! Inbound sensor messages are persisted, attributed to a room and metric,
//! normalized into readings, cached, and checked against operator thresholds.
//! Exceedances are published back to the broker as alarms.

pub mod alarm;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod mqtt;
pub mod payload;
pub mod pipeline;
pub mod store;
pub mod topic;

pub use config::AppConfig;
pub use error::{ConfigError, ParseError, StoreError, TransitionError, TransportError};
pub use model::{AlarmEvent, MetricKind, RawMessage, Reading, SensorRoom};
pub use pipeline::{IngestionPipeline, Outcome, PipelineEvent, PipelineStatus};
