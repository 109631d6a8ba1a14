//! Error types shared across the ingestion components.
//!
//! Every failure is contained at the component that produced it. The pipeline
//! logs these and keeps running; only configuration errors abort startup.

use std::path::PathBuf;

use thiserror::Error;

use crate::mqtt::mqtt_handler::{ConnectionEvent, ConnectionState};

/// Failures talking to the broker.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Failed to disconnect: {0}")]
    Disconnect(String),

    /// The consumer side of the handoff queue is gone.
    #[error("Handoff channel closed")]
    ChannelClosed,

    #[error("Network task failed: {0}")]
    Task(String),
}

/// Failures of the persisted message log.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open message store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to create schema: {0}")]
    Schema(#[source] sqlx::Error),

    #[error("Failed to append message on {topic}: {source}")]
    Write {
        topic: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Query failed: {0}")]
    Query(#[source] sqlx::Error),
}

/// Failures loading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Configuration rejected: {0}")]
    Invalid(String),
}

/// A payload that cannot be normalized at all.
///
/// The raw text is still persisted; only normalization is skipped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Payload is JSON but not an object")]
    NotAnObject,
}

/// A connection event that is not legal in the current state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Cannot apply {event:?} while {state:?}")]
pub struct TransitionError {
    pub state: ConnectionState,
    pub event: ConnectionEvent,
}
