//! # MQTT Transport
//!
//! Broker connection for the ingestion pipeline. The rumqttc event loop runs
//! on its own task and talks to the rest of the process only through the
//! bounded handoff queue; alarms go back out through the [`Publisher`]
//! capability.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker options and client id
//! ├── message_manager.rs  - Inbound message and handoff queue items
//! └── mqtt_handler.rs     - Link state machine, network task, connection state
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! broker ──► EventLoop::poll ──► Handoff (mpsc, FIFO) ──► IngestionPipeline
//!                                                              │
//! broker ◄──────────── MqttPublisher::publish ◄────── alarms ──┘
//! ```
//!
//! Connection changes ride the same queue as messages, so the pipeline never
//! sees a `Disconnected` ahead of messages that arrived before it.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

pub use config::MqttConfig;
pub use message_manager::{handoff_channel, Handoff, HandoffReceiver, HandoffSender, InboundMessage};
pub use mqtt_handler::{
    ConnectionEvent, ConnectionState, MqttLink, MqttPublisher, Publisher,
};
