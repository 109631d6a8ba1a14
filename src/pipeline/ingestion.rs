//! Single consumer of the handoff queue.
//!
//! # Per-message states
//!
//! ```text
//! Received ──► Persisted ──► Resolved ──► Normalized & Cached ──► Evaluated ──► Delivered
//!    │             │             │
//!    │        (write fails)  (no match)
//!    │             ▼             ▼
//!    │          Dropped      Unresolved
//! ```
//!
//! Everything after `Persisted` runs on this task only, so the
//! resolve → normalize → cache → evaluate sequence is atomic to any reader
//! of the cache.

use std::fmt;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alarm::{evaluate, AlarmGate, ThresholdSet};
use crate::cache::ReadingCache;
use crate::config::AppConfig;
use crate::model::{AlarmEvent, MetricKind, RawMessage, Reading};
use crate::mqtt::{
    ConnectionEvent, ConnectionState, Handoff, HandoffReceiver, InboundMessage, Publisher,
};
use crate::payload::{extract_field, parse_object, Extraction, FieldAliases};
use crate::store::MessageStore;
use crate::topic::{Resolution, TopicResolver};

const EVENT_CAPACITY: usize = 256;

/// Notifications for observers of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    ReadingUpdated(Reading),
    Alarm(AlarmEvent),
    Unresolved { topic: String },
    ConnectionChanged(ConnectionState),
}

/// Terminal state of one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Persisted, attributed and normalized. `readings` may be empty when the
    /// payload carried nothing usable.
    Delivered {
        message_id: i64,
        room: String,
        readings: Vec<Reading>,
        alarm: Option<AlarmEvent>,
    },
    /// Persisted only.
    Unresolved { message_id: i64 },
    /// Could not be persisted; nothing else was done with it.
    Dropped,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStatus {
    pub received: u64,
    pub persisted: u64,
    pub persistence_failures: u64,
    pub unresolved: u64,
    pub readings_updated: u64,
    pub fields_absent: u64,
    pub fields_malformed: u64,
    pub parse_failures: u64,
    pub alarms_emitted: u64,
    pub alarms_suppressed: u64,
    pub alarms_published: u64,
    pub publish_failures: u64,
    pub last_activity: Option<NaiveDateTime>,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "received={} persisted={} persist_failed={} unresolved={} readings={} \
             absent={} malformed={} unparsable={} alarms={} suppressed={} \
             published={} publish_failed={}",
            self.received,
            self.persisted,
            self.persistence_failures,
            self.unresolved,
            self.readings_updated,
            self.fields_absent,
            self.fields_malformed,
            self.parse_failures,
            self.alarms_emitted,
            self.alarms_suppressed,
            self.alarms_published,
            self.publish_failures,
        )?;
        if let Some(last) = self.last_activity {
            write!(f, " last_activity={}", last)?;
        }
        Ok(())
    }
}

/// Owns the reading cache and the connection state. Fed only through
/// [`handle`](Self::handle) or [`run`](Self::run).
pub struct IngestionPipeline<P: Publisher> {
    resolver: TopicResolver,
    aliases: FieldAliases,
    cache: ReadingCache,
    store: MessageStore,
    thresholds: watch::Receiver<ThresholdSet>,
    gate: AlarmGate,
    publisher: P,
    alarm_topic: String,
    persist_alarms: bool,
    events: broadcast::Sender<PipelineEvent>,
    connection: ConnectionState,
    status: PipelineStatus,
}

impl<P: Publisher> IngestionPipeline<P> {
    pub fn from_config(
        config: &AppConfig,
        store: MessageStore,
        publisher: P,
        thresholds: watch::Receiver<ThresholdSet>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            resolver: config.resolver(),
            aliases: config.fields.clone(),
            cache: ReadingCache::new(config.pipeline.ordering),
            store,
            thresholds,
            gate: AlarmGate::new(config.alarm.cooldown_secs.map(Duration::from_secs)),
            publisher,
            alarm_topic: config.alarm_topic(),
            persist_alarms: config.alarm.persist,
            events,
            connection: ConnectionState::default(),
            status: PipelineStatus::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn cache(&self) -> &ReadingCache {
        &self.cache
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn status(&self) -> &PipelineStatus {
        &self.status
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Drains `rx` in arrival order until every sender is gone.
    pub async fn run(&mut self, mut rx: HandoffReceiver) {
        info!("Ingestion pipeline started (alarm topic {})", self.alarm_topic);
        while let Some(item) = rx.recv().await {
            self.handle(item).await;
        }
        info!("Ingestion pipeline drained: {}", self.status);
    }

    pub async fn handle(&mut self, item: Handoff) {
        match item {
            Handoff::Message(message) => {
                self.process(message).await;
            }
            Handoff::Connection(event) => self.apply_connection(event),
        }
    }

    pub async fn process(&mut self, message: InboundMessage) -> Outcome {
        self.status.received += 1;
        self.status.last_activity = Some(message.received_at);

        let raw = match self
            .store
            .append(&message.topic, &message.text(), message.received_at)
            .await
        {
            Ok(raw) => {
                self.status.persisted += 1;
                raw
            }
            Err(e) => {
                self.status.persistence_failures += 1;
                error!("Dropping message on {}: {}", message.topic, e);
                return Outcome::Dropped;
            }
        };

        let (room, expected) = match self.resolver.resolve(&raw.topic) {
            Resolution::Resolved { room, metric } => (room, metric),
            Resolution::Unresolved => {
                self.status.unresolved += 1;
                warn!("Unresolved topic {}, stored as message {}", raw.topic, raw.id);
                self.notify(PipelineEvent::Unresolved {
                    topic: raw.topic.clone(),
                });
                return Outcome::Unresolved { message_id: raw.id };
            }
        };

        let observed_at = raw.received_at.unwrap_or(message.received_at);
        let readings = self.normalize(&room, expected, &raw, observed_at);
        let alarm = self.evaluate(&room, &readings).await;

        Outcome::Delivered {
            message_id: raw.id,
            room,
            readings,
            alarm,
        }
    }

    /// Extracts every metric, not only the one the topic implies. Each field
    /// succeeds or fails on its own.
    fn normalize(
        &mut self,
        room: &str,
        expected: MetricKind,
        raw: &RawMessage,
        observed_at: NaiveDateTime,
    ) -> Vec<Reading> {
        let object = match parse_object(&raw.payload) {
            Ok(object) => object,
            Err(e) => {
                self.status.parse_failures += 1;
                debug!("Message {} on {} not normalized: {}", raw.id, raw.topic, e);
                return Vec::new();
            }
        };

        let mut readings = Vec::new();
        for metric in MetricKind::ALL {
            match extract_field(&object, self.aliases.candidates(metric)) {
                Extraction::Value(value) => {
                    if !self.cache.update(room, metric, value, observed_at) {
                        continue;
                    }
                    self.status.readings_updated += 1;
                    debug!("{} {} = {}", room, metric, value);

                    let reading = Reading {
                        room: room.to_string(),
                        metric,
                        value,
                        observed_at,
                    };
                    self.notify(PipelineEvent::ReadingUpdated(reading.clone()));
                    readings.push(reading);
                }
                // Other metrics are usually missing; only the one the topic
                // names is worth reporting.
                Extraction::Absent if metric == expected => {
                    self.status.fields_absent += 1;
                    debug!("Message {} on {} has no {} field", raw.id, raw.topic, metric);
                }
                Extraction::Absent => {}
                Extraction::Malformed { key, raw: value } => {
                    self.status.fields_malformed += 1;
                    debug!(
                        "Message {} on {}: '{}' is not numeric ({})",
                        raw.id, raw.topic, key, value
                    );
                }
            }
        }
        readings
    }

    async fn evaluate(&mut self, room: &str, readings: &[Reading]) -> Option<AlarmEvent> {
        let thresholds = *self.thresholds.borrow();
        let event = evaluate(room, readings, &thresholds)?;

        if !self.gate.admit(&event) {
            self.status.alarms_suppressed += 1;
            return None;
        }

        self.status.alarms_emitted += 1;
        warn!("ALARM: {}", event.message);

        match self.publisher.publish(&self.alarm_topic, &event.message).await {
            Ok(()) => self.status.alarms_published += 1,
            Err(e) => {
                self.status.publish_failures += 1;
                error!("{}", e);
            }
        }

        if self.persist_alarms {
            if let Err(e) = self
                .store
                .append(&self.alarm_topic, &event.message, event.raised_at)
                .await
            {
                error!("Failed to store alarm for {}: {}", event.room, e);
            }
        }

        self.notify(PipelineEvent::Alarm(event.clone()));
        Some(event)
    }

    fn apply_connection(&mut self, event: ConnectionEvent) {
        match self.connection.apply(event) {
            Ok(next) => {
                if next != self.connection {
                    info!("Connection {:?} -> {:?}", self.connection, next);
                }
                self.connection = next;
                self.notify(PipelineEvent::ConnectionChanged(next));
            }
            Err(e) => warn!("{}", e),
        }
    }

    fn notify(&self, event: PipelineEvent) {
        // No observers is fine.
        let _ = self.events.send(event);
    }
}

impl<P: Publisher + 'static> IngestionPipeline<P> {
    /// Runs the pipeline on its own task and hands it back once `rx` is drained.
    pub fn spawn(mut self, rx: HandoffReceiver) -> JoinHandle<Self> {
        tokio::spawn(async move {
            self.run(rx).await;
            self
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::alarm::ThresholdControl;
    use crate::error::TransportError;
    use crate::mqtt::handoff_channel;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(String, String)>>>);

    impl Publisher for Recorder {
        async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
            self.0
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }

    async fn pipeline(
        config: AppConfig,
    ) -> (tempfile::TempDir, IngestionPipeline<Recorder>, Recorder, ThresholdControl) {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::open(dir.path().join("test.db")).await.unwrap();
        let recorder = Recorder::default();
        let (control, rx) = ThresholdControl::new(config.thresholds);
        let pipeline = IngestionPipeline::from_config(&config, store, recorder.clone(), rx);
        (dir, pipeline, recorder, control)
    }

    #[tokio::test]
    async fn multi_metric_payload_updates_every_field() {
        let (_dir, mut pipeline, _, _) = pipeline(AppConfig::default()).await;
        let outcome = pipeline
            .process(InboundMessage::from_topic(
                "pr/home/room3/temperature",
                r#"{"temperature": 21.5, "hum": "40 %", "lux": "bright"}"#,
            ))
            .await;

        let Outcome::Delivered { room, readings, alarm, .. } = outcome else {
            panic!("expected delivery");
        };
        assert_eq!(room, "Kitchen");
        assert_eq!(readings.len(), 2);
        assert_eq!(alarm, None);

        let cache = pipeline.cache();
        assert_eq!(cache.get("Kitchen", MetricKind::Temperature), Some(21.5));
        assert_eq!(cache.get("Kitchen", MetricKind::Humidity), Some(40.0));
        assert_eq!(cache.get("Kitchen", MetricKind::Illuminance), None);
        assert_eq!(pipeline.status().fields_malformed, 1);
    }

    #[tokio::test]
    async fn missing_expected_field_is_counted() {
        let (_dir, mut pipeline, _, _) = pipeline(AppConfig::default()).await;
        pipeline
            .process(InboundMessage::from_topic("pr/home/room1/temperature", r#"{"foo": 1}"#))
            .await;
        assert_eq!(pipeline.status().fields_absent, 1);
        assert!(pipeline.cache().is_empty());
    }

    #[tokio::test]
    async fn threshold_changes_apply_to_the_next_message() {
        let (_dir, mut pipeline, recorder, control) = pipeline(AppConfig::default()).await;
        let message = || InboundMessage::from_topic("pr/home/room1/temperature", r#"{"temp": 30}"#);

        assert!(matches!(
            pipeline.process(message()).await,
            Outcome::Delivered { alarm: None, .. }
        ));

        control.set(MetricKind::Temperature, 25.0);
        let Outcome::Delivered { alarm: Some(alarm), .. } = pipeline.process(message()).await else {
            panic!("expected an alarm");
        };
        assert_eq!(alarm.message, "Temperature high: 30.0");
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn illegal_connection_event_keeps_state() {
        let (_dir, mut pipeline, _, _) = pipeline(AppConfig::default()).await;
        let (tx, rx) = handoff_channel(8);
        tx.send(Handoff::Connection(ConnectionEvent::ConnectRequested)).await.unwrap();
        tx.send(Handoff::Connection(ConnectionEvent::Connected)).await.unwrap();
        tx.send(Handoff::Connection(ConnectionEvent::ConnectRequested)).await.unwrap();
        drop(tx);

        pipeline.run(rx).await;
        assert_eq!(pipeline.connection(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn alarms_can_be_persisted() {
        let mut config = AppConfig::default();
        config.alarm.persist = true;
        let (_dir, mut pipeline, _, _) = pipeline(config).await;

        pipeline
            .process(InboundMessage::from_topic("pr/home/room2/temperature", r#"{"temperature": 60}"#))
            .await;

        let stored = pipeline.store().recent(1).await.unwrap().remove(0);
        assert_eq!(stored.topic, "pr/home/alarm");
        assert_eq!(stored.payload, "Temperature high: 60.0");
    }

    #[test]
    fn status_renders_counters() {
        let status = PipelineStatus {
            received: 3,
            persisted: 2,
            ..PipelineStatus::default()
        };
        let shown = status.to_string();
        assert!(shown.starts_with("received=3 persisted=2"));
        assert!(!shown.contains("last_activity"));
    }
}
