use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, SubsecRound};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, warn};

use super::schema;
use crate::error::StoreError;
use crate::model::{format_timestamp, MetricKind, RawMessage};
use crate::payload::{extract_field, parse_object, FieldAliases};

const READ_CONNECTIONS: u32 = 4;

type MessageRow = (i64, Option<String>, Option<String>, Option<String>);

/// Persisted message log backed by SQLite.
///
/// Cloning shares both pools.
#[derive(Clone, Debug)]
pub struct MessageStore {
    path: PathBuf,
    writer: SqlitePool,
    reader: SqlitePool,
}

impl MessageStore {
    /// Opens (creating if needed) the database at `path` and ensures the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| StoreError::Open {
            path: path.clone(),
            source,
        };

        let write_options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(write_options)
            .await
            .map_err(open_err)?;

        schema::create_schema(&writer).await?;

        let read_options = SqliteConnectOptions::new()
            .filename(&path)
            .read_only(true);
        let reader = SqlitePoolOptions::new()
            .max_connections(READ_CONNECTIONS)
            .connect_with(read_options)
            .await
            .map_err(open_err)?;

        info!("Message store ready at {}", path.display());
        Ok(Self {
            path,
            writer,
            reader,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one raw message. Ids are assigned by SQLite and strictly increase.
    pub async fn append(
        &self,
        topic: &str,
        payload: &str,
        received_at: NaiveDateTime,
    ) -> Result<RawMessage, StoreError> {
        // The ts column keeps microseconds; return what a later read will see.
        let received_at = received_at.trunc_subsecs(6);
        let ts = format_timestamp(&received_at);
        let result = sqlx::query("INSERT INTO messages (ts, topic, payload) VALUES (?, ?, ?)")
            .bind(&ts)
            .bind(topic)
            .bind(payload)
            .execute(&self.writer)
            .await
            .map_err(|source| StoreError::Write {
                topic: topic.to_string(),
                source,
            })?;

        let id = result.last_insert_rowid();
        debug!("Persisted message {} on {}", id, topic);
        Ok(RawMessage {
            id,
            ts,
            received_at: Some(received_at),
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
    }

    /// The most recent `limit` messages, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<RawMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, ts, topic, payload FROM messages ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.reader)
        .await
        .map_err(StoreError::Query)?;

        Ok(rows.into_iter().map(into_message).collect())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.reader)
            .await
            .map_err(StoreError::Query)
    }

    /// Values of `metric` within the most recent `limit` messages, oldest first.
    /// Rows without a readable timestamp cannot be placed and are left out.
    pub async fn metric_series(
        &self,
        metric: MetricKind,
        aliases: &FieldAliases,
        limit: u32,
    ) -> Result<Vec<(NaiveDateTime, f64)>, StoreError> {
        let mut messages = self.recent(limit).await?;
        messages.reverse();

        let candidates = aliases.candidates(metric);
        Ok(messages
            .iter()
            .filter(|m| aliases.mentioned_in(metric, &m.payload))
            .filter_map(|m| {
                let object = parse_object(&m.payload).ok()?;
                let at = m.received_at?;
                extract_field(&object, candidates).value().map(|v| (at, v))
            })
            .collect())
    }

    /// Per-metric count/min/max/avg over the most recent `limit` messages.
    pub async fn statistics(
        &self,
        aliases: &FieldAliases,
        limit: u32,
    ) -> Result<HistoryStats, StoreError> {
        let messages = self.recent(limit).await?;
        let mut stats = HistoryStats {
            rows: messages.len(),
            metrics: BTreeMap::new(),
        };

        for message in &messages {
            let Ok(object) = parse_object(&message.payload) else {
                continue;
            };
            for metric in MetricKind::ALL {
                if let Some(value) = extract_field(&object, aliases.candidates(metric)).value() {
                    stats.metrics.entry(metric).or_default().record(value);
                }
            }
        }
        Ok(stats)
    }
}

fn into_message((id, ts, topic, payload): MessageRow) -> RawMessage {
    let ts = ts.unwrap_or_default();
    let received_at = ts.parse::<NaiveDateTime>().ok();
    if received_at.is_none() {
        warn!("Stored message {} has an unreadable timestamp '{}'", id, ts);
    }
    RawMessage {
        id,
        ts,
        received_at,
        topic: topic.unwrap_or_default(),
        payload: payload.unwrap_or_default(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

impl Default for MetricStats {
    fn default() -> Self {
        Self {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }
}

impl MetricStats {
    fn record(&mut self, value: f64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

impl fmt::Display for MetricStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.avg() {
            Some(avg) => write!(
                f,
                "count={} min={:.2} max={:.2} avg={:.2}",
                self.count, self.min, self.max, avg
            ),
            None => f.write_str("n/a"),
        }
    }
}

/// Summary of a history window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryStats {
    pub rows: usize,
    pub metrics: BTreeMap<MetricKind, MetricStats>,
}

impl HistoryStats {
    pub fn metric(&self, metric: MetricKind) -> Option<&MetricStats> {
        self.metrics.get(&metric)
    }
}

impl fmt::Display for HistoryStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for metric in MetricKind::ALL {
            let stats = self.metrics.get(&metric).copied().unwrap_or_default();
            writeln!(f, "{}: {}", metric, stats)?;
        }
        write!(f, "Rows shown: {}", self.rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::now;
    use pretty_assertions::assert_eq;

    async fn store() -> (tempfile::TempDir, MessageStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::open(dir.path().join("messages.db"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn ids_strictly_increase() {
        let (_dir, store) = store().await;
        let a = store.append("t/a", "1", now()).await.unwrap();
        let b = store.append("t/b", "2", now()).await.unwrap();
        let c = store.append("t/a", "3", now()).await.unwrap();
        assert!(a.id < b.id && b.id < c.id);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn recent_returns_last_k_newest_first() {
        let (_dir, store) = store().await;
        let mut ids = Vec::new();
        for i in 0..10 {
            let msg = store
                .append("pr/home/room1/temperature", &format!("{{\"temperature\": {i}}}"), now())
                .await
                .unwrap();
            ids.push(msg.id);
        }

        let recent = store.recent(4).await.unwrap();
        let expected: Vec<i64> = ids.iter().rev().take(4).copied().collect();
        assert_eq!(recent.iter().map(|m| m.id).collect::<Vec<_>>(), expected);
        assert_eq!(recent[0].payload, "{\"temperature\": 9}");

        assert_eq!(store.recent(50).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn raw_text_and_timestamp_survive_storage() {
        let (_dir, store) = store().await;
        let ts = now();
        let written = store.append("pr/home/x", "{not json", ts).await.unwrap();
        let read = store.recent(1).await.unwrap().remove(0);
        assert_eq!(read, written);
        assert_eq!(read.timestamp(), format_timestamp(&ts));
        assert_eq!(read.received_at, Some(ts.trunc_subsecs(6)));
    }

    #[tokio::test]
    async fn statistics_summarise_the_window() {
        let (_dir, store) = store().await;
        for payload in [
            r#"{"temperature": 20}"#,
            r#"{"temperature": 24, "humidity": "50%"}"#,
            r#"{"Humidity (%)": 70}"#,
            r#"{"temperature": "warm"}"#,
            "plain text alarm",
        ] {
            store.append("pr/home/room1/mixed", payload, now()).await.unwrap();
        }

        let stats = store.statistics(&FieldAliases::default(), 500).await.unwrap();
        assert_eq!(stats.rows, 5);

        let temperature = stats.metric(MetricKind::Temperature).unwrap();
        assert_eq!(temperature.count, 2);
        assert_eq!(temperature.min, 20.0);
        assert_eq!(temperature.max, 24.0);
        assert_eq!(temperature.avg(), Some(22.0));

        let humidity = stats.metric(MetricKind::Humidity).unwrap();
        assert_eq!(humidity.count, 2);
        assert_eq!(humidity.avg(), Some(60.0));

        assert!(stats.metric(MetricKind::Illuminance).is_none());
        let summary = stats.to_string();
        assert!(summary.contains("temperature: count=2 min=20.00 max=24.00 avg=22.00"));
        assert!(summary.contains("illuminance: n/a"));
        assert!(summary.ends_with("Rows shown: 5"));
    }

    #[tokio::test]
    async fn metric_series_is_oldest_first() {
        let (_dir, store) = store().await;
        for payload in [
            r#"{"lux": 100}"#,
            r#"{"temperature": 1}"#,
            r#"{"light": 300}"#,
            r#"{"lux": 500}"#,
        ] {
            store.append("pr/home/room3/light", payload, now()).await.unwrap();
        }

        let series = store
            .metric_series(MetricKind::Illuminance, &FieldAliases::default(), 3)
            .await
            .unwrap();
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![300.0, 500.0]);
    }

    #[tokio::test]
    async fn rows_from_other_tools_do_not_break_history() {
        let (_dir, store) = store().await;
        store
            .append("pr/home/room1/temperature", r#"{"temperature": 20}"#, now())
            .await
            .unwrap();

        let legacy = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().filename(store.path()))
            .await
            .unwrap();
        sqlx::query("INSERT INTO messages (ts, topic, payload) VALUES (?, ?, ?), (NULL, ?, ?)")
            .bind("2024-01-01 10:00:00+01:00")
            .bind("pr/home/room1/temperature")
            .bind(r#"{"temperature": 30}"#)
            .bind("pr/home/room1/temperature")
            .bind(r#"{"temperature": 40}"#)
            .execute(&legacy)
            .await
            .unwrap();
        legacy.close().await;

        store
            .append("pr/home/room1/temperature", r#"{"temperature": 50}"#, now())
            .await
            .unwrap();

        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[2].timestamp(), "2024-01-01 10:00:00+01:00");
        assert_eq!(recent[2].received_at, None);
        assert_eq!(recent[1].timestamp(), "");
        assert_eq!(recent[1].received_at, None);

        let stats = store.statistics(&FieldAliases::default(), 10).await.unwrap();
        let temperature = stats.metric(MetricKind::Temperature).unwrap();
        assert_eq!(temperature.count, 4);
        assert_eq!(temperature.avg(), Some(35.0));

        let series = store
            .metric_series(MetricKind::Temperature, &FieldAliases::default(), 10)
            .await
            .unwrap();
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![20.0, 50.0]);
    }

    #[tokio::test]
    async fn reader_sees_writes_of_another_handle() {
        let (_dir, store) = store().await;
        let other = store.clone();
        store.append("a", "1", now()).await.unwrap();
        assert_eq!(other.count().await.unwrap(), 1);
        assert_eq!(other.path(), store.path());
    }
}
