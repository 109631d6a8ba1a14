//! Domain types flowing through the ingestion pipeline.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Sensed quantity a reading belongs to.
///
/// Declaration order is the order metrics appear in alarm summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Temperature,
    Humidity,
    #[serde(alias = "light", alias = "lux")]
    Illuminance,
    GasWeight,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Temperature,
        MetricKind::Humidity,
        MetricKind::Illuminance,
        MetricKind::GasWeight,
    ];

    /// Configuration/storage key of this metric.
    pub fn key(self) -> &'static str {
        match self {
            MetricKind::Temperature => "temperature",
            MetricKind::Humidity => "humidity",
            MetricKind::Illuminance => "illuminance",
            MetricKind::GasWeight => "gas_weight",
        }
    }

    /// Human readable alarm line for a value at or above threshold.
    pub fn alarm_line(self, value: f64) -> String {
        let value = format_value(value);
        match self {
            MetricKind::Temperature => format!("Temperature high: {value}"),
            MetricKind::Humidity => format!("Humidity high: {value}"),
            MetricKind::Illuminance => format!("Light (lux) high: {value}"),
            MetricKind::GasWeight => format!("Gas weight alarm: {value}"),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Renders a value with at least one fractional digit (`91.0`, `52.3`).
pub fn format_value(value: f64) -> String {
    format!("{value:?}")
}

/// A physical room and the topics its sensors publish on.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRoom {
    pub name: String,
    pub id: u32,
    /// Metric to topic, in registry order.
    pub sensors: Vec<(MetricKind, String)>,
}

impl SensorRoom {
    pub fn topic_for(&self, metric: MetricKind) -> Option<&str> {
        self.sensors
            .iter()
            .find(|(kind, _)| *kind == metric)
            .map(|(_, topic)| topic.as_str())
    }
}

/// Latest normalized observation for one (room, metric) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub room: String,
    pub metric: MetricKind,
    pub value: f64,
    pub observed_at: NaiveDateTime,
}

/// Persisted, unmodified record of an inbound message.
///
/// `ts` is the column text as stored. Rows written by other tools may carry
/// a timestamp in another format, or none; `received_at` is `None` for those.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: i64,
    pub ts: String,
    pub received_at: Option<NaiveDateTime>,
    pub topic: String,
    pub payload: String,
}

impl RawMessage {
    pub fn timestamp(&self) -> &str {
        &self.ts
    }
}

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

pub(crate) fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// One or more threshold exceedances raised by a single inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmEvent {
    pub room: String,
    /// Pipe-delimited summary, also the outbound payload.
    pub message: String,
    pub readings: Vec<Reading>,
    pub raised_at: NaiveDateTime,
}

impl fmt::Display for AlarmEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.raised_at, self.room, self.message)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn values_always_carry_a_fraction() {
        assert_eq!(format_value(91.0), "91.0");
        assert_eq!(format_value(52.3), "52.3");
        assert_eq!(format_value(-4.5), "-4.5");
    }

    #[test]
    fn alarm_lines_use_operator_wording() {
        assert_eq!(
            MetricKind::Temperature.alarm_line(52.3),
            "Temperature high: 52.3"
        );
        assert_eq!(
            MetricKind::Illuminance.alarm_line(1200.0),
            "Light (lux) high: 1200.0"
        );
        assert_eq!(
            MetricKind::GasWeight.alarm_line(4890.0),
            "Gas weight alarm: 4890.0"
        );
    }

    #[test]
    fn light_is_accepted_for_illuminance() {
        let kind: MetricKind = serde_json::from_str("\"light\"").unwrap();
        assert_eq!(kind, MetricKind::Illuminance);
        let kind: MetricKind = serde_json::from_str("\"gas_weight\"").unwrap();
        assert_eq!(kind, MetricKind::GasWeight);
    }

    #[test]
    fn timestamps_render_as_iso_8601() {
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_micro_opt(12, 5, 9, 42)
            .unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-01T12:05:09.000042");
        assert_eq!(format_timestamp(&ts).parse::<NaiveDateTime>().unwrap(), ts);
    }
}
