use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::debug;

use super::thresholds::ThresholdSet;
use crate::model::{AlarmEvent, Reading};

const SEPARATOR: &str = " | ";

/// Checks the readings carried by one message against `thresholds`.
///
/// Only the metrics present in `readings` are checked, never the rest of the
/// cache. Every exceedance is folded into a single event, in metric order.
/// The event is stamped with the newest triggering observation, so the same
/// input always yields the same event.
pub fn evaluate(room: &str, readings: &[Reading], thresholds: &ThresholdSet) -> Option<AlarmEvent> {
    let mut triggering: Vec<Reading> = readings
        .iter()
        .filter(|r| thresholds.exceeded_by(r.metric, r.value))
        .cloned()
        .collect();
    if triggering.is_empty() {
        return None;
    }
    triggering.sort_by_key(|r| r.metric);

    let message = triggering
        .iter()
        .map(|r| r.metric.alarm_line(r.value))
        .collect::<Vec<_>>()
        .join(SEPARATOR);
    let raised_at = triggering.iter().map(|r| r.observed_at).max()?;

    Some(AlarmEvent {
        room: room.to_string(),
        message,
        readings: triggering,
        raised_at,
    })
}

/// Optional per-room cooldown between emitted alarms.
///
/// Without a cooldown every event passes, so a sustained exceedance alarms on
/// every message.
#[derive(Debug, Default)]
pub struct AlarmGate {
    cooldown: Option<Duration>,
    last_emitted: HashMap<String, NaiveDateTime>,
}

impl AlarmGate {
    pub fn new(cooldown: Option<Duration>) -> Self {
        Self {
            cooldown,
            last_emitted: HashMap::new(),
        }
    }

    /// Returns true if `event` should be emitted, and records it if so.
    pub fn admit(&mut self, event: &AlarmEvent) -> bool {
        let Some(cooldown) = self.cooldown else {
            return true;
        };

        if let Some(last) = self.last_emitted.get(&event.room) {
            let cooled_down = match (event.raised_at - *last).to_std() {
                Ok(elapsed) => elapsed >= cooldown,
                // Clock went backwards; do not hold alarms hostage to it.
                Err(_) => true,
            };
            if !cooled_down {
                debug!(
                    "Suppressing alarm for {} within {:?} cooldown",
                    event.room, cooldown
                );
                return false;
            }
        }

        self.last_emitted
            .insert(event.room.clone(), event.raised_at);
        true
    }

    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::MetricKind;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn at(second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(10, 0, second)
            .unwrap()
    }

    fn reading(metric: MetricKind, value: f64, second: u32) -> Reading {
        Reading {
            room: "Kitchen".to_string(),
            metric,
            value,
            observed_at: at(second),
        }
    }

    #[test]
    fn below_threshold_is_silent() {
        let readings = [
            reading(MetricKind::Temperature, 21.0, 1),
            reading(MetricKind::Humidity, 40.0, 1),
        ];
        assert_eq!(evaluate("Kitchen", &readings, &ThresholdSet::default()), None);
    }

    #[test]
    fn exceedances_fold_into_one_event() {
        let readings = [
            reading(MetricKind::Humidity, 91.0, 1),
            reading(MetricKind::Illuminance, 200.0, 1),
            reading(MetricKind::Temperature, 52.3, 2),
        ];
        let event = evaluate("Kitchen", &readings, &ThresholdSet::default()).unwrap();

        assert_eq!(event.message, "Temperature high: 52.3 | Humidity high: 91.0");
        assert_eq!(event.readings.len(), 2);
        assert_eq!(event.room, "Kitchen");
        assert_eq!(event.raised_at, at(2));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let readings = [reading(MetricKind::GasWeight, 5000.0, 3)];
        let thresholds = ThresholdSet::default();
        let first = evaluate("Kitchen", &readings, &thresholds);
        let second = evaluate("Kitchen", &readings, &thresholds);
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn gate_without_cooldown_admits_everything() {
        let mut gate = AlarmGate::default();
        let event = evaluate(
            "Kitchen",
            &[reading(MetricKind::Temperature, 60.0, 1)],
            &ThresholdSet::default(),
        )
        .unwrap();
        assert!(gate.admit(&event));
        assert!(gate.admit(&event));
        assert!(gate.admit(&event));
    }

    #[test]
    fn gate_with_cooldown_suppresses_per_room() {
        let mut gate = AlarmGate::new(Some(Duration::from_secs(10)));
        let thresholds = ThresholdSet::default();
        let hot = |second| {
            evaluate(
                "Kitchen",
                &[reading(MetricKind::Temperature, 60.0, second)],
                &thresholds,
            )
            .unwrap()
        };

        assert!(gate.admit(&hot(0)));
        assert!(!gate.admit(&hot(5)));
        assert!(gate.admit(&hot(10)));

        let mut elsewhere = hot(11);
        elsewhere.room = "Office".to_string();
        assert!(gate.admit(&elsewhere));
        assert_eq!(gate.cooldown(), Some(Duration::from_secs(10)));
    }
}
