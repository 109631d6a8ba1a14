use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::model::MetricKind;

/// Operator-adjustable alarm boundaries. A value at or above its threshold alarms.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct ThresholdSet {
    pub temperature: f64,
    pub humidity: f64,
    #[serde(alias = "light", alias = "lux")]
    pub illuminance: f64,
    pub gas_weight: f64,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            temperature: 50.0,
            humidity: 80.0,
            illuminance: 1000.0,
            gas_weight: 4890.0,
        }
    }
}

impl ThresholdSet {
    pub fn get(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::Temperature => self.temperature,
            MetricKind::Humidity => self.humidity,
            MetricKind::Illuminance => self.illuminance,
            MetricKind::GasWeight => self.gas_weight,
        }
    }

    pub fn set(&mut self, metric: MetricKind, value: f64) {
        match metric {
            MetricKind::Temperature => self.temperature = value,
            MetricKind::Humidity => self.humidity = value,
            MetricKind::Illuminance => self.illuminance = value,
            MetricKind::GasWeight => self.gas_weight = value,
        }
    }

    pub fn exceeded_by(&self, metric: MetricKind, value: f64) -> bool {
        value >= self.get(metric)
    }
}

/// Operator side of the threshold channel.
///
/// The pipeline holds the receiving end and reads the latest set for every
/// message, so a change applies from the next message on.
#[derive(Debug, Clone)]
pub struct ThresholdControl {
    tx: watch::Sender<ThresholdSet>,
}

impl ThresholdControl {
    pub fn new(initial: ThresholdSet) -> (Self, watch::Receiver<ThresholdSet>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, rx)
    }

    pub fn set(&self, metric: MetricKind, value: f64) {
        info!("Threshold for {} set to {}", metric, value);
        self.tx.send_modify(|set| set.set(metric, value));
    }

    pub fn replace(&self, thresholds: ThresholdSet) {
        info!("Thresholds replaced: {:?}", thresholds);
        self.tx.send_replace(thresholds);
    }

    pub fn current(&self) -> ThresholdSet {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ThresholdSet> {
        self.tx.subscribe()
    }
}
