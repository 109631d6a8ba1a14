use serde::{Deserialize, Serialize};

use crate::model::MetricKind;

/// Ordered candidate keys per metric. The first key present wins.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FieldAliases {
    pub temperature: Vec<String>,
    pub humidity: Vec<String>,
    #[serde(alias = "light")]
    pub illuminance: Vec<String>,
    pub gas_weight: Vec<String>,
}

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_string()).collect()
}

impl Default for FieldAliases {
    fn default() -> Self {
        Self {
            temperature: keys(&["temperature", "temp", "Temp", "TEMP"]),
            humidity: keys(&["humidity", "Humidity (%)", "humidity_%", "hum"]),
            illuminance: keys(&["lux", "light", "Light"]),
            gas_weight: keys(&["gas_weight"]),
        }
    }
}

impl FieldAliases {
    pub fn candidates(&self, metric: MetricKind) -> &[String] {
        match metric {
            MetricKind::Temperature => &self.temperature,
            MetricKind::Humidity => &self.humidity,
            MetricKind::Illuminance => &self.illuminance,
            MetricKind::GasWeight => &self.gas_weight,
        }
    }

    pub fn set_candidates(&mut self, metric: MetricKind, candidates: Vec<String>) {
        match metric {
            MetricKind::Temperature => self.temperature = candidates,
            MetricKind::Humidity => self.humidity = candidates,
            MetricKind::Illuminance => self.illuminance = candidates,
            MetricKind::GasWeight => self.gas_weight = candidates,
        }
    }

    /// True if `text` mentions any candidate key of `metric` as a JSON key.
    /// Cheap prefilter for stored payloads; a hit still needs parsing.
    pub fn mentioned_in(&self, metric: MetricKind, text: &str) -> bool {
        self.candidates(metric)
            .iter()
            .any(|key| text.contains(&format!("\"{key}\"")))
    }
}
