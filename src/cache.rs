//! Latest value per (room, metric).
//!
//! Owned by the pipeline consumer, so it needs no locking: every write comes
//! from the single task that drains the handoff queue.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{MetricKind, Reading};

/// How the cache treats an update older than the value it already holds.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Newest arrival replaces the cached value regardless of its timestamp.
    #[default]
    LastWriteWins,
    /// Updates with a timestamp before the cached one are dropped.
    Monotonic,
}

#[derive(Debug, Default)]
pub struct ReadingCache {
    readings: HashMap<(String, MetricKind), Reading>,
    policy: OrderingPolicy,
}

impl ReadingCache {
    pub fn new(policy: OrderingPolicy) -> Self {
        Self {
            readings: HashMap::new(),
            policy,
        }
    }

    /// Stores `value` as the latest reading. Returns false if the ordering
    /// policy rejected it.
    pub fn update(
        &mut self,
        room: &str,
        metric: MetricKind,
        value: f64,
        observed_at: NaiveDateTime,
    ) -> bool {
        let key = (room.to_string(), metric);
        if self.policy == OrderingPolicy::Monotonic {
            if let Some(current) = self.readings.get(&key) {
                if observed_at < current.observed_at {
                    debug!(
                        "Dropping out-of-order {} for {}: {} < {}",
                        metric, room, observed_at, current.observed_at
                    );
                    return false;
                }
            }
        }

        self.readings.insert(
            key,
            Reading {
                room: room.to_string(),
                metric,
                value,
                observed_at,
            },
        );
        true
    }

    pub fn get(&self, room: &str, metric: MetricKind) -> Option<f64> {
        self.reading(room, metric).map(|reading| reading.value)
    }

    pub fn reading(&self, room: &str, metric: MetricKind) -> Option<&Reading> {
        self.readings.get(&(room.to_string(), metric))
    }

    /// All cached readings of a room, in metric order.
    pub fn room_snapshot(&self, room: &str) -> Vec<Reading> {
        MetricKind::ALL
            .iter()
            .filter_map(|metric| self.reading(room, *metric).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
