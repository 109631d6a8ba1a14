use std::collections::HashMap;

use crate::model::{MetricKind, SensorRoom};

/// Explicit attribution for a topic that does not follow the room naming scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicOverride {
    pub topic: String,
    pub room: String,
    pub metric: MetricKind,
}

/// Outcome of resolving a topic. Resolution never fails.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved { room: String, metric: MetricKind },
    Unresolved,
}

impl Resolution {
    pub fn room(&self) -> Option<&str> {
        match self {
            Resolution::Resolved { room, .. } => Some(room),
            Resolution::Unresolved => None,
        }
    }
}

/// Pure lookup over the override table and the room registry.
///
/// Overrides win over the registry. Matching is exact; no wildcards.
#[derive(Debug, Clone, Default)]
pub struct TopicResolver {
    overrides: HashMap<String, (String, MetricKind)>,
    rooms: Vec<SensorRoom>,
}

impl TopicResolver {
    pub fn new(rooms: Vec<SensorRoom>, overrides: impl IntoIterator<Item = TopicOverride>) -> Self {
        let overrides = overrides
            .into_iter()
            .map(|o| (o.topic, (o.room, o.metric)))
            .collect();
        Self { overrides, rooms }
    }

    pub fn resolve(&self, topic: &str) -> Resolution {
        if let Some((room, metric)) = self.overrides.get(topic) {
            return Resolution::Resolved {
                room: room.clone(),
                metric: *metric,
            };
        }

        self.rooms
            .iter()
            .flat_map(|room| {
                room.sensors
                    .iter()
                    .map(move |(metric, sensor_topic)| (room, *metric, sensor_topic))
            })
            .find(|(_, _, sensor_topic)| sensor_topic.as_str() == topic)
            .map_or(Resolution::Unresolved, |(room, metric, _)| {
                Resolution::Resolved {
                    room: room.name.clone(),
                    metric,
                }
            })
    }

    pub fn rooms(&self) -> &[SensorRoom] {
        &self.rooms
    }

    pub fn room_names(&self) -> Vec<&str> {
        self.rooms.iter().map(|room| room.name.as_str()).collect()
    }

    /// Every topic of the registry, in registry order.
    pub fn registry_topics(&self) -> Vec<&str> {
        self.rooms
            .iter()
            .flat_map(|room| room.sensors.iter().map(|(_, topic)| topic.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolver() -> TopicResolver {
        let rooms = vec![
            SensorRoom {
                name: "Living Room".to_string(),
                id: 1,
                sensors: vec![
                    (MetricKind::Temperature, "pr/home/room1/temperature".to_string()),
                    (MetricKind::Humidity, "pr/home/room1/humidity".to_string()),
                ],
            },
            SensorRoom {
                name: "Bedroom".to_string(),
                id: 2,
                sensors: vec![
                    (MetricKind::Temperature, "pr/home/room2/temperature".to_string()),
                    (MetricKind::Illuminance, "pr/home/room2/light".to_string()),
                ],
            },
        ];
        let overrides = vec![
            TopicOverride {
                topic: "pr/home/5976397/sts".to_string(),
                room: "Living Room".to_string(),
                metric: MetricKind::Humidity,
            },
            // Shadows the registry entry for the same topic.
            TopicOverride {
                topic: "pr/home/room2/temperature".to_string(),
                room: "Living Room".to_string(),
                metric: MetricKind::GasWeight,
            },
        ];
        TopicResolver::new(rooms, overrides)
    }

    #[test]
    fn registry_topics_resolve_to_their_room() {
        assert_eq!(
            resolver().resolve("pr/home/room2/light"),
            Resolution::Resolved {
                room: "Bedroom".to_string(),
                metric: MetricKind::Illuminance,
            }
        );
    }

    #[test]
    fn non_conforming_topics_resolve_through_overrides() {
        assert_eq!(
            resolver().resolve("pr/home/5976397/sts"),
            Resolution::Resolved {
                room: "Living Room".to_string(),
                metric: MetricKind::Humidity,
            }
        );
    }

    #[test]
    fn override_beats_registry() {
        assert_eq!(
            resolver().resolve("pr/home/room2/temperature"),
            Resolution::Resolved {
                room: "Living Room".to_string(),
                metric: MetricKind::GasWeight,
            }
        );
    }

    #[test]
    fn unknown_and_partial_topics_are_unresolved() {
        let resolver = resolver();
        for topic in ["pr/home/alarm", "pr/home/room1", "pr/home/room1/#", "", "PR/HOME/ROOM1/HUMIDITY"] {
            assert_eq!(resolver.resolve(topic), Resolution::Unresolved, "{topic}");
        }
    }

    #[test]
    fn registry_listing_keeps_order() {
        let resolver = resolver();
        assert_eq!(resolver.room_names(), vec!["Living Room", "Bedroom"]);
        assert_eq!(resolver.registry_topics().len(), 4);
        assert_eq!(resolver.registry_topics()[0], "pr/home/room1/temperature");
        assert_eq!(resolver.rooms()[1].id, 2);
    }
}
