//! Static configuration loaded once at startup.
//!
//! Everything the pipeline needs lives in one TOML file: broker endpoint and
//! credentials, the room registry, topic overrides, thresholds, key aliases
//! and storage location. A missing file is replaced by the defaults below so a
//! fresh install starts against the public demo broker.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alarm::thresholds::ThresholdSet;
use crate::cache::OrderingPolicy;
use crate::error::ConfigError;
use crate::model::{MetricKind, SensorRoom};
use crate::mqtt::config::MqttConfig;
use crate::payload::aliases::FieldAliases;
use crate::topic::resolver::{TopicOverride, TopicResolver};

const APP_DIR: &str = "roomsense";
const CONFIG_FILE: &str = "config.toml";
pub const CONFIG_ENV: &str = "ROOMSENSE_CONFIG";

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct AppConfig {
    pub broker: MqttConfig,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub alarm: AlarmConfig,
    #[serde(default)]
    pub thresholds: ThresholdSet,
    #[serde(default)]
    pub fields: FieldAliases,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub overrides: BTreeMap<String, OverrideTarget>,
    #[serde(default)]
    pub rooms: Vec<RoomConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TopicConfig {
    pub common_prefix: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            common_prefix: "pr/home/".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct AlarmConfig {
    /// Overrides `<common_prefix>alarm`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Minimum seconds between alarms for the same room. Unset means every
    /// exceeding message alarms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_secs: Option<u64>,
    /// Also append outbound alarms to the message store.
    #[serde(default)]
    pub persist: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sensor_data.db"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub ordering: OrderingPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            ordering: OrderingPolicy::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct OverrideTarget {
    pub room: String,
    pub metric: MetricKind,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RoomConfig {
    pub name: String,
    pub id: u32,
    #[serde(default)]
    pub sensors: SensorTopics,
}

/// Topic per sensor of a room; rooms may lack any of them.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct SensorTopics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<String>,
    #[serde(default, alias = "light", skip_serializing_if = "Option::is_none")]
    pub illuminance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_weight: Option<String>,
}

impl SensorTopics {
    fn entries(&self) -> Vec<(MetricKind, String)> {
        [
            (MetricKind::Temperature, &self.temperature),
            (MetricKind::Humidity, &self.humidity),
            (MetricKind::Illuminance, &self.illuminance),
            (MetricKind::GasWeight, &self.gas_weight),
        ]
        .into_iter()
        .filter_map(|(kind, topic)| topic.clone().map(|t| (kind, t)))
        .collect()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let rooms = [
            "Living Room",
            "Bedroom",
            "Kitchen",
            "Bathroom",
            "Office",
            "Garage",
        ]
        .iter()
        .zip(1u32..)
        .map(|(name, id)| RoomConfig {
            name: (*name).to_string(),
            id,
            sensors: SensorTopics {
                temperature: Some(format!("pr/home/room{id}/temperature")),
                humidity: Some(format!("pr/home/room{id}/humidity")),
                illuminance: Some(format!("pr/home/room{id}/light")),
                gas_weight: None,
            },
        })
        .collect();

        let overrides = [
            ("pr/home/5976397/sts", "Living Room"),
            ("pr/home/room1/humidity", "Living Room"),
            ("pr/home/room2/humidity", "Bedroom"),
        ]
        .into_iter()
        .map(|(topic, room)| {
            (
                topic.to_string(),
                OverrideTarget {
                    room: room.to_string(),
                    metric: MetricKind::Humidity,
                },
            )
        })
        .collect();

        Self {
            broker: MqttConfig::default(),
            topics: TopicConfig::default(),
            alarm: AlarmConfig::default(),
            thresholds: ThresholdSet::default(),
            fields: FieldAliases::default(),
            storage: StorageConfig::default(),
            pipeline: PipelineConfig::default(),
            overrides,
            rooms,
        }
    }
}

impl AppConfig {
    /// Default config path: `<config_dir>/roomsense/config.toml`.
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(APP_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Writes the default configuration if nothing exists at `path`.
    pub async fn ensure_default_config(path: &Path) -> Result<(), ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if exists {
            return Ok(());
        }

        info!("Creating default configuration at {}", path.display());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        AppConfig::default().save(path).await
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
        let config: AppConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!(
            "Loaded configuration from {} ({} rooms, {} overrides)",
            path.display(),
            config.rooms.len(),
            config.overrides.len()
        );
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for room in &self.rooms {
            if !names.insert(room.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "room '{}' is defined twice",
                    room.name
                )));
            }
        }
        for (topic, target) in &self.overrides {
            if !names.contains(target.room.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "override for '{}' points at unknown room '{}'",
                    topic, target.room
                )));
            }
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn subscription(&self) -> String {
        format!("{}#", self.topics.common_prefix)
    }

    pub fn alarm_topic(&self) -> String {
        self.alarm
            .topic
            .clone()
            .unwrap_or_else(|| format!("{}alarm", self.topics.common_prefix))
    }

    pub fn sensor_rooms(&self) -> Vec<SensorRoom> {
        self.rooms
            .iter()
            .map(|room| SensorRoom {
                name: room.name.clone(),
                id: room.id,
                sensors: room.sensors.entries(),
            })
            .collect()
    }

    pub fn resolver(&self) -> TopicResolver {
        let overrides = self.overrides.iter().map(|(topic, target)| TopicOverride {
            topic: topic.clone(),
            room: target.room.clone(),
            metric: target.metric,
        });
        TopicResolver::new(self.sensor_rooms(), overrides)
    }
}
