use serde::{Deserialize, Serialize};

/// Broker endpoint and session options.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Empty means the broker is used anonymously.
    pub username: String,
    pub password: String,
    pub client_prefix: String,
    pub keep_alive_secs: u64,
    /// Capacity of the rumqttc request queue.
    pub request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_prefix: "DataMgr-".to_string(),
            keep_alive_secs: 5,
            request_capacity: 100,
        }
    }
}

impl MqttConfig {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    /// Fresh client id per connect so parallel instances never kick each other.
    pub fn client_id(&self) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}{}", self.client_prefix, &suffix[..8])
    }
}
