use core::fmt;

use serde::Deserialize;

use crate::connectivity::RetryPolicy;

/// Which sensors are fitted to the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SensorSelection {
    pub dht11: bool,
    pub soil_moisture: bool,
    pub soil_temperature: bool,
    pub bme280: bool,
}

impl Default for SensorSelection {
    fn default() -> Self {
        Self {
            dht11: true,
            soil_moisture: true,
            soil_temperature: true,
            bme280: false,
        }
    }
}

/// GPIO assignment on the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Pins {
    pub dht: i32,
    pub soil_moisture: i32,
    pub one_wire: i32,
    pub i2c_sda: i32,
    pub i2c_scl: i32,
    pub bme280_address: u8,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            dht: 18,
            soil_moisture: 27,
            one_wire: 26,
            i2c_sda: 21,
            i2c_scl: 22,
            bme280_address: 0x76,
        }
    }
}

/// Node configuration. Every field has a default, so a JSON document only
/// needs to name what it changes. Secrets are not part of it.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Farm owner, the first segment of every remote path.
    pub owner: String,
    /// Node name below `<owner>/FarmData`.
    pub node: String,
    /// Minimum time between two upload attempts.
    pub upload_interval_ms: u32,
    /// Pause between two iterations of the main loop.
    pub loop_delay_ms: u32,
    pub sensors: SensorSelection,
    pub pins: Pins,
    pub wifi_retry: RetryPolicy,
    pub session_retry: RetryPolicy,
    pub sea_level_hpa: f64,
    pub soil_temperature_settle_ms: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            owner: "Niranj".into(),
            node: "Node1".into(),
            upload_interval_ms: 10_000,
            loop_delay_ms: 2_000,
            sensors: SensorSelection::default(),
            pins: Pins::default(),
            wifi_retry: RetryPolicy::new(20, 500),
            session_retry: RetryPolicy::new(30, 500),
            sea_level_hpa: 1013.25,
            soil_temperature_settle_ms: 50,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "invalid configuration: {e}"),
            Self::Invalid(reason) => write!(f, "invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl NodeConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("owner must not be empty"));
        }
        if self.node.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("node must not be empty"));
        }
        if self.upload_interval_ms == 0 {
            return Err(ConfigError::Invalid("upload_interval_ms must not be zero"));
        }
        if self.wifi_retry.attempts == 0 || self.session_retry.attempts == 0 {
            return Err(ConfigError::Invalid("retry attempts must not be zero"));
        }
        if self.sea_level_hpa.is_nan() || self.sea_level_hpa <= 0.0 {
            return Err(ConfigError::Invalid("sea_level_hpa must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = NodeConfig::from_json_str("{}").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.upload_interval_ms, 10_000);
        assert!(config.sensors.dht11);
        assert!(!config.sensors.bme280);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = NodeConfig::from_json_str(
            r#"{
                "owner": "Asha",
                "node": "/Node7",
                "upload_interval_ms": 2000,
                "sensors": { "bme280": true },
                "wifi_retry": { "attempts": 5, "delay_ms": 250 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.owner, "Asha");
        assert_eq!(config.upload_interval_ms, 2000);
        assert!(config.sensors.bme280);
        assert!(config.sensors.soil_moisture);
        assert_eq!(config.wifi_retry, RetryPolicy::new(5, 250));
        assert_eq!(config.pins.dht, 18);
    }

    #[test]
    fn invalid_documents_are_rejected() {
        assert!(matches!(
            NodeConfig::from_json_str(r#"{ "owner": "/" }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            NodeConfig::from_json_str(r#"{ "upload_interval_ms": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            NodeConfig::from_json_str(r#"{ "upload_interval_ms": "soon" }"#),
            Err(ConfigError::Parse(_))
        ));
    }
}
