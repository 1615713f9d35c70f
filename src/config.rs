//! Security configuration.
//!
//! Loads the controller identity and the permanent network keys from a
//! YAML file. Keys are hex-encoded 16-byte values, loaded once at startup
//! and held in memory only; nothing is ever persisted back.
//!
//! ```yaml
//! node:
//!   node_id: 1
//!   home_id: 3735928559
//! security_keys:
//!   s2_access_control: "0102030405060708090a0b0c0d0e0f10"
//!   s2_authenticated:  "101112131415161718191a1b1c1d1e1f"
//! ```

use crate::s2::manager::SecurityManager2;
use crate::types::{HomeId, NodeId, SecurityClass};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("invalid key for {class}: {reason}")]
    InvalidKey {
        class: &'static str,
        reason: String,
    },
}

/// Controller identity (`node.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Our node id on the network (`node.node_id`).
    pub node_id: NodeId,
    /// The 32-bit network identifier (`node.home_id`).
    pub home_id: HomeId,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new(1),
            home_id: HomeId::new(0),
        }
    }
}

/// Hex-encoded permanent network keys (`security_keys.*`). A missing
/// entry leaves that class unconfigured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityKeysConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s0_legacy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s2_unauthenticated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s2_authenticated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s2_access_control: Option<String>,
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Controller identity (`node.*`).
    #[serde(default)]
    pub node: NodeConfig,

    /// Network keys (`security_keys.*`).
    #[serde(default)]
    pub security_keys: SecurityKeysConfig,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Build a [`SecurityManager2`] with every configured key installed.
    pub fn build_security_manager(&self) -> Result<SecurityManager2, ConfigError> {
        let mut sm = SecurityManager2::new();
        let entries = [
            (
                SecurityClass::S0Legacy,
                "s0_legacy",
                &self.security_keys.s0_legacy,
            ),
            (
                SecurityClass::S2Unauthenticated,
                "s2_unauthenticated",
                &self.security_keys.s2_unauthenticated,
            ),
            (
                SecurityClass::S2Authenticated,
                "s2_authenticated",
                &self.security_keys.s2_authenticated,
            ),
            (
                SecurityClass::S2AccessControl,
                "s2_access_control",
                &self.security_keys.s2_access_control,
            ),
        ];
        for (class, name, hex_key) in entries {
            if let Some(hex_key) = hex_key {
                sm.set_network_key(class, &decode_key(name, hex_key)?);
            }
        }
        Ok(sm)
    }
}

fn decode_key(class: &'static str, hex_key: &str) -> Result<[u8; 16], ConfigError> {
    let bytes = hex::decode(hex_key.trim()).map_err(|e| ConfigError::InvalidKey {
        class,
        reason: e.to_string(),
    })?;
    bytes.try_into().map_err(|_| ConfigError::InvalidKey {
        class,
        reason: "network keys must be 16 bytes".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
node:
  node_id: 1
  home_id: 3735928559
security_keys:
  s2_authenticated: "101112131415161718191a1b1c1d1e1f"
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.node.node_id, NodeId::new(1));
        assert_eq!(config.node.home_id, HomeId::new(0xDEADBEEF));

        let sm = config.build_security_manager().unwrap();
        assert!(sm.has_keys_for_security_class(SecurityClass::S2Authenticated));
        assert!(!sm.has_keys_for_security_class(SecurityClass::S2AccessControl));
    }

    #[test]
    fn test_empty_config_defaults() {
        let config = Config::from_yaml_str("{}").unwrap();
        assert_eq!(config.node.node_id, NodeId::new(1));
        let sm = config.build_security_manager().unwrap();
        assert!(!sm.has_keys_for_security_class(SecurityClass::S2Unauthenticated));
    }

    #[test]
    fn test_invalid_key_length() {
        let yaml = r#"
security_keys:
  s2_authenticated: "1011"
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            config.build_security_manager(),
            Err(ConfigError::InvalidKey {
                class: "s2_authenticated",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_hex() {
        let yaml = r#"
security_keys:
  s0_legacy: "zz112233"
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert!(config.build_security_manager().is_err());
    }
}
