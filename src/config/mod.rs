//! Config Store: loads, parses, and atomically replaces the managed
//! service's on-disk configuration document.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

pub const CONFIG_RELATIVE_PATH: &str = "Config/Config.yml";

/// The managed service's configuration document.
///
/// Field names mirror the YAML keys the control plane and the managed
/// service agree on; do not rename them without a matching control-plane
/// change.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(rename = "LicenseKey")]
    pub license_key: String,
    #[serde(rename = "Webservice")]
    pub webservice: WebserviceConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WebserviceConfig {
    #[serde(rename = "Endpoint")]
    pub endpoint: String,
    #[serde(rename = "UseProxy", default)]
    pub use_proxy: bool,
    #[serde(rename = "ProxyAddress", default)]
    pub proxy_address: String,
}

impl AgentConfig {
    /// Parses and validates a config document already read into memory.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: AgentConfig = serde_yaml::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates field invariants per the data model: non-empty license,
    /// parseable endpoint, and (when proxying) a parseable proxy address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.license_key.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "LicenseKey".into(),
            });
        }
        Url::parse(&self.webservice.endpoint)?;
        if self.webservice.use_proxy {
            if self.webservice.proxy_address.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: "Webservice.ProxyAddress".into(),
                });
            }
            Url::parse(&self.webservice.proxy_address)?;
        }
        Ok(())
    }

    /// Loads the config currently installed at `base_dir`/Config/Config.yml.
    pub fn load_current(base_dir: &Path) -> Result<Self, ConfigError> {
        Self::load_from(&config_path(base_dir))
    }

    /// Loads and parses an arbitrary config file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_bytes(&bytes)
    }

    /// Returns the proxy URL iff proxying is enabled.
    pub fn proxy_url(&self) -> Option<&str> {
        self.webservice.use_proxy.then_some(self.webservice.proxy_address.as_str())
    }
}

/// Returns the absolute path to the managed service's config file under
/// `base_dir`, mirroring the original `FindAgentConfigFile`.
pub fn config_path(base_dir: &Path) -> PathBuf {
    base_dir.join(CONFIG_RELATIVE_PATH)
}

/// Atomically replaces the config file at `current_path` with the bytes
/// at `candidate_path` via rename, per the GET-CONFIG flow (§4.4.1).
pub fn atomically_replace(candidate_path: &Path, current_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = current_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(candidate_path, current_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml(use_proxy: bool) -> String {
        format!(
            "LicenseKey: abc123\nWebservice:\n  Endpoint: https://control.example.com\n  UseProxy: {use_proxy}\n  ProxyAddress: {}\n",
            if use_proxy { "http://proxy.example.com:8080" } else { "" }
        )
    }

    #[test]
    fn parses_well_formed_config() {
        let config = AgentConfig::parse_bytes(sample_yaml(false).as_bytes()).unwrap();
        assert_eq!(config.license_key, "abc123");
        assert_eq!(config.webservice.endpoint, "https://control.example.com");
        assert!(!config.webservice.use_proxy);
    }

    #[test]
    fn rejects_empty_license_key() {
        let yaml = "LicenseKey: \"\"\nWebservice:\n  Endpoint: https://control.example.com\n";
        assert!(matches!(
            AgentConfig::parse_bytes(yaml.as_bytes()),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn rejects_unparseable_endpoint() {
        let yaml = "LicenseKey: abc123\nWebservice:\n  Endpoint: \"not a url\"\n";
        assert!(matches!(
            AgentConfig::parse_bytes(yaml.as_bytes()),
            Err(ConfigError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn requires_proxy_address_when_use_proxy_is_set() {
        let yaml = "LicenseKey: abc123\nWebservice:\n  Endpoint: https://control.example.com\n  UseProxy: true\n";
        assert!(matches!(
            AgentConfig::parse_bytes(yaml.as_bytes()),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn accepts_valid_proxy_config() {
        let config = AgentConfig::parse_bytes(sample_yaml(true).as_bytes()).unwrap();
        assert_eq!(config.proxy_url(), Some("http://proxy.example.com:8080"));
    }

    #[test]
    fn load_current_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = AgentConfig::load_current(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn atomic_replace_renames_candidate_over_current() {
        let dir = tempfile::tempdir().unwrap();
        let current = dir.path().join("Config/Config.yml");
        std::fs::create_dir_all(current.parent().unwrap()).unwrap();
        std::fs::write(&current, sample_yaml(false)).unwrap();

        let candidate = dir.path().join("incoming-config/Config.yml");
        std::fs::create_dir_all(candidate.parent().unwrap()).unwrap();
        let candidate_bytes = "LicenseKey: new-license\nWebservice:\n  Endpoint: https://new.example.com\n";
        std::fs::write(&candidate, candidate_bytes).unwrap();

        atomically_replace(&candidate, &current).unwrap();

        let replaced = std::fs::read_to_string(&current).unwrap();
        assert_eq!(replaced, candidate_bytes);
        assert!(!candidate.exists());
    }
}
