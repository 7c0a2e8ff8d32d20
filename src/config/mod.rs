//! Gateway configuration
//!
//! Typed configuration with a YAML loader. Credentials are resolved by
//! name from the configuration's credential map; the core never reads the
//! process environment directly.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::{GatewayError, Result};
use crate::core::optimizer::Weights;
use crate::core::orchestrator::OrchestratorConfig;
use crate::core::providers::ProviderDescriptor;

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream provider descriptors
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,
    /// Credential map: handle name -> secret
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub lora: LoraConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds between SSE heartbeat comments
    pub heartbeat_interval_secs: u64,
    /// Bound in seconds on a stalled stream
    pub write_deadline_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            heartbeat_interval_secs: 15,
            write_deadline_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub failover_enabled: bool,
    pub max_retries: u32,
    pub availability_ttl_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            failover_enabled: true,
            max_retries: 3,
            availability_ttl_secs: 30,
        }
    }
}

impl RouterConfig {
    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            failover_enabled: self.failover_enabled,
            max_retries: self.max_retries,
            availability_ttl: Duration::from_secs(self.availability_ttl_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub cost_weight: f64,
    pub latency_weight: f64,
    pub quality_weight: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            cost_weight: 1.0 / 3.0,
            latency_weight: 1.0 / 3.0,
            quality_weight: 1.0 / 3.0,
        }
    }
}

impl OptimizerConfig {
    pub fn to_weights(&self) -> Weights {
        Weights::new(self.cost_weight, self.latency_weight, self.quality_weight)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoraConfig {
    pub max_loaded: usize,
    pub max_memory_bytes: u64,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            max_loaded: 4,
            max_memory_bytes: 8 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub check_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 300,
        }
    }
}

impl Config {
    /// Load from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse from a YAML string.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw)
            .map_err(|e| GatewayError::configuration(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot serve requests correctly.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(GatewayError::configuration("provider name must not be empty"));
            }
            if !seen.insert(&provider.name) {
                return Err(GatewayError::configuration(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
            if provider.base_url.is_empty() {
                return Err(GatewayError::configuration(format!(
                    "provider '{}' has no base_url",
                    provider.name
                )));
            }
            if let Some(credential) = &provider.credential {
                if !self.credentials.contains_key(credential) {
                    return Err(GatewayError::configuration(format!(
                        "provider '{}' references unknown credential '{credential}'",
                        provider.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolve a provider's credential handle against the credential map.
    pub fn credential_for(&self, descriptor: &ProviderDescriptor) -> Option<String> {
        descriptor
            .credential
            .as_ref()
            .and_then(|handle| self.credentials.get(handle))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
server:
  host: 0.0.0.0
  port: 9000
  heartbeat_interval_secs: 10
  write_deadline_secs: 60
providers:
  - name: openai
    kind: open_ai
    base_url: https://api.openai.com/v1
    credential: openai_key
  - name: local
    kind: local
    base_url: http://localhost:11434/v1
credentials:
  openai_key: sk-test
router:
  failover_enabled: true
  max_retries: 2
  availability_ttl_secs: 15
"#;

    #[test]
    fn sample_config_parses() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.router.max_retries, 2);
        assert_eq!(
            config.credential_for(&config.providers[0]).as_deref(),
            Some("sk-test")
        );
        assert!(config.credential_for(&config.providers[1]).is_none());
    }

    #[test]
    fn unknown_credential_handle_rejected() {
        let raw = r#"
providers:
  - name: openai
    kind: open_ai
    base_url: https://api.openai.com/v1
    credential: missing
"#;
        assert!(Config::from_yaml(raw).is_err());
    }

    #[test]
    fn duplicate_provider_names_rejected() {
        let raw = r#"
providers:
  - name: a
    kind: local
    base_url: http://x
  - name: a
    kind: local
    base_url: http://y
"#;
        assert!(Config::from_yaml(raw).is_err());
    }

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.health.check_interval_secs, 300);
        assert!(config.router.failover_enabled);
        assert!((config.optimizer.to_weights().sum() - 1.0).abs() < 1e-9);
    }
}
