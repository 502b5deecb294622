// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Orchestrator Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing one
// conductor deployment:
// - HTTP server binding
// - Storage backend selection
// - Capacity policy constants (EMA weight, zone thresholds, cooldown)
// - Messaging, event bus and job queue sizing
// - Observability settings

use crate::domain::capacity::CapacityPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const API_VERSION: &str = "conductor.dev/v1";
pub const KIND: &str = "OrchestratorConfig";

/// Top-level orchestrator configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfigManifest {
    /// API version (must be "conductor.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "OrchestratorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: OrchestratorConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfigSpec {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub capacity: CapacityPolicy,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// PostgreSQL connection string (required for the postgres backend)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::InMemory,
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default = "default_ttl_seconds")]
    pub default_ttl_seconds: u64,
    #[serde(default = "default_fetch_limit")]
    pub default_limit: u32,
    #[serde(default = "default_max_fetch_limit")]
    pub max_limit: u32,
    /// Interval of the expired-message purge sweep
    #[serde(default = "default_purge_interval")]
    pub purge_interval_seconds: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_ttl_seconds(),
            default_limit: default_fetch_limit(),
            max_limit: default_max_fetch_limit(),
            purge_interval_seconds: default_purge_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "default_true")]
    pub proactive_enabled: bool,
    #[serde(default = "default_restore_max_tokens")]
    pub default_restore_max_tokens: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            proactive_enabled: true,
            default_restore_max_tokens: default_restore_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics: MetricsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8700
}

fn default_max_connections() -> u32 {
    10
}

fn default_ttl_seconds() -> u64 {
    3600
}

fn default_fetch_limit() -> u32 {
    50
}

fn default_max_fetch_limit() -> u32 {
    500
}

fn default_purge_interval() -> u64 {
    300
}

fn default_channel_capacity() -> usize {
    1000
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_restore_max_tokens() -> usize {
    4000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9700
}

impl Default for OrchestratorConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "conductor".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: OrchestratorConfigSpec::default(),
        }
    }
}

impl OrchestratorConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CONDUCTOR_CONFIG_PATH environment variable
    /// 2. ./conductor-config.yaml (working directory)
    /// 3. ~/.conductor/config.yaml (user home)
    /// 4. /etc/conductor/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CONDUCTOR_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./conductor-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".conductor").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/conductor/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CONDUCTOR_DATABASE_URL") {
            tracing::info!("Environment override: CONDUCTOR_DATABASE_URL (postgres backend)");
            self.spec.storage.database_url = Some(url);
            self.spec.storage.backend = StorageBackend::Postgres;
        }

        if let Ok(val) = std::env::var("CONDUCTOR_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: CONDUCTOR_PORT={}", port);
                    self.spec.server.port = port;
                }
                Err(_) => tracing::warn!("Invalid value for CONDUCTOR_PORT: '{}'. Ignoring.", val),
            }
        }

        if let Ok(level) = std::env::var("CONDUCTOR_LOG_LEVEL") {
            tracing::info!("Environment override: CONDUCTOR_LOG_LEVEL={}", level);
            self.spec.observability.log_level = level;
        }

        if let Ok(val) = std::env::var("CONDUCTOR_MAX_CAPACITY") {
            match val.parse::<u64>() {
                Ok(max) => {
                    tracing::info!("Environment override: CONDUCTOR_MAX_CAPACITY={}", max);
                    self.spec.capacity.max_capacity = max;
                }
                Err(_) => tracing::warn!("Invalid value for CONDUCTOR_MAX_CAPACITY: '{}'. Ignoring.", val),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.trim().is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let capacity = &self.spec.capacity;
        if !capacity.thresholds.is_strictly_increasing() {
            anyhow::bail!("spec.capacity.thresholds must be strictly increasing within (0, 100]");
        }
        if !(capacity.ema_alpha > 0.0 && capacity.ema_alpha <= 1.0) {
            anyhow::bail!("spec.capacity.ema_alpha must be in (0, 1], got {}", capacity.ema_alpha);
        }
        if !(0.0..=1.0).contains(&capacity.reset_retention_ratio) {
            anyhow::bail!(
                "spec.capacity.reset_retention_ratio must be in [0, 1], got {}",
                capacity.reset_retention_ratio
            );
        }
        if capacity.chars_per_token == 0 {
            anyhow::bail!("spec.capacity.chars_per_token cannot be zero");
        }
        if capacity.max_capacity == 0 {
            anyhow::bail!("spec.capacity.max_capacity cannot be zero");
        }

        if self.spec.storage.backend == StorageBackend::Postgres
            && self.spec.storage.database_url.as_deref().is_none_or(str::is_empty)
        {
            anyhow::bail!("spec.storage.database_url is required for the postgres backend");
        }

        if self.spec.messaging.default_limit > self.spec.messaging.max_limit {
            anyhow::bail!("spec.messaging.default_limit cannot exceed max_limit");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest_is_valid() {
        let manifest = OrchestratorConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert!(!manifest.metadata.name.is_empty());
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.spec.capacity.max_capacity, 200_000);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let manifest = OrchestratorConfigManifest::from_yaml_str(
            r#"
apiVersion: conductor.dev/v1
kind: OrchestratorConfig
metadata:
  name: test
spec:
  capacity:
    ema_alpha: 0.5
    thresholds:
      yellow: 40
"#,
        )
        .unwrap();
        assert_eq!(manifest.spec.capacity.ema_alpha, 0.5);
        assert_eq!(manifest.spec.capacity.thresholds.yellow, 40.0);
        assert_eq!(manifest.spec.capacity.thresholds.critical, 95.0);
        assert_eq!(manifest.spec.server.port, 8700);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut manifest = OrchestratorConfigManifest::default();
        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());

        let mut manifest = OrchestratorConfigManifest::default();
        manifest.spec.capacity.ema_alpha = 0.0;
        assert!(manifest.validate().is_err());

        let mut manifest = OrchestratorConfigManifest::default();
        manifest.spec.capacity.thresholds.red = 99.0;
        assert!(manifest.validate().is_err());

        let mut manifest = OrchestratorConfigManifest::default();
        manifest.spec.storage.backend = StorageBackend::Postgres;
        assert!(manifest.validate().is_err());
        manifest.spec.storage.database_url = Some("postgres://localhost/conductor".into());
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor-config.yaml");
        let mut manifest = OrchestratorConfigManifest::default();
        manifest.metadata.name = "roundtrip".to_string();
        manifest.spec.messaging.default_ttl_seconds = 60;
        manifest.to_yaml_file(&path).unwrap();

        let loaded = OrchestratorConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.metadata.name, "roundtrip");
        assert_eq!(loaded.spec.messaging.default_ttl_seconds, 60);
    }
}
