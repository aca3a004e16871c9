//! Configuration loading and validation

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
    /// Component name -> registry repository slug. The component set is
    /// closed per deployment: only names listed here are ever updated.
    #[serde(default)]
    pub components: BTreeMap<String, ComponentConfig>,
    #[serde(default)]
    pub install: InstallConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Initial records for first observation of a device/component pair.
    /// Applied with INSERT OR IGNORE, never overwriting live state.
    #[serde(default)]
    pub seed: Vec<SeedRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the release registry API
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Environment variable holding the bearer token, if any
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token_env: default_token_env(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_token_env() -> String {
    "ROOST_REGISTRY_TOKEN".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Known device identifiers the orchestrator iterates over
    #[serde(default)]
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Repository slug (`owner/name`) publishing this component's releases
    pub repo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Root directory for installed artifact trees:
    /// `{root}/{device}/{component}`
    #[serde(default = "default_install_root")]
    pub root: PathBuf,
    /// Per-download timeout in seconds
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
    /// Worker pool bound for fleet-wide update sweeps
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Refuse installs when the release publishes no checksum
    #[serde(default = "default_true")]
    pub require_checksum: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            root: default_install_root(),
            download_timeout_secs: default_download_timeout(),
            max_concurrent: default_max_concurrent(),
            require_checksum: true,
        }
    }
}

fn default_install_root() -> PathBuf {
    PathBuf::from("/var/lib/roost/installs")
}

fn default_download_timeout() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    4
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite firmware database
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/roost/firmware.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRecord {
    pub device: String,
    pub component: String,
    pub version: String,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: String,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    validate(&config)?;
    info!(
        devices = config.fleet.devices.len(),
        components = config.components.len(),
        "Configuration loaded"
    );
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.fleet.devices.is_empty() {
        bail!("fleet.devices must list at least one device");
    }
    if config.components.is_empty() {
        bail!("at least one [components.<name>] section is required");
    }
    for (name, component) in &config.components {
        if !component.repo.contains('/') {
            bail!("components.{name}.repo must be an owner/name slug, got {:?}", component.repo);
        }
    }
    for seed in &config.seed {
        if !config.fleet.devices.contains(&seed.device) {
            bail!("seed entry references unknown device {:?}", seed.device);
        }
        if !config.components.contains_key(&seed.component) {
            bail!("seed entry references unknown component {:?}", seed.component);
        }
    }
    Ok(())
}

impl Config {
    /// Component names in deterministic order.
    pub fn component_names(&self) -> Vec<String> {
        self.components.keys().cloned().collect()
    }

    /// Bearer token for the registry, read from the configured
    /// environment variable. Credential sourcing stays outside the core.
    pub fn registry_token(&self) -> Option<String> {
        std::env::var(&self.registry.token_env)
            .ok()
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
[registry]
api_base = "https://api.github.com"
token_env = "ROOST_REGISTRY_TOKEN"

[fleet]
devices = ["aria64", "alice", "blackroad-pi"]

[components.kernel]
repo = "example/linux-firmware"

[components.os]
repo = "example/os-image"

[install]
root = "/var/lib/roost/installs"
download_timeout_secs = 120
max_concurrent = 2
require_checksum = true

[store]
path = "/var/lib/roost/firmware.db"

[[seed]]
device = "alice"
component = "kernel"
version = "6.6.31"
release_date = "2024-05-17"
"#;

    #[test]
    fn test_parse_example() {
        let config: Config = toml::from_str(EXAMPLE).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.fleet.devices.len(), 3);
        assert_eq!(config.component_names(), vec!["kernel", "os"]);
        assert_eq!(config.install.max_concurrent, 2);
        assert_eq!(config.seed[0].version, "6.6.31");
        assert_eq!(
            config.seed[0].release_date,
            Some(NaiveDate::from_ymd_opt(2024, 5, 17).unwrap())
        );
    }

    #[test]
    fn test_defaults_fill_in() {
        let config: Config = toml::from_str(
            r#"
[fleet]
devices = ["alice"]

[components.kernel]
repo = "example/linux-firmware"
"#,
        )
        .unwrap();
        validate(&config).unwrap();
        assert_eq!(config.registry.api_base, "https://api.github.com");
        assert_eq!(config.install.download_timeout_secs, 300);
        assert!(config.install.require_checksum);
    }

    #[test]
    fn test_rejects_unknown_seed_device() {
        let config: Config = toml::from_str(
            r#"
[fleet]
devices = ["alice"]

[components.kernel]
repo = "example/linux-firmware"

[[seed]]
device = "mallory"
component = "kernel"
version = "1.0"
"#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_bad_repo_slug() {
        let config: Config = toml::from_str(
            r#"
[fleet]
devices = ["alice"]

[components.kernel]
repo = "not-a-slug"
"#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }
}
