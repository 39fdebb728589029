//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Explicit `--config` path
//! 2. Current directory: ./dockdash.toml or ./.dockdash/config.toml
//! 3. User config: ~/.dockdash/config.toml
//! 4. System config: /etc/dockdash/config.toml
//! 5. Built-in defaults

use crate::container::{
    ContainerClientConfig, LaunchSpec, NetworkSpec, OrchestratorConfig, VolumeMapping,
};
use crate::env;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Daemon connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// `unix://…`, `tcp://…` or `http://…`; unset means `DOCKER_HOST` or the local socket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        let client = ContainerClientConfig::default();
        Self {
            host: client.host,
            timeout_secs: client.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub settle_delay_secs: u64,
    pub stop_timeout_secs: i64,
    pub auto_pull: bool,
    pub follow_logs: bool,
    pub network_fail_fast: bool,
    pub exclusive_names: bool,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        let config = OrchestratorConfig::default();
        Self {
            settle_delay_secs: config.settle_delay.as_secs(),
            stop_timeout_secs: config.stop_timeout_secs,
            auto_pull: config.auto_pull,
            follow_logs: config.follow_logs,
            network_fail_fast: config.network_fail_fast,
            exclusive_names: config.exclusive_names,
        }
    }
}

/// The container to launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    pub command: Vec<String>,
    /// `KEY=VALUE` entries
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_ip: Option<String>,
    pub tty: bool,
    /// `"3306/tcp" = "3700"`
    pub port_mappings: BTreeMap<String, String>,
    pub volume_mappings: Vec<VolumeMapping>,
    pub labels: BTreeMap<String, String>,
}

/// Complete file configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashConfig {
    pub runtime: RuntimeSection,
    pub orchestrator: OrchestratorSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,
    pub container: ContainerSection,
}

impl DashConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigLoadError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigLoadError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigLoadError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        fs::write(path, content).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `DOCKDASH_HOST` if set.
    pub fn with_env_overrides(self) -> Self {
        self.with_host_override(std_env::var(env::HOST_ENV_VAR).ok())
    }

    /// Replace `runtime.host` when `host` is set and non-empty.
    pub fn with_host_override(mut self, host: Option<String>) -> Self {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            debug!("Runtime host overridden to {}", host);
            self.runtime.host = Some(host);
        }
        self
    }

    pub fn client_config(&self) -> ContainerClientConfig {
        ContainerClientConfig {
            host: self.runtime.host.clone(),
            timeout: self.runtime.timeout_secs,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let section = &self.orchestrator;
        OrchestratorConfig {
            settle_delay: Duration::from_secs(section.settle_delay_secs),
            stop_timeout_secs: section.stop_timeout_secs,
            auto_pull: section.auto_pull,
            follow_logs: section.follow_logs,
            network_fail_fast: section.network_fail_fast,
            exclusive_names: section.exclusive_names,
        }
    }

    pub fn network_spec(&self) -> Option<NetworkSpec> {
        self.network.clone()
    }

    /// Build the launch spec described by the `[container]` and `[network]` sections.
    ///
    /// # Errors
    ///
    /// Returns [`crate::container::ContainerError::ConfigError`] when required fields
    /// are missing or inconsistent.
    pub fn launch_spec(&self) -> crate::container::Result<LaunchSpec> {
        let container = &self.container;
        let mut builder = LaunchSpec::builder()
            .with_command(container.command.iter().cloned())
            .with_env_entries(container.env.iter().cloned())
            .with_port_mappings(container.port_mappings.clone())
            .with_volume_mappings(container.volume_mappings.iter().cloned())
            .with_tty(container.tty);

        if let Some(image) = &container.image {
            builder = builder.with_image(image.as_str());
        }
        if let Some(name) = &container.container_name {
            builder = builder.with_container_name(name.as_str());
        }
        if let Some(ip) = &container.static_ip {
            builder = builder.with_static_ip(ip.as_str());
        }
        for (key, value) in &container.labels {
            builder = builder.with_label(key.as_str(), value.as_str());
        }
        if let Some(network) = &self.network {
            builder = builder.with_network_spec(network);
        }

        builder.build()
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load the explicit file if given, otherwise walk the discovery hierarchy.
    ///
    /// Environment overrides are applied last.
    pub fn discover_config(explicit: Option<&Path>) -> Result<DashConfig, ConfigLoadError> {
        let config = match explicit {
            Some(path) => {
                info!("Loading configuration from: {:?}", path);
                DashConfig::from_toml_file(path)?
            }
            None => match Self::find_config_file() {
                Some(path) => {
                    info!("Loading configuration from: {:?}", path);
                    DashConfig::from_toml_file(path)?
                }
                None => {
                    info!("No configuration file found, using defaults");
                    DashConfig::default()
                }
            },
        };
        Ok(config.with_env_overrides())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        Self::first_existing(Self::get_config_candidates())
    }

    fn first_existing(candidates: Vec<PathBuf>) -> Option<PathBuf> {
        for candidate in candidates {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Get list of configuration file candidates in priority order
    pub fn get_config_candidates() -> Vec<PathBuf> {
        Self::candidates_for(
            std_env::current_dir().ok().as_deref(),
            Self::get_home_dir().as_deref(),
        )
    }

    fn candidates_for(current_dir: Option<&Path>, home_dir: Option<&Path>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(current_dir) = current_dir {
            candidates.push(env::local_flat_config_file_path(current_dir));
            candidates.push(env::local_config_file_path(current_dir));
        }

        if let Some(home_dir) = home_dir {
            candidates.push(env::user_config_file_path(home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from(env::SYSTEM_CONFIG_DIR).join(env::CONFIG_FILE_NAME));

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Show configuration discovery information
    pub fn show_discovery_info(explicit: Option<&Path>) {
        println!("Configuration Discovery Hierarchy:");
        println!();

        if let Some(path) = explicit {
            println!("  0. {:?} - explicit (--config)", path);
        }
        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.is_file() {
                "EXISTS"
            } else if candidate.exists() {
                "NOT A FILE"
            } else {
                "NOT FOUND"
            };
            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match explicit.map(Path::to_path_buf).or_else(Self::find_config_file) {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }
    }
}
