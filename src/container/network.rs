//! Container network provisioning.
//!
//! Ensures a named bridge network exists before containers are attached to it.

use crate::container::{ContainerError, ContainerRuntime, CreateNetworkRequest, Result};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info};

/// Default network driver.
pub const DEFAULT_NETWORK_DRIVER: &str = "bridge";

/// Network to provision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Network name
    pub name: String,
    /// IPv4 subnet in CIDR form, e.g. `172.18.0.0/16`
    #[serde(default)]
    pub subnet: Option<String>,
    /// Gateway address inside `subnet`
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_driver() -> String {
    DEFAULT_NETWORK_DRIVER.to_string()
}

impl NetworkSpec {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            subnet: None,
            gateway: None,
            driver: default_driver(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_subnet<S: Into<String>>(mut self, subnet: S) -> Self {
        self.subnet = Some(subnet.into());
        self
    }

    pub fn with_gateway<S: Into<String>>(mut self, gateway: S) -> Self {
        self.gateway = Some(gateway.into());
        self
    }

    /// Check name, subnet and gateway for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ConfigError`] if the name is empty, the subnet or
    /// gateway cannot be parsed, a gateway is given without a subnet, or the gateway
    /// lies outside the subnet.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ContainerError::ConfigError(
                "Network name must not be empty".to_string(),
            ));
        }

        let subnet = self.subnet.as_deref().map(parse_subnet).transpose()?;

        if let Some(gateway) = self.gateway.as_deref() {
            let gateway = parse_ipv4(gateway, "gateway")?;
            let subnet = subnet.ok_or_else(|| {
                ContainerError::ConfigError(format!(
                    "Network {}: gateway {} given without a subnet",
                    self.name, gateway
                ))
            })?;
            if !subnet.contains(gateway) {
                return Err(ContainerError::ConfigError(format!(
                    "Network {}: gateway {} is outside subnet {}/{}",
                    self.name,
                    gateway,
                    subnet.network(),
                    subnet.prefix()
                )));
            }
        }

        Ok(())
    }

    fn to_request(&self) -> CreateNetworkRequest {
        CreateNetworkRequest {
            name: self.name.clone(),
            driver: self.driver.clone(),
            subnet: self.subnet.clone(),
            gateway: self.gateway.clone(),
            labels: self.labels.clone(),
        }
    }
}

/// Parse an IPv4 subnet in `address/prefix` form.
///
/// Host bits in the address are allowed; `172.18.0.5/16` names `172.18.0.0/16`.
pub(crate) fn parse_subnet(cidr: &str) -> Result<Ipv4Network> {
    let (addr, len) = cidr.trim().split_once('/').ok_or_else(|| {
        ContainerError::ConfigError(format!("Subnet {} is not in CIDR form", cidr))
    })?;
    let addr = parse_ipv4(addr, "subnet")?;
    let prefix: u8 = len.parse().map_err(|_| {
        ContainerError::ConfigError(format!("Subnet {} has an invalid prefix length", cidr))
    })?;
    Ipv4Network::new(addr, prefix).map_err(|e| {
        ContainerError::ConfigError(format!("Subnet {}: {}", cidr, e))
    })
}

pub(crate) fn parse_ipv4(value: &str, what: &str) -> Result<Ipv4Addr> {
    value.trim().parse().map_err(|_| {
        ContainerError::ConfigError(format!("Invalid {} address: {}", what, value))
    })
}

/// Check-then-create network provisioning.
#[derive(Clone)]
pub struct NetworkProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
}

impl NetworkProvisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Whether a network with exactly this name exists.
    ///
    /// # Errors
    ///
    /// Returns error if listing networks fails.
    pub async fn network_exists(&self, name: &str) -> Result<bool> {
        let networks = self.runtime.list_networks(name).await?;
        // The runtime filters by substring, so compare exactly.
        Ok(networks.iter().any(|n| n.name == name))
    }

    /// Ensure the network exists, creating it when absent.
    ///
    /// Returns `true` if this call created the network and `false` if it already
    /// existed, including when a concurrent caller created it first. A single
    /// create attempt is made; there is no retry.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ConfigError`] for an inconsistent spec and
    /// [`ContainerError::NetworkProvisionError`] if listing or creation fails.
    pub async fn ensure_network(&self, spec: &NetworkSpec) -> Result<bool> {
        spec.validate()?;

        let exists = self
            .network_exists(&spec.name)
            .await
            .map_err(|e| ContainerError::NetworkProvisionError(e.to_string()))?;
        if exists {
            debug!("Network {} already exists", spec.name);
            return Ok(false);
        }

        debug!(
            "Creating {} network {} (subnet={:?}, gateway={:?})",
            spec.driver, spec.name, spec.subnet, spec.gateway
        );
        match self.runtime.create_network(&spec.to_request()).await {
            Ok(id) => {
                info!("Created network {} ({})", spec.name, id);
                Ok(true)
            }
            Err(ContainerError::Conflict(_)) => {
                // Another caller created it between the listing and our create.
                debug!("Network {} created concurrently", spec.name);
                Ok(false)
            }
            Err(e) => Err(ContainerError::NetworkProvisionError(format!(
                "{}: {}",
                spec.name, e
            ))),
        }
    }
}
