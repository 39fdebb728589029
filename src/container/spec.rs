//! Launch specification builder.
//!
//! [`ContainerSpecBuilder`] accumulates configuration through chained `with_*`
//! calls and produces immutable [`LaunchSpec`] snapshots. Setters taking a whole
//! collection replace what was there before; the last call wins.

use crate::container::network::{parse_ipv4, parse_subnet};
use crate::container::{ContainerError, NetworkSpec, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const PROTOCOLS: [&str; 3] = ["tcp", "udp", "sctp"];

/// Host path bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMapping {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeMapping {
    pub fn new<S: Into<String>, T: Into<String>>(source: S, target: T, read_only: bool) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only,
        }
    }

    /// Bind string understood by the runtime (`source:target[:ro]`).
    pub fn to_bind(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

/// Container launch specification builder.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpecBuilder {
    image: Option<String>,
    command: Vec<String>,
    env: Vec<String>,
    container_name: Option<String>,
    network: Option<String>,
    subnet: Option<String>,
    gateway: Option<String>,
    network_driver: Option<String>,
    network_labels: BTreeMap<String, String>,
    static_ip: Option<String>,
    port_mappings: BTreeMap<String, String>,
    volume_mappings: Vec<VolumeMapping>,
    tty: bool,
    labels: BTreeMap<String, String>,
}

impl ContainerSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the image. A reference without a tag is pulled as `:latest`.
    pub fn with_image<S: Into<String>>(mut self, image: S) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the command, replacing any previous one.
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the environment with the given `(key, value)` pairs.
    pub fn with_env<I, K, V>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = env
            .into_iter()
            .map(|(k, v)| format!("{}={}", k.into(), v.into()))
            .collect();
        self
    }

    /// Append one environment variable.
    pub fn with_env_var<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push(format!("{}={}", key.into(), value.into()));
        self
    }

    /// Replace the environment with raw `KEY=VALUE` strings.
    pub fn with_env_entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = entries.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the port mappings (`"3306/tcp" -> "3700"`).
    pub fn with_port_mappings<I, K, V>(mut self, mappings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.port_mappings = mappings
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Add one port mapping.
    pub fn with_port_mapping<K: Into<String>, V: Into<String>>(
        mut self,
        container_port: K,
        host_port: V,
    ) -> Self {
        self.port_mappings
            .insert(container_port.into(), host_port.into());
        self
    }

    /// Replace the volume mappings.
    pub fn with_volume_mappings<I>(mut self, mappings: I) -> Self
    where
        I: IntoIterator<Item = VolumeMapping>,
    {
        self.volume_mappings = mappings.into_iter().collect();
        self
    }

    /// Append one volume mapping.
    pub fn with_volume<S: Into<String>, T: Into<String>>(
        mut self,
        source: S,
        target: T,
        read_only: bool,
    ) -> Self {
        self.volume_mappings
            .push(VolumeMapping::new(source, target, read_only));
        self
    }

    pub fn with_container_name<S: Into<String>>(mut self, name: S) -> Self {
        self.container_name = Some(name.into());
        self
    }

    /// Pin the container to this IPv4 address on the configured network.
    pub fn with_static_ip<S: Into<String>>(mut self, ip: S) -> Self {
        self.static_ip = Some(ip.into());
        self
    }

    pub fn with_network<S: Into<String>>(mut self, name: S) -> Self {
        self.network = Some(name.into());
        self
    }

    pub fn with_subnet<S: Into<String>>(mut self, subnet: S) -> Self {
        self.subnet = Some(subnet.into());
        self
    }

    pub fn with_gateway<S: Into<String>>(mut self, gateway: S) -> Self {
        self.gateway = Some(gateway.into());
        self
    }

    /// Take name, subnet, gateway, driver and labels from a network definition.
    pub fn with_network_spec(mut self, network: &NetworkSpec) -> Self {
        self.network = Some(network.name.clone());
        self.subnet = network.subnet.clone();
        self.gateway = network.gateway.clone();
        self.network_driver = Some(network.driver.clone());
        self.network_labels = network.labels.clone();
        self
    }

    /// Allocate a TTY; logs then arrive unframed.
    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    pub fn with_label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Snapshot the configuration applied so far.
    ///
    /// The builder stays usable; later calls do not affect returned specs.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ConfigError`] if image or container name is
    /// missing, a static IP is set without a network, or a port, volume or address
    /// is malformed.
    pub fn build(&self) -> Result<LaunchSpec> {
        let image = required(&self.image, "Image")?;
        let container_name = required(&self.container_name, "Container name")?;

        let network = match self.network.as_deref().map(str::trim) {
            Some("") => {
                return Err(ContainerError::ConfigError(
                    "Network name must not be empty".to_string(),
                ));
            }
            other => other.map(str::to_string),
        };

        if (self.subnet.is_some() || self.gateway.is_some()) && network.is_none() {
            return Err(ContainerError::ConfigError(
                "Subnet or gateway set without a network name".to_string(),
            ));
        }

        if let Some(name) = network.as_deref() {
            self.network_definition(name).validate()?;
        }
        let subnet = self.subnet.as_deref().map(parse_subnet).transpose()?;

        if let Some(ip) = self.static_ip.as_deref() {
            let network = network.as_deref().ok_or_else(|| {
                ContainerError::ConfigError(format!(
                    "Static IP {} requires a network name",
                    ip
                ))
            })?;
            let addr = parse_ipv4(ip, "static IP")?;
            if let Some(subnet) = subnet
                && !subnet.contains(addr)
            {
                return Err(ContainerError::ConfigError(format!(
                    "Static IP {} is outside subnet {}/{} of network {}",
                    addr,
                    subnet.network(),
                    subnet.prefix(),
                    network
                )));
            }
        }

        let mut port_mappings = BTreeMap::new();
        for (container_port, host_port) in &self.port_mappings {
            let key = normalize_port_key(container_port)?;
            let host = host_port.trim();
            if host.parse::<u16>().is_err() {
                return Err(ContainerError::ConfigError(format!(
                    "Invalid host port {} for {}",
                    host_port, container_port
                )));
            }
            port_mappings.insert(key, host.to_string());
        }

        for volume in &self.volume_mappings {
            if volume.source.trim().is_empty() || volume.target.trim().is_empty() {
                return Err(ContainerError::ConfigError(format!(
                    "Volume mapping needs both source and target (got {:?} -> {:?})",
                    volume.source, volume.target
                )));
            }
        }

        Ok(LaunchSpec {
            image,
            command: self.command.clone(),
            env: self.env.clone(),
            container_name,
            network,
            subnet: self.subnet.clone(),
            gateway: self.gateway.clone(),
            network_driver: self.network_driver.clone(),
            network_labels: self.network_labels.clone(),
            static_ip: self.static_ip.clone(),
            port_mappings,
            volume_mappings: self.volume_mappings.clone(),
            tty: self.tty,
            labels: self.labels.clone(),
        })
    }
}

impl ContainerSpecBuilder {
    fn network_definition(&self, name: &str) -> NetworkSpec {
        let mut network = NetworkSpec::new(name);
        network.subnet = self.subnet.clone();
        network.gateway = self.gateway.clone();
        if let Some(driver) = &self.network_driver {
            network.driver = driver.clone();
        }
        network.labels = self.network_labels.clone();
        network
    }
}

fn required(value: &Option<String>, what: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ContainerError::ConfigError(format!("{} is required", what))),
    }
}

/// Normalize `3306` to `3306/tcp` and check port and protocol.
fn normalize_port_key(key: &str) -> Result<String> {
    let (port, proto) = match key.trim().split_once('/') {
        Some((port, proto)) => (port, proto.to_ascii_lowercase()),
        None => (key.trim(), "tcp".to_string()),
    };
    if port.parse::<u16>().is_err() {
        return Err(ContainerError::ConfigError(format!(
            "Invalid container port: {}",
            key
        )));
    }
    if !PROTOCOLS.contains(&proto.as_str()) {
        return Err(ContainerError::ConfigError(format!(
            "Unsupported protocol in port {}",
            key
        )));
    }
    Ok(format!("{}/{}", port, proto))
}

/// Immutable, validated configuration for one container launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    image: String,
    command: Vec<String>,
    env: Vec<String>,
    container_name: String,
    network: Option<String>,
    subnet: Option<String>,
    gateway: Option<String>,
    network_driver: Option<String>,
    network_labels: BTreeMap<String, String>,
    static_ip: Option<String>,
    port_mappings: BTreeMap<String, String>,
    volume_mappings: Vec<VolumeMapping>,
    tty: bool,
    labels: BTreeMap<String, String>,
}

impl LaunchSpec {
    pub fn builder() -> ContainerSpecBuilder {
        ContainerSpecBuilder::new()
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// `KEY=VALUE` entries in insertion order.
    pub fn env(&self) -> &[String] {
        &self.env
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    pub fn subnet(&self) -> Option<&str> {
        self.subnet.as_deref()
    }

    pub fn gateway(&self) -> Option<&str> {
        self.gateway.as_deref()
    }

    pub fn static_ip(&self) -> Option<&str> {
        self.static_ip.as_deref()
    }

    /// Container `port/proto` to host port.
    pub fn port_mappings(&self) -> &BTreeMap<String, String> {
        &self.port_mappings
    }

    pub fn volume_mappings(&self) -> &[VolumeMapping] {
        &self.volume_mappings
    }

    pub fn tty(&self) -> bool {
        self.tty
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Network to ensure before creation, if one is named.
    pub fn network_spec(&self) -> Option<NetworkSpec> {
        self.network.as_ref().map(|name| {
            let mut network = NetworkSpec::new(name.clone());
            network.subnet = self.subnet.clone();
            network.gateway = self.gateway.clone();
            if let Some(driver) = &self.network_driver {
                network.driver = driver.clone();
            }
            network.labels = self.network_labels.clone();
            network
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ContainerSpecBuilder {
        LaunchSpec::builder()
            .with_image("alpine:latest")
            .with_container_name("test-1")
    }

    #[test]
    fn test_basic_spec() {
        let spec = base().with_command(["sh", "-c", "echo hi"]).build().unwrap();

        assert_eq!(spec.image(), "alpine:latest");
        assert_eq!(spec.container_name(), "test-1");
        assert_eq!(spec.command(), ["sh", "-c", "echo hi"]);
        assert!(spec.network().is_none());
        assert!(!spec.tty());
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = base()
            .with_env_var("MYSQL_ROOT_PASSWORD", "root")
            .with_port_mapping("3306/tcp", "3700");

        assert_eq!(builder.build().unwrap(), builder.build().unwrap());
    }

    #[test]
    fn test_snapshot_is_independent_of_later_mutation() {
        let builder = base().with_command(["first"]);
        let first = builder.build().unwrap();

        let builder = builder.with_command(["second"]).with_env_var("A", "1");
        let second = builder.build().unwrap();

        assert_eq!(first.command(), ["first"]);
        assert!(first.env().is_empty());
        assert_eq!(second.command(), ["second"]);
    }

    #[test]
    fn test_port_mappings_last_call_wins() {
        let spec = base()
            .with_port_mappings([("80/tcp", "8080")])
            .with_port_mappings([("3306/tcp", "3700")])
            .build()
            .unwrap();

        assert_eq!(spec.port_mappings().len(), 1);
        assert_eq!(spec.port_mappings().get("3306/tcp").map(String::as_str), Some("3700"));
    }

    #[test]
    fn test_env_replace_and_append() {
        let spec = base()
            .with_env([("A", "1")])
            .with_env([("B", "2"), ("C", "3")])
            .with_env_var("D", "4")
            .build()
            .unwrap();

        assert_eq!(spec.env(), ["B=2", "C=3", "D=4"]);
    }

    #[test]
    fn test_port_without_protocol_defaults_to_tcp() {
        let spec = base().with_port_mapping("8080", "80").build().unwrap();
        assert_eq!(spec.port_mappings().get("8080/tcp").map(String::as_str), Some("80"));
    }

    #[test]
    fn test_invalid_ports_rejected() {
        for (container, host) in [("abc/tcp", "80"), ("80/icmp", "80"), ("80/tcp", "99999")] {
            let result = base().with_port_mapping(container, host).build();
            assert!(
                matches!(result, Err(ContainerError::ConfigError(_))),
                "{} -> {} should be rejected",
                container,
                host
            );
        }
    }

    #[test]
    fn test_volume_mapping_bind_string() {
        let spec = base()
            .with_volume("/host/path", "/data", true)
            .with_volume("/cache", "/var/cache", false)
            .build()
            .unwrap();

        let binds: Vec<String> = spec.volume_mappings().iter().map(VolumeMapping::to_bind).collect();
        assert_eq!(binds, ["/host/path:/data:ro", "/cache:/var/cache"]);
    }

    #[test]
    fn test_empty_volume_rejected() {
        let result = base().with_volume("", "/data", false).build();
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }

    #[test]
    fn test_missing_image_error() {
        let result = LaunchSpec::builder().with_container_name("x").build();
        assert!(matches!(result, Err(ContainerError::ConfigError(msg)) if msg.contains("Image")));
    }

    #[test]
    fn test_missing_container_name_error() {
        let result = LaunchSpec::builder().with_image("alpine").build();
        assert!(
            matches!(result, Err(ContainerError::ConfigError(msg)) if msg.contains("Container name"))
        );
    }

    #[test]
    fn test_static_ip_requires_network() {
        let result = base().with_static_ip("172.18.0.5").build();
        assert!(matches!(result, Err(ContainerError::ConfigError(msg)) if msg.contains("Static IP")));
    }

    #[test]
    fn test_static_ip_must_be_in_subnet() {
        let result = base()
            .with_network("MicroService")
            .with_subnet("172.18.0.0/16")
            .with_static_ip("10.0.0.5")
            .build();
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));

        let spec = base()
            .with_network("MicroService")
            .with_subnet("172.18.0.0/16")
            .with_gateway("172.18.0.1")
            .with_static_ip("172.18.0.5")
            .build()
            .unwrap();
        assert_eq!(spec.static_ip(), Some("172.18.0.5"));

        let network = spec.network_spec().unwrap();
        assert_eq!(network.name, "MicroService");
        assert_eq!(network.gateway.as_deref(), Some("172.18.0.1"));
    }

    #[test]
    fn test_subnet_requires_network() {
        let result = base().with_subnet("172.18.0.0/16").build();
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }

    #[test]
    fn test_gateway_outside_subnet_rejected_at_build() {
        let result = base()
            .with_network("MicroService")
            .with_subnet("172.18.0.0/16")
            .with_gateway("10.0.0.1")
            .build();
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }

    #[test]
    fn test_network_definition_carries_driver_and_labels() {
        let mut network = NetworkSpec::new("MicroService").with_subnet("172.18.0.0/16");
        network.driver = "macvlan".to_string();
        network.labels.insert("team".to_string(), "api".to_string());

        let spec = base().with_network_spec(&network).build().unwrap();
        assert_eq!(spec.network(), Some("MicroService"));
        assert_eq!(spec.network_spec(), Some(network));
    }
}
