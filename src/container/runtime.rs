//! Container runtime capability.
//!
//! The orchestrator only talks to the runtime through [`ContainerRuntime`], so the
//! same lifecycle code drives a Docker/Podman daemon ([`ContainerClient`]) or the
//! in-process [`MemoryRuntime`].
//!
//! [`ContainerClient`]: crate::container::ContainerClient
//! [`MemoryRuntime`]: crate::container::MemoryRuntime

use crate::container::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::BTreeMap;

/// Request to create a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNetworkRequest {
    pub name: String,
    pub driver: String,
    pub subnet: Option<String>,
    pub gateway: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// A network known to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub driver: String,
}

/// A single host-side binding for a container port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPortBinding {
    pub host_ip: String,
    pub host_port: String,
}

/// Runtime-neutral container creation request.
///
/// Produced from a [`LaunchSpec`](crate::container::LaunchSpec) by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateContainerRequest {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub tty: bool,
    pub labels: BTreeMap<String, String>,
    /// Keyed by `port/proto`.
    pub port_bindings: BTreeMap<String, Vec<HostPortBinding>>,
    /// `source:target[:ro]` bind strings.
    pub binds: Vec<String>,
    /// `None` leaves the runtime default network mode.
    pub network_mode: Option<String>,
    /// Endpoint pinned on `network_mode` when set.
    pub ipv4_address: Option<String>,
}

/// Entry from a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Names as reported by the runtime, usually with a leading `/`.
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
}

impl ContainerSummary {
    /// Whether any of the names matches `name` once leading separators are stripped.
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.trim_start_matches('/') == name)
    }
}

/// Subset of container inspection the orchestrator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// Network name to assigned IPv4 address (empty addresses are dropped).
    pub networks: BTreeMap<String, String>,
}

/// One demultiplexed piece of a container's log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogChunk {
    StdOut(Bytes),
    StdErr(Bytes),
    /// Output of a TTY container, which the runtime does not frame.
    Console(Bytes),
}

impl LogChunk {
    pub fn bytes(&self) -> &Bytes {
        match self {
            LogChunk::StdOut(b) | LogChunk::StdErr(b) | LogChunk::Console(b) => b,
        }
    }
}

/// Operations the orchestrator needs from a container engine.
///
/// Implementations must be safe to share between tasks; the orchestrator holds a
/// single `Arc<dyn ContainerRuntime>` and adds no locking of its own.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short identifier used in logs ("docker", "podman", "memory").
    fn runtime_name(&self) -> &'static str;

    async fn list_networks(&self, name: &str) -> Result<Vec<NetworkInfo>>;

    /// Returns the new network ID.
    async fn create_network(&self, request: &CreateNetworkRequest) -> Result<String>;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Lists all containers, including stopped ones.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    /// Returns the new container ID. A name already in use yields
    /// [`ContainerError::Conflict`](crate::container::ContainerError::Conflict).
    async fn create_container(&self, request: &CreateContainerRequest) -> Result<String>;

    async fn start_container(&self, name_or_id: &str) -> Result<()>;

    async fn stop_container(&self, name_or_id: &str, timeout_secs: i64) -> Result<()>;

    /// Force-removes, stopping a running container first.
    async fn remove_container(&self, name_or_id: &str) -> Result<()>;

    async fn inspect_container(&self, name_or_id: &str) -> Result<ContainerDetails>;

    /// Follows combined stdout/stderr until the container goes away.
    fn follow_logs(&self, name_or_id: &str) -> BoxStream<'static, Result<LogChunk>>;
}
