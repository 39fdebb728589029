//! Docker/Podman client wrapper.
//!
//! Provides the bollard-backed [`ContainerRuntime`] with connection fallback,
//! a ping at construction, and error mapping from daemon status codes.

// The 0.19 options structs under `bollard::container` are deprecated in favour of
// `query_parameters`, but remain the simplest way to express these calls.
#![allow(deprecated)]

use crate::container::{
    ContainerDetails, ContainerError, ContainerRuntime, ContainerSummary, CreateContainerRequest,
    CreateNetworkRequest, LogChunk, NetworkInfo, Result,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::models::{
    EndpointIpamConfig, EndpointSettings, HostConfig, Ipam, IpamConfig, NetworkCreateRequest,
    PortBinding,
};
use futures::stream::{BoxStream, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Container client configuration.
#[derive(Debug, Clone)]
pub struct ContainerClientConfig {
    /// Explicit daemon address (`unix://…`, `tcp://…`, `http://…`); `None` uses
    /// `DOCKER_HOST` or the platform default, then Podman sockets.
    pub host: Option<String>,
    /// Request timeout in seconds
    pub timeout: u64,
}

impl Default for ContainerClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout: 120,
        }
    }
}

/// Docker/Podman API client wrapper.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct ContainerClient {
    docker: Arc<Docker>,
    runtime_type: RuntimeType,
}

impl ContainerClient {
    /// Connect with default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if neither Docker nor Podman are reachable.
    pub async fn new() -> Result<Self> {
        Self::with_config(ContainerClientConfig::default()).await
    }

    /// Connect with custom configuration and verify the daemon answers.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ConnectionError`] if connecting or pinging fails.
    pub async fn with_config(config: ContainerClientConfig) -> Result<Self> {
        let docker = match config.host.as_deref() {
            Some(host) => Self::connect_to(host, config.timeout)?,
            None => Self::connect(config.timeout)?,
        };

        let docker = Arc::new(docker);
        docker
            .ping()
            .await
            .map_err(|e| ContainerError::ConnectionError(format!("Failed to ping container runtime: {}", e)))?;
        debug!("Container runtime ping successful");

        let runtime_type = Self::detect_runtime(&docker).await;
        info!("Connected to {} runtime", runtime_type);

        Ok(Self {
            docker,
            runtime_type,
        })
    }

    fn connect_to(host: &str, timeout: u64) -> Result<Docker> {
        debug!("Connecting to container runtime at {}", host);
        let result = if host.starts_with("unix://") || host.starts_with("npipe://") {
            Docker::connect_with_socket(host, timeout, bollard::API_DEFAULT_VERSION)
        } else {
            Docker::connect_with_http(host, timeout, bollard::API_DEFAULT_VERSION)
        };
        result.map_err(|e| ContainerError::ConnectionError(format!("{}: {}", host, e)))
    }

    /// Tries, in order: local defaults (honours `DOCKER_HOST`), rootless Podman,
    /// system Podman.
    fn connect(timeout: u64) -> Result<Docker> {
        debug!("Attempting to connect to container runtime...");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                debug!("Using local defaults");
                return Ok(docker);
            }
            Err(e) => {
                debug!("Local defaults failed: {}", e);
            }
        }

        #[cfg(unix)]
        {
            let mut sockets = Vec::new();
            if let Ok(home) = std::env::var("HOME") {
                sockets.push(format!("unix://{}/run/podman/podman.sock", home));
            }
            sockets.push("unix:///run/podman/podman.sock".to_string());

            for socket in sockets {
                debug!("Trying Podman socket: {}", socket);
                match Docker::connect_with_socket(&socket, timeout, bollard::API_DEFAULT_VERSION) {
                    Ok(docker) => return Ok(docker),
                    Err(e) => debug!("Podman socket {} failed: {}", socket, e),
                }
            }
        }

        Err(ContainerError::ConnectionError(
            "Failed to connect to Docker or Podman. Please ensure Docker or Podman is installed and running.".to_string(),
        ))
    }

    async fn detect_runtime(docker: &Docker) -> RuntimeType {
        let is_podman = docker
            .version()
            .await
            .ok()
            .and_then(|v| v.components)
            .map(|components| {
                components
                    .iter()
                    .any(|c| c.name.to_lowercase().contains("podman"))
            })
            .unwrap_or(false);

        if is_podman {
            RuntimeType::Podman
        } else {
            RuntimeType::Docker
        }
    }

    /// Ping the container runtime to verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns error if ping fails.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| ContainerError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    /// Get the underlying Docker client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

/// Map a bollard error to the crate taxonomy.
fn map_error(op: &'static str, err: bollard::errors::Error) -> ContainerError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => ContainerError::NotFound(message),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message,
        } => ContainerError::Conflict(message),
        e => ContainerError::runtime(op, e),
    }
}

/// Translate a runtime-neutral request into bollard's create parameters.
pub(crate) fn to_bollard_config(
    request: &CreateContainerRequest,
) -> bollard::container::Config<String> {
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = request
        .port_bindings
        .iter()
        .map(|(port, bindings)| {
            let bindings = bindings
                .iter()
                .map(|b| PortBinding {
                    host_ip: Some(b.host_ip.clone()),
                    host_port: Some(b.host_port.clone()),
                })
                .collect();
            (port.clone(), Some(bindings))
        })
        .collect();

    let exposed_ports: HashMap<String, HashMap<(), ()>> = request
        .port_bindings
        .keys()
        .map(|port| (port.clone(), HashMap::new()))
        .collect();

    let host_config = HostConfig {
        network_mode: request.network_mode.clone(),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        binds: (!request.binds.is_empty()).then(|| request.binds.clone()),
        ..Default::default()
    };

    let networking_config = match (&request.network_mode, &request.ipv4_address) {
        (Some(network), Some(ip)) => Some(bollard::container::NetworkingConfig {
            endpoints_config: HashMap::from([(
                network.clone(),
                EndpointSettings {
                    ipam_config: Some(EndpointIpamConfig {
                        ipv4_address: Some(ip.clone()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )]),
        }),
        _ => None,
    };

    bollard::container::Config {
        image: Some(request.image.clone()),
        cmd: (!request.cmd.is_empty()).then(|| request.cmd.clone()),
        env: (!request.env.is_empty()).then(|| request.env.clone()),
        tty: Some(request.tty),
        labels: (!request.labels.is_empty())
            .then(|| request.labels.clone().into_iter().collect()),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        networking_config,
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for ContainerClient {
    fn runtime_name(&self) -> &'static str {
        match self.runtime_type {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }

    async fn list_networks(&self, name: &str) -> Result<Vec<NetworkInfo>> {
        let filters = HashMap::from([("name".to_string(), vec![name.to_string()])]);
        let networks = self
            .docker
            .list_networks(Some(bollard::network::ListNetworksOptions { filters }))
            .await
            .map_err(|e| map_error("list_networks", e))?;

        Ok(networks
            .into_iter()
            .map(|n| NetworkInfo {
                id: n.id.unwrap_or_default(),
                name: n.name.unwrap_or_default(),
                driver: n.driver.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_network(&self, request: &CreateNetworkRequest) -> Result<String> {
        let ipam = (request.subnet.is_some() || request.gateway.is_some()).then(|| Ipam {
            config: Some(vec![IpamConfig {
                subnet: request.subnet.clone(),
                gateway: request.gateway.clone(),
                ..Default::default()
            }]),
            ..Default::default()
        });

        let response = self
            .docker
            .create_network(NetworkCreateRequest {
                name: request.name.clone(),
                driver: Some(request.driver.clone()),
                ipam,
                labels: (!request.labels.is_empty())
                    .then(|| request.labels.clone().into_iter().collect()),
                ..Default::default()
            })
            .await
            .map_err(|e| map_error("create_network", e))?;

        Ok(response.id)
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(map_error("inspect_image", e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut stream = self.docker.create_image(
            Some(bollard::image::CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| map_error("pull_image", e))?;
            if let Some(status) = info.status {
                debug!("Pull: {}", status);
            }
            if let Some(error) = info.error {
                return Err(ContainerError::runtime("pull_image", error));
            }
        }
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let containers = self
            .docker
            .list_containers(Some(bollard::container::ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await
            .map_err(|e| map_error("list_containers", e))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                state: c.state.map(|s| s.to_string()).unwrap_or_default(),
            })
            .collect())
    }

    async fn create_container(&self, request: &CreateContainerRequest) -> Result<String> {
        let options = bollard::container::CreateContainerOptions {
            name: request.name.as_str(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), to_bollard_config(request))
            .await
            .map_err(|e| map_error("create_container", e))?;

        for warning in &response.warnings {
            debug!("Create {}: {}", request.name, warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, name_or_id: &str) -> Result<()> {
        self.docker
            .start_container(
                name_or_id,
                None::<bollard::container::StartContainerOptions<String>>,
            )
            .await
            .map_err(|e| map_error("start_container", e))
    }

    async fn stop_container(&self, name_or_id: &str, timeout_secs: i64) -> Result<()> {
        self.docker
            .stop_container(
                name_or_id,
                Some(bollard::container::StopContainerOptions { t: timeout_secs }),
            )
            .await
            .map_err(|e| map_error("stop_container", e))
    }

    async fn remove_container(&self, name_or_id: &str) -> Result<()> {
        self.docker
            .remove_container(
                name_or_id,
                Some(bollard::container::RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_error("remove_container", e))
    }

    async fn inspect_container(&self, name_or_id: &str) -> Result<ContainerDetails> {
        let inspect = self
            .docker
            .inspect_container(
                name_or_id,
                None::<bollard::query_parameters::InspectContainerOptions>,
            )
            .await
            .map_err(|e| map_error("inspect_container", e))?;

        let networks: BTreeMap<String, String> = inspect
            .network_settings
            .and_then(|s| s.networks)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, endpoint)| {
                endpoint
                    .ip_address
                    .filter(|ip| !ip.is_empty())
                    .map(|ip| (name, ip))
            })
            .collect();

        Ok(ContainerDetails {
            id: inspect.id.unwrap_or_default(),
            name: inspect
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            running: inspect
                .state
                .and_then(|s| s.running)
                .unwrap_or(false),
            networks,
        })
    }

    fn follow_logs(&self, name_or_id: &str) -> BoxStream<'static, Result<LogChunk>> {
        let options = bollard::container::LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        self.docker
            .logs(name_or_id, Some(options))
            .filter_map(|item| async move {
                match item {
                    Ok(LogOutput::StdOut { message }) => Some(Ok(LogChunk::StdOut(message))),
                    Ok(LogOutput::StdErr { message }) => Some(Ok(LogChunk::StdErr(message))),
                    Ok(LogOutput::Console { message }) => Some(Ok(LogChunk::Console(message))),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(ContainerError::LogStreamError(e.to_string()))),
                }
            })
            .boxed()
    }
}

/// Type of container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeType {
    /// Docker runtime
    Docker,
    /// Podman runtime
    Podman,
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "Docker"),
            RuntimeType::Podman => write!(f, "Podman"),
        }
    }
}
