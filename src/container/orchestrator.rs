//! Container lifecycle orchestration.
//!
//! Ties network provisioning, image pulling, creation, log following and teardown
//! together behind [`ContainerOrchestrator`].

use crate::container::{
    ContainerClient, ContainerClientConfig, ContainerError, ContainerRuntime, ContainerState,
    CreateContainerRequest, FollowHandle, FollowSummary, HostPortBinding, ImageManager,
    LaunchSpec, LogFollower, LogSink, NetworkProvisioner, Result, RunningContainer,
    normalize_image_reference,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Host interface published container ports bind to.
const PUBLISH_HOST_IP: &str = "0.0.0.0";

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wait between start and inspect
    pub settle_delay: Duration,
    /// Grace period passed to the runtime on stop, in seconds
    pub stop_timeout_secs: i64,
    /// Pull missing images before creating
    pub auto_pull: bool,
    /// Stream container output while it runs
    pub follow_logs: bool,
    /// Abort `run` when the network cannot be provisioned
    pub network_fail_fast: bool,
    /// Serialize `run` and `delete` per container name within this process
    pub exclusive_names: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(10),
            stop_timeout_secs: 10,
            auto_pull: true,
            follow_logs: true,
            network_fail_fast: false,
            exclusive_names: false,
        }
    }
}

/// Decides when a started container is ready to be inspected.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Return once `container` is ready; an error aborts the run.
    async fn wait_ready(
        &self,
        runtime: &dyn ContainerRuntime,
        container: &RunningContainer,
    ) -> Result<()>;
}

/// Fixed-delay readiness: sleep, then assume the container is up.
#[derive(Debug, Clone, Copy)]
pub struct SettleDelay(pub Duration);

#[async_trait]
impl ReadinessProbe for SettleDelay {
    async fn wait_ready(
        &self,
        _runtime: &dyn ContainerRuntime,
        container: &RunningContainer,
    ) -> Result<()> {
        if !self.0.is_zero() {
            debug!("Waiting {:?} for {} to settle", self.0, container.name);
            tokio::time::sleep(self.0).await;
        }
        Ok(())
    }
}

/// High-level container orchestrator.
///
/// Safe to share between tasks; concurrent `run`s of different specs proceed
/// independently.
pub struct ContainerOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    networks: NetworkProvisioner,
    images: ImageManager,
    config: OrchestratorConfig,
    probe: Arc<dyn ReadinessProbe>,
    shutdown: CancellationToken,
    name_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ContainerOrchestrator {
    /// Connect to the local Docker/Podman daemon with default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if connection to container runtime fails.
    pub async fn connect() -> Result<Self> {
        Self::connect_with(ContainerClientConfig::default(), OrchestratorConfig::default()).await
    }

    /// Connect with explicit client and orchestrator configuration.
    ///
    /// # Errors
    ///
    /// Returns error if connection to container runtime fails.
    pub async fn connect_with(
        client: ContainerClientConfig,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        let client = ContainerClient::with_config(client).await?;
        Ok(Self::with_runtime(Arc::new(client), config))
    }

    /// Create an orchestrator over an existing runtime.
    pub fn with_runtime(runtime: Arc<dyn ContainerRuntime>, config: OrchestratorConfig) -> Self {
        debug!("Orchestrating on the {} runtime", runtime.runtime_name());
        Self {
            networks: NetworkProvisioner::new(runtime.clone()),
            images: ImageManager::new(runtime.clone()),
            probe: Arc::new(SettleDelay(config.settle_delay)),
            runtime,
            config,
            shutdown: CancellationToken::new(),
            name_locks: DashMap::new(),
        }
    }

    /// Replace the fixed settle delay with a custom readiness check.
    pub fn with_readiness_probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Whether any container, running or stopped, has exactly this name.
    ///
    /// # Errors
    ///
    /// Returns error if the runtime cannot list containers.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let containers = self.runtime.list_containers().await?;
        Ok(containers.iter().any(|c| c.has_name(name)))
    }

    /// Pull the image unless already present; `true` if a pull happened.
    ///
    /// # Errors
    ///
    /// Returns error if the check or the pull fails.
    pub async fn ensure_image(&self, image: &str) -> Result<bool> {
        self.images.ensure_image(image).await
    }

    /// Run a container, streaming its output to this process's stdout/stderr.
    ///
    /// # Errors
    ///
    /// See [`ContainerOrchestrator::run_with_sink`].
    pub async fn run(&self, spec: &LaunchSpec) -> Result<RunHandle> {
        self.run_with_sink(spec, LogSink::stdio()).await
    }

    /// Provision, create, start and inspect a container.
    ///
    /// The name is not checked beforehand; call [`ContainerOrchestrator::exists`]
    /// first to guard creation. A name taken in the meantime surfaces as
    /// [`ContainerError::Conflict`].
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ConfigError`] for an invalid network,
    /// [`ContainerError::NetworkProvisionError`] only with `network_fail_fast`, and
    /// runtime errors from pull, create, start, readiness or inspect.
    pub async fn run_with_sink(&self, spec: &LaunchSpec, sink: LogSink) -> Result<RunHandle> {
        let name = spec.container_name();
        let _guard = self.lock_name(name).await;

        if let Some(network) = spec.network_spec() {
            match self.networks.ensure_network(&network).await {
                Ok(_) => {}
                Err(e @ ContainerError::ConfigError(_)) => return Err(e),
                Err(e) if self.config.network_fail_fast => return Err(e),
                Err(e) => warn!("Continuing without network {}: {}", network.name, e),
            }
        }

        if self.config.auto_pull {
            self.images.ensure_image(spec.image()).await?;
        }

        let request = create_request(spec);
        debug!("Creating container {} from {}", name, request.image);
        let id = self
            .runtime
            .create_container(&request)
            .await
            .map_err(|e| match e {
                ContainerError::Conflict(msg) => {
                    ContainerError::Conflict(format!("container {}: {}", name, msg))
                }
                other => other,
            })?;
        let mut container = RunningContainer::new(id, name.to_string());
        info!("Created container {} ({})", name, container.short_id());

        let follower = self.config.follow_logs.then(|| {
            LogFollower::spawn(
                self.runtime.clone(),
                &container.id,
                sink,
                self.shutdown.child_token(),
            )
        });

        match self.start_and_inspect(spec, &mut container).await {
            Ok(()) => Ok(RunHandle {
                container,
                follower,
            }),
            Err(e) => {
                if let Some(follower) = follower {
                    follower.cancel();
                }
                Err(e)
            }
        }
    }

    async fn start_and_inspect(
        &self,
        spec: &LaunchSpec,
        container: &mut RunningContainer,
    ) -> Result<()> {
        self.runtime.start_container(&container.id).await?;
        container.mark_started()?;
        info!("Started container {}", container.name);

        self.probe.wait_ready(self.runtime.as_ref(), container).await?;

        let details = self.runtime.inspect_container(&container.id).await?;
        container.assigned_ip = spec
            .network()
            .and_then(|n| details.networks.get(n).cloned())
            .or_else(|| details.networks.values().find(|ip| !ip.is_empty()).cloned());

        match &container.assigned_ip {
            Some(ip) => info!("Container {} is up at {}", container.name, ip),
            None => info!("Container {} is up without an address", container.name),
        }
        Ok(())
    }

    /// Stop a container by name or ID.
    ///
    /// # Errors
    ///
    /// Returns the runtime error; there is no retry.
    pub async fn stop(&self, name: &str) -> Result<()> {
        debug!("Stopping container {}", name);
        self.runtime
            .stop_container(name, self.config.stop_timeout_secs)
            .await?;
        info!("Stopped container {}", name);
        Ok(())
    }

    /// Force-remove a container by name or ID.
    ///
    /// # Errors
    ///
    /// Returns the runtime error; there is no retry.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.remove_as(name, name).await
    }

    /// Remove `target` while holding the lock for container name `name`.
    async fn remove_as(&self, name: &str, target: &str) -> Result<()> {
        let _guard = self.lock_name(name).await;
        debug!("Removing container {}", target);
        self.runtime.remove_container(target).await?;
        info!("Removed container {}", name);
        Ok(())
    }

    /// Cancel every log follower spawned by this orchestrator.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn lock_name(&self, name: &str) -> Option<NameGuard<'_>> {
        if !self.config.exclusive_names {
            return None;
        }
        let lock = self
            .name_locks
            .entry(name.to_string())
            .or_default()
            .clone();
        Some(NameGuard {
            locks: &self.name_locks,
            name: name.to_string(),
            guard: Some(lock.lock_owned().await),
        })
    }
}

/// Held per container name while `exclusive_names` is on.
///
/// The map entry is dropped with the last guard or waiter for that name.
struct NameGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Translate a launch spec into a runtime create request.
pub fn create_request(spec: &LaunchSpec) -> CreateContainerRequest {
    CreateContainerRequest {
        name: spec.container_name().to_string(),
        image: normalize_image_reference(spec.image()),
        cmd: spec.command().to_vec(),
        env: spec.env().to_vec(),
        tty: spec.tty(),
        labels: spec.labels().clone(),
        port_bindings: spec
            .port_mappings()
            .iter()
            .map(|(port, host_port)| {
                (
                    port.clone(),
                    vec![HostPortBinding {
                        host_ip: PUBLISH_HOST_IP.to_string(),
                        host_port: host_port.clone(),
                    }],
                )
            })
            .collect(),
        binds: spec.volume_mappings().iter().map(|v| v.to_bind()).collect(),
        network_mode: spec.network().map(str::to_string),
        ipv4_address: spec.static_ip().map(str::to_string),
    }
}

/// A container started by [`ContainerOrchestrator::run`] and its log follower.
#[derive(Debug)]
pub struct RunHandle {
    container: RunningContainer,
    follower: Option<FollowHandle>,
}

impl RunHandle {
    pub fn container(&self) -> &RunningContainer {
        &self.container
    }

    pub fn follower(&self) -> Option<&FollowHandle> {
        self.follower.as_ref()
    }

    /// Detach the follower, e.g. to join it independently.
    pub fn take_follower(&mut self) -> Option<FollowHandle> {
        self.follower.take()
    }

    /// Stop the container.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::InvalidState`] unless the container is started,
    /// otherwise the runtime error.
    pub async fn stop(&mut self, orchestrator: &ContainerOrchestrator) -> Result<()> {
        self.check(ContainerState::Stopped)?;
        orchestrator.stop(&self.container.id).await?;
        self.container.mark_stopped()
    }

    /// Remove the container and wait for its log follower to finish.
    ///
    /// Returns what the follower saw, if one was running and ended cleanly.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::InvalidState`] if already deleted, otherwise the
    /// runtime error. Follower failures are logged, not returned.
    pub async fn delete(
        &mut self,
        orchestrator: &ContainerOrchestrator,
    ) -> Result<Option<FollowSummary>> {
        self.check(ContainerState::Deleted)?;
        orchestrator
            .remove_as(&self.container.name, &self.container.id)
            .await?;
        self.container.mark_deleted()?;

        let Some(follower) = self.follower.take() else {
            return Ok(None);
        };
        match follower.shutdown().await {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                warn!("Log follower for {} ended with error: {}", self.container.name, e);
                Ok(None)
            }
        }
    }

    fn check(&self, next: ContainerState) -> Result<()> {
        if self.container.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(ContainerError::InvalidState {
                name: self.container.name.clone(),
                from: self.container.state,
                to: next,
            })
        }
    }
}
