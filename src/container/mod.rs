//! Container lifecycle orchestration.
//!
//! This module provisions networks, builds immutable launch specifications, runs
//! containers through a Docker/Podman daemon via the bollard API, follows their
//! logs concurrently, and tears them down again.
//!
//! ## Architecture
//!
//! - [`runtime`]: the [`ContainerRuntime`] capability every other component talks to
//! - [`client`]: bollard-backed runtime with connection fallback
//! - [`memory`]: in-process runtime for tests and dry runs
//! - [`network`]: idempotent bridge network provisioning
//! - [`spec`]: launch specification builder
//! - [`orchestrator`]: create → start → settle → inspect, plus stop/delete
//! - [`logs`]: cancellable log following
//! - [`lifecycle`]: per-container state machine
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dockdash::container::{ContainerOrchestrator, LaunchSpec};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = ContainerOrchestrator::connect().await?;
//!
//!     let spec = LaunchSpec::builder()
//!         .with_image("alpine:latest")
//!         .with_container_name("test-1")
//!         .with_command(["sh", "-c", "echo hi"])
//!         .build()?;
//!
//!     if !orchestrator.exists("test-1").await? {
//!         let mut handle = orchestrator.run(&spec).await?;
//!         println!("started {}", handle.container().id);
//!         handle.delete(&orchestrator).await?;
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod image;
mod lifecycle;
mod logs;
mod memory;
mod network;
mod orchestrator;
mod runtime;
mod spec;

pub use client::{ContainerClient, ContainerClientConfig, RuntimeType};
pub use image::{ImageManager, normalize_image_reference};
pub use lifecycle::{ContainerState, RunningContainer};
pub use logs::{FollowHandle, FollowSummary, LogFollower, LogSink};
pub use memory::MemoryRuntime;
pub use network::{NetworkProvisioner, NetworkSpec};
pub use orchestrator::{
    ContainerOrchestrator, OrchestratorConfig, ReadinessProbe, RunHandle, SettleDelay,
    create_request,
};
pub use runtime::{
    ContainerDetails, ContainerRuntime, ContainerSummary, CreateContainerRequest,
    CreateNetworkRequest, HostPortBinding, LogChunk, NetworkInfo,
};
pub use spec::{ContainerSpecBuilder, LaunchSpec, VolumeMapping};

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Missing or inconsistent configuration, detected before any runtime call
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Network creation failed
    #[error("Network provisioning failed: {0}")]
    NetworkProvisionError(String),

    /// A runtime call failed
    #[error("Runtime call '{op}' failed: {message}")]
    RuntimeCallError { op: &'static str, message: String },

    /// A container with the same name already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Container, image or network not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Log stream could not be opened or broke mid-stream
    #[error("Log stream error: {0}")]
    LogStreamError(String),

    /// Lifecycle transition not allowed from the current state
    #[error("Container {name} cannot go from {from} to {to}")]
    InvalidState {
        name: String,
        from: ContainerState,
        to: ContainerState,
    },

    /// The runtime endpoint could not be reached
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    pub(crate) fn runtime(op: &'static str, message: impl std::fmt::Display) -> Self {
        ContainerError::RuntimeCallError {
            op,
            message: message.to_string(),
        }
    }

    /// Whether the error came from the runtime boundary (including conflicts and
    /// missing objects), as opposed to configuration or local IO.
    pub fn is_runtime_error(&self) -> bool {
        matches!(
            self,
            ContainerError::RuntimeCallError { .. }
                | ContainerError::Conflict(_)
                | ContainerError::NotFound(_)
        )
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;
