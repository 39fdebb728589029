//! # dockdash
//!
//! Container lifecycle orchestration over a Docker-compatible daemon. Provisions an
//! isolated bridge network, builds an immutable launch specification, creates and
//! starts the container, streams its logs concurrently, and tears it down again.
//!
//! ## Architecture Overview
//!
//! - **[`container`]**: runtime capability, bollard client, network provisioning,
//!   launch specs, orchestration, log following and lifecycle state
//! - **[`cli`]**: argument parsing and TOML configuration discovery
//! - **[`env`]**: paths, file names and environment variables
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dockdash::{ContainerOrchestrator, LaunchSpec};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = ContainerOrchestrator::connect().await?;
//!
//!     let spec = LaunchSpec::builder()
//!         .with_image("mysql:latest")
//!         .with_container_name("api-mysql")
//!         .with_env_var("MYSQL_ROOT_PASSWORD", "root")
//!         .with_port_mapping("3306/tcp", "3700")
//!         .with_network("MicroService")
//!         .with_subnet("172.18.0.0/16")
//!         .with_static_ip("172.18.0.5")
//!         .build()?;
//!
//!     if !orchestrator.exists(spec.container_name()).await? {
//!         let handle = orchestrator.run(&spec).await?;
//!         println!("{:?}", handle.container().assigned_ip);
//!     }
//!     Ok(())
//! }
//! ```

/// Container lifecycle orchestration.
///
/// Networks, launch specs, runs, log following and teardown against Docker or
/// Podman, plus an in-memory runtime for tests and dry runs.
pub mod container;

/// Environment constants and path utilities.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use container::{
    ContainerError, ContainerOrchestrator, ContainerRuntime, LaunchSpec, OrchestratorConfig,
    RunHandle, RunningContainer,
};
