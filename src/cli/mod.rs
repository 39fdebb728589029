//! CLI-specific functionality
//!
//! Argument parsing and configuration discovery for the `dockdash` binary.

pub mod args;
pub mod config;

pub use args::{Args, Commands, ExecutionMode, RunConfig};
pub use config::{
    ConfigDiscovery, ConfigLoadError, ContainerSection, DashConfig, OrchestratorSection,
    RuntimeSection,
};
