//! Per-container lifecycle state.
//!
//! A [`RunningContainer`] is owned by whoever ran it and moves through
//! `Created → Started → Stopped → Deleted`. Deleting straight from `Started` is
//! allowed; the runtime force-removes, which stops the container implicitly.

use crate::container::{ContainerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a container created by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Created but not yet started
    Created,
    /// Started; may still be settling
    Started,
    /// Stopped, still present in the runtime
    Stopped,
    /// Removed from the runtime; terminal
    Deleted,
}

impl ContainerState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ContainerState) -> bool {
        use ContainerState::*;
        matches!(
            (self, next),
            (Created, Started) | (Started, Stopped) | (Created | Started | Stopped, Deleted)
        )
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Created => "created",
            ContainerState::Started => "started",
            ContainerState::Stopped => "stopped",
            ContainerState::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// A container this process created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningContainer {
    pub id: String,
    pub name: String,
    /// `None` when the container sits on host/default networking without an address.
    pub assigned_ip: Option<String>,
    pub state: ContainerState,
    pub created_at: DateTime<Utc>,
}

impl RunningContainer {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            assigned_ip: None,
            state: ContainerState::Created,
            created_at: Utc::now(),
        }
    }

    /// First 12 characters of the ID, as shown by `docker ps`.
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }

    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Started
    }

    pub(crate) fn transition(&mut self, next: ContainerState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ContainerError::InvalidState {
                name: self.name.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn mark_started(&mut self) -> Result<()> {
        self.transition(ContainerState::Started)
    }

    pub fn mark_stopped(&mut self) -> Result<()> {
        self.transition(ContainerState::Stopped)
    }

    pub fn mark_deleted(&mut self) -> Result<()> {
        self.transition(ContainerState::Deleted)
    }
}
