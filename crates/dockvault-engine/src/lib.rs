//! Container engine client boundary for dockvault.
//!
//! The backup and restore managers only talk to an engine through the
//! `ContainerEngine` trait. `DockerCliEngine` drives a local Docker (or any
//! CLI-compatible engine such as Podman) by shelling out; `MockEngine` keeps
//! containers and images in memory and can inject failures at any step.

pub mod backend;
pub mod docker;
pub mod mock;
pub mod prereq;

pub use backend::{
    select_engine, ContainerEngine, ContainerSummary, CreateParams, ImageSummary, VolumeSpec,
};
pub use docker::DockerCliEngine;
pub use mock::{FailPoint, MockEngine};
pub use prereq::{check_engine_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot reach container engine: {0}")]
    Unavailable(String),
    #[error("engine '{0}' is not supported")]
    UnknownEngine(String),
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("name conflict: {0}")]
    Conflict(String),
    #[error("`{command}` failed (exit {}): {stderr}", .status.map_or_else(|| "signal".to_owned(), |c| c.to_string()))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },
    #[error("cannot parse engine output: {0}")]
    Parse(String),
}

impl EngineError {
    /// True when the engine itself could not be reached, as opposed to a
    /// failed request against a reachable engine.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, EngineError::Unavailable(_))
    }
}
