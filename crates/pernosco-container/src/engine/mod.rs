//! Container engine abstraction.
//!
//! Docker and Podman are driven through their command-line interfaces. The
//! [`ContainerEngine`] trait is the seam between the confinement pipeline
//! and those binaries, which lets tests substitute a recording fake.

mod cli;
mod logs;
mod syntax;

use pernosco_config::EngineKind;

use crate::descriptor::ContainerDescriptor;
use crate::error::EngineError;

pub use cli::{CliEngine, render_command};
pub use logs::{LogPoll, LogStream};
pub use syntax::run_arguments;

/// A running (or exited but not yet removed) container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    name: String,
    id: Option<String>,
}

impl ContainerHandle {
    /// Creates a handle from the container name and the engine-assigned id.
    #[must_use]
    pub fn new(name: impl Into<String>, id: Option<String>) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    /// Container name, usable in every engine command.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engine-assigned container id, when the engine printed one.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// Operations the confinement pipeline needs from a container engine.
pub trait ContainerEngine {
    /// Which engine implementation this is.
    fn kind(&self) -> EngineKind;

    /// Renders the engine's system information through a Go template.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the engine cannot be reached or
    /// rejects the template.
    fn system_info(&self, template: &str) -> Result<String, EngineError>;

    /// Reports whether a network called `name` exists.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the engine cannot be queried.
    fn network_exists(&self, name: &str) -> Result<bool, EngineError>;

    /// Creates an internal network with no outbound route.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the engine refuses, including when the
    /// network was created concurrently by another invocation.
    fn create_internal_network(&self, name: &str) -> Result<(), EngineError>;

    /// Starts the container in the background.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] carrying the engine's diagnostic when the
    /// container cannot be started.
    fn run_detached(
        &self,
        descriptor: &ContainerDescriptor,
        auto_remove: bool,
    ) -> Result<ContainerHandle, EngineError>;

    /// Runs the container to completion and returns its standard output.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the container cannot be started or
    /// exits unsuccessfully.
    fn run_foreground(
        &self,
        descriptor: &ContainerDescriptor,
        auto_remove: bool,
    ) -> Result<Vec<u8>, EngineError>;

    /// Follows the container's combined stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the follower process cannot start.
    fn follow_logs(&self, handle: &ContainerHandle) -> Result<LogStream, EngineError>;

    /// Blocks until the container exits and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the engine cannot report the status.
    fn wait(&self, handle: &ContainerHandle) -> Result<i32, EngineError>;

    /// Asks the container to stop.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the stop request fails.
    fn stop(&self, handle: &ContainerHandle) -> Result<(), EngineError>;

    /// Force-removes the container together with its anonymous volumes.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when removal fails.
    fn remove(&self, handle: &ContainerHandle) -> Result<(), EngineError>;

    /// Returns the container's address on `network`.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the container cannot be inspected.
    fn address(&self, handle: &ContainerHandle, network: &str) -> Result<String, EngineError>;
}
