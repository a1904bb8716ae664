//! Launching composed containers and guaranteeing their removal.

use tracing::{debug, info, warn};

use crate::descriptor::ContainerDescriptor;
use crate::engine::{ContainerEngine, ContainerHandle};
use crate::error::ContainerError;

/// Tracing target for container launch and cleanup.
const LAUNCH_TARGET: &str = "pernosco_container::launch";

/// How a descriptor is handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Start in the background and return a handle immediately.
    pub detach: bool,
    /// Let the engine remove the container when it exits.
    pub auto_remove: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            detach: true,
            auto_remove: false,
        }
    }
}

/// Result of [`Launcher::launch`].
#[derive(Debug, PartialEq, Eq)]
pub enum Launch {
    /// The container is running in the background.
    Detached(ContainerHandle),
    /// The container ran in the foreground; this is its standard output.
    Completed(Vec<u8>),
}

/// Hands descriptors to a container engine.
#[derive(Clone, Copy)]
pub struct Launcher<'e> {
    engine: &'e dyn ContainerEngine,
}

impl std::fmt::Debug for Launcher<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Launcher")
            .field("engine", &self.engine.kind())
            .finish()
    }
}

impl<'e> Launcher<'e> {
    /// Creates a launcher for `engine`.
    #[must_use]
    pub const fn new(engine: &'e dyn ContainerEngine) -> Self {
        Self { engine }
    }

    /// Launches `descriptor` as `options` describe.
    ///
    /// A failed detached launch makes one best-effort attempt to remove
    /// whatever the engine created under the descriptor's name.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::LaunchFailed`] carrying the engine's
    /// diagnostic.
    pub fn launch(
        &self,
        descriptor: &ContainerDescriptor,
        options: LaunchOptions,
    ) -> Result<Launch, ContainerError> {
        debug!(
            target: LAUNCH_TARGET,
            container = descriptor.name().as_str(),
            ?options,
            "launching container"
        );
        if options.detach {
            self.run_detached(descriptor, options.auto_remove)
                .map(Launch::Detached)
        } else {
            self.run_foreground(descriptor, options.auto_remove)
                .map(Launch::Completed)
        }
    }

    /// Starts `descriptor` in the background and guards its removal.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::LaunchFailed`] when the engine refuses.
    pub fn start(&self, descriptor: &ContainerDescriptor) -> Result<ContainerGuard<'e>, ContainerError> {
        let handle = self.run_detached(descriptor, false)?;
        info!(target: LAUNCH_TARGET, container = handle.name(), "container started");
        Ok(ContainerGuard::new(self.engine, handle))
    }

    /// Runs `descriptor` in the foreground with engine-side removal and
    /// returns its standard output.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::LaunchFailed`] when the container cannot be
    /// run or exits unsuccessfully.
    pub fn run_captured(&self, descriptor: &ContainerDescriptor) -> Result<Vec<u8>, ContainerError> {
        self.run_foreground(descriptor, true)
    }

    fn run_detached(
        &self,
        descriptor: &ContainerDescriptor,
        auto_remove: bool,
    ) -> Result<ContainerHandle, ContainerError> {
        let name = descriptor.name().as_str();
        self.engine
            .run_detached(descriptor, auto_remove)
            .map_err(|source| {
                // The name belongs to someone else's container.
                if !source.is_name_conflict() {
                    self.discard(name);
                }
                ContainerError::LaunchFailed {
                    name: name.to_owned(),
                    source,
                }
            })
    }

    fn run_foreground(
        &self,
        descriptor: &ContainerDescriptor,
        auto_remove: bool,
    ) -> Result<Vec<u8>, ContainerError> {
        self.engine
            .run_foreground(descriptor, auto_remove)
            .map_err(|source| ContainerError::LaunchFailed {
                name: descriptor.name().to_string(),
                source,
            })
    }

    fn discard(&self, name: &str) {
        let handle = ContainerHandle::new(name, None);
        if let Err(err) = self.engine.remove(&handle) {
            debug!(target: LAUNCH_TARGET, container = name, error = %err, "nothing to discard");
        }
    }
}

/// Removes a detached container exactly once.
///
/// Removal happens on [`ContainerGuard::cleanup`] or, failing that, on drop.
/// Removal failures are logged and never surface as errors.
pub struct ContainerGuard<'e> {
    engine: &'e dyn ContainerEngine,
    handle: ContainerHandle,
    cleaned: bool,
}

impl std::fmt::Debug for ContainerGuard<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ContainerGuard")
            .field("handle", &self.handle)
            .field("cleaned", &self.cleaned)
            .finish_non_exhaustive()
    }
}

impl<'e> ContainerGuard<'e> {
    /// Guards `handle`, removing it through `engine`.
    #[must_use]
    pub const fn new(engine: &'e dyn ContainerEngine, handle: ContainerHandle) -> Self {
        Self {
            engine,
            handle,
            cleaned: false,
        }
    }

    /// The guarded container.
    #[must_use]
    pub const fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    /// Force-removes the container now.
    pub fn cleanup(mut self) {
        self.remove_once();
    }

    fn remove_once(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        match self.engine.remove(&self.handle) {
            Ok(()) => debug!(target: LAUNCH_TARGET, container = self.handle.name(), "container removed"),
            Err(err) => warn!(
                target: LAUNCH_TARGET,
                container = self.handle.name(),
                error = %err,
                "failed to remove container"
            ),
        }
    }
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        self.remove_once();
    }
}
