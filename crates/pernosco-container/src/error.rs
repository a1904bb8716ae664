//! Domain errors raised while composing, launching, and supervising workers.

use std::io;
use std::path::PathBuf;

use pernosco_config::EngineKind;
use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Failures reported by the container engine's command-line interface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine binary could not be started at all.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        /// Rendered command line.
        command: String,
        /// Underlying spawn failure.
        #[source]
        source: io::Error,
    },
    /// The engine ran but rejected the request.
    #[error("`{command}` {}: {stderr}", exit_label(.status))]
    Failed {
        /// Rendered command line.
        command: String,
        /// Exit status, absent when the engine was killed by a signal.
        status: Option<i32>,
        /// The engine's own diagnostic, collapsed onto a single line.
        stderr: String,
    },
    /// The engine succeeded but its output could not be interpreted.
    #[error("`{command}` produced unexpected output {output:?}")]
    Parse {
        /// Rendered command line.
        command: String,
        /// Raw output that failed to parse.
        output: String,
    },
}

impl EngineError {
    /// Builds a [`EngineError::Failed`] from captured stderr bytes.
    #[must_use]
    pub fn failed(command: impl Into<String>, status: Option<i32>, stderr: &[u8]) -> Self {
        Self::Failed {
            command: command.into(),
            status,
            stderr: single_line(&String::from_utf8_lossy(stderr)),
        }
    }

    /// Returns true when the engine refused a name owned by another container.
    #[must_use]
    pub fn is_name_conflict(&self) -> bool {
        matches!(self, Self::Failed { stderr, .. } if stderr.contains(NAME_CONFLICT_MARKER))
    }
}

/// Wording shared by docker and podman when a container name is taken.
const NAME_CONFLICT_MARKER: &str = "is already in use";

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exited with status {code}"),
        None => String::from("was terminated by a signal"),
    }
}

fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validation failures raised by [`crate::DescriptorBuilder::build`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// Mount sources must be absolute host paths.
    #[error("mount source {path:?} is not an absolute path")]
    RelativeHostPath {
        /// Offending host path.
        path: PathBuf,
    },
    /// Mount targets must be absolute container paths.
    #[error("mount target {path:?} is not an absolute path")]
    RelativeContainerPath {
        /// Offending container path.
        path: PathBuf,
    },
    /// Two mounts (or a mount and a tmpfs) share a container path.
    #[error("container path {path:?} is mounted more than once")]
    DuplicateContainerPath {
        /// Container path that appeared twice.
        path: PathBuf,
    },
    /// Environment keys must be non-empty and free of `=` and NUL.
    #[error("invalid environment variable name {key:?}")]
    InvalidEnvironmentKey {
        /// Rejected key.
        key: String,
    },
    /// Every descriptor must be placed under a cgroup parent.
    #[error("descriptor for {name} has no cgroup parent")]
    MissingCgroupParent {
        /// Container name of the incomplete descriptor.
        name: String,
    },
}

/// Errors raised by the confinement and supervision pipeline.
///
/// Cleanup failures are deliberately absent: they are logged and never
/// replace an outcome that has already been determined.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The capability probe could not classify the engine's cgroups setup.
    #[error("unsupported {engine} runtime: {detail}")]
    UnsupportedRuntime {
        /// Engine that was probed.
        engine: EngineKind,
        /// What the probe observed.
        detail: String,
    },
    /// The isolated network neither existed nor could be created.
    #[error("failed to set up isolated network {network}: {source}")]
    NetworkSetupFailed {
        /// Network name.
        network: String,
        /// Engine failure from the create request.
        #[source]
        source: EngineError,
    },
    /// The engine refused to start the container.
    #[error("failed to launch container {name}: {source}")]
    LaunchFailed {
        /// Generated container name.
        name: String,
        /// Engine failure, carrying the engine's diagnostic text.
        #[source]
        source: EngineError,
    },
    /// The log follower could not be started.
    #[error("failed to follow output of container {name}: {source}")]
    LogStream {
        /// Container name.
        name: String,
        /// Engine failure.
        #[source]
        source: EngineError,
    },
    /// Reading the followed output failed.
    #[error("failed to read output of container {name}: {source}")]
    LogRead {
        /// Container name.
        name: String,
        /// Underlying read failure.
        #[source]
        source: io::Error,
    },
    /// Writing worker output to a host sink failed.
    #[error("failed to forward container output: {0}")]
    LogForward(#[source] io::Error),
    /// The engine could not report the container's exit status.
    #[error("failed to wait for container {name}: {source}")]
    WaitFailed {
        /// Container name.
        name: String,
        /// Engine failure.
        #[source]
        source: EngineError,
    },
    /// The container's network address could not be read back.
    #[error("failed to inspect container {name}: {source}")]
    Inspect {
        /// Container name.
        name: String,
        /// Engine failure.
        #[source]
        source: EngineError,
    },
    /// The composed descriptor failed validation.
    #[error(transparent)]
    InvalidDescriptor(#[from] DescriptorError),
    /// A lifecycle step was attempted out of order.
    #[error("container {name} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Container name.
        name: String,
        /// Current state.
        from: LifecycleState,
        /// Rejected next state.
        to: LifecycleState,
    },
}
