//! Per-container lifecycle tracking and the end-to-end supervision flow.
//!
//! ```text
//! Composed -> Launched -> Streaming -> Interrupted ----> Cleaned -> Reported
//!                |            |------> NaturallyExited -^
//!                |            '--------------------------^  (supervision error)
//!                '---------------------------------------^  (post-launch hook error)
//! ```
//!
//! A container that fails to launch never leaves `Composed`, and `Cleaned`
//! is entered exactly once for every container that was launched.

use std::fmt;
use std::io::Write;
use std::process::ExitCode;

use tracing::debug;

use crate::descriptor::ContainerDescriptor;
use crate::engine::ContainerHandle;
use crate::error::ContainerError;
use crate::launch::Launcher;
use crate::router::LogRouter;
use crate::supervise::{SupervisionOutcome, Supervisor};

/// Tracing target for lifecycle transitions.
const LIFECYCLE_TARGET: &str = "pernosco_container::lifecycle";

/// Process exit status reported after an operator interrupt.
pub const INTERRUPTED_EXIT_STATUS: u8 = 130;

/// Stage of a single container's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Descriptor built, nothing started.
    Composed,
    /// The engine accepted the container.
    Launched,
    /// Output is being forwarded.
    Streaming,
    /// The operator interrupted supervision.
    Interrupted,
    /// The container exited on its own.
    NaturallyExited,
    /// The container has been removed.
    Cleaned,
    /// The outcome has been handed back to the caller.
    Reported,
}

impl LifecycleState {
    /// Returns true when `next` may follow `self`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Composed, Self::Launched)
                | (Self::Launched, Self::Streaming | Self::Cleaned)
                | (
                    Self::Streaming,
                    Self::Interrupted | Self::NaturallyExited | Self::Cleaned
                )
                | (Self::Interrupted | Self::NaturallyExited, Self::Cleaned)
                | (Self::Cleaned, Self::Reported)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Composed => "composed",
            Self::Launched => "launched",
            Self::Streaming => "streaming",
            Self::Interrupted => "interrupted",
            Self::NaturallyExited => "naturally-exited",
            Self::Cleaned => "cleaned",
            Self::Reported => "reported",
        })
    }
}

/// Validated state tracker for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    name: String,
    state: LifecycleState,
}

impl Lifecycle {
    /// Starts tracking `name` in [`LifecycleState::Composed`].
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: LifecycleState::Composed,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::InvalidTransition`] when `next` may not
    /// follow the current state.
    pub fn advance(&mut self, next: LifecycleState) -> Result<(), ContainerError> {
        if !self.state.can_advance_to(next) {
            return Err(ContainerError::InvalidTransition {
                name: self.name.clone(),
                from: self.state,
                to: next,
            });
        }
        debug!(
            target: LIFECYCLE_TARGET,
            container = %self.name,
            from = %self.state,
            to = %next,
            "lifecycle transition"
        );
        self.state = next;
        Ok(())
    }
}

/// Outcome of a supervised worker as seen by the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The worker exited with status zero.
    Success,
    /// The worker exited with a non-zero status.
    WorkerFailed {
        /// Exit code reported by the engine.
        exit_code: i32,
    },
    /// The operator interrupted the run.
    Interrupted,
}

impl ProcessOutcome {
    /// Exit status the host process should terminate with.
    ///
    /// Worker codes in `1..=255` pass through unchanged; anything else a
    /// failed worker reports collapses to 1.
    #[must_use]
    pub fn exit_status(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::WorkerFailed { exit_code } => u8::try_from(exit_code)
                .ok()
                .filter(|status| *status != 0)
                .unwrap_or(1),
            Self::Interrupted => INTERRUPTED_EXIT_STATUS,
        }
    }

    /// [`ProcessOutcome::exit_status`] as an [`ExitCode`].
    #[must_use]
    pub fn exit_code(self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

impl From<SupervisionOutcome> for ProcessOutcome {
    fn from(outcome: SupervisionOutcome) -> Self {
        match outcome {
            SupervisionOutcome {
                interrupted: true, ..
            } => Self::Interrupted,
            SupervisionOutcome { exit_code: 0, .. } => Self::Success,
            SupervisionOutcome { exit_code, .. } => Self::WorkerFailed { exit_code },
        }
    }
}

/// Launches, supervises, cleans up and reports one container.
///
/// `on_launch` runs after the engine accepts the container and before its
/// output is streamed; it may announce through the supervisor's router. Whatever happens afterwards the container is removed
/// exactly once before this function returns.
///
/// # Errors
///
/// Returns the launch failure, the `on_launch` failure, or the supervision
/// failure. Cleanup failures are logged, never returned.
pub fn run_to_completion<O, E, F>(
    launcher: &Launcher<'_>,
    descriptor: &ContainerDescriptor,
    supervisor: &mut Supervisor<'_, O, E>,
    on_launch: F,
) -> Result<ProcessOutcome, ContainerError>
where
    O: Write,
    E: Write,
    F: FnOnce(&ContainerHandle, &mut LogRouter<O, E>) -> Result<(), ContainerError>,
{
    let mut lifecycle = Lifecycle::new(descriptor.name().as_str());
    let guard = launcher.start(descriptor)?;
    lifecycle.advance(LifecycleState::Launched)?;

    let supervised = match on_launch(guard.handle(), supervisor.router_mut()) {
        Ok(()) => {
            lifecycle.advance(LifecycleState::Streaming)?;
            supervisor.supervise(guard.handle())
        }
        Err(err) => Err(err),
    };
    match &supervised {
        Ok(outcome) if outcome.interrupted => lifecycle.advance(LifecycleState::Interrupted)?,
        Ok(_) => lifecycle.advance(LifecycleState::NaturallyExited)?,
        Err(_) => {}
    }

    guard.cleanup();
    lifecycle.advance(LifecycleState::Cleaned)?;

    let outcome = ProcessOutcome::from(supervised?);
    lifecycle.advance(LifecycleState::Reported)?;
    Ok(outcome)
}
