//! Supervision of a launched container until it exits or is interrupted.

use std::io::Write;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::engine::{ContainerEngine, ContainerHandle, LogPoll};
use crate::error::ContainerError;
use crate::router::LogRouter;

/// Tracing target for supervision.
const SUPERVISE_TARGET: &str = "pernosco_container::supervise";

/// Exit code recorded when supervision ended because of an interrupt.
pub const INTERRUPTED_EXIT_CODE: i32 = -1;

/// How often the cancellation token is checked while output is idle.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a supervised container finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisionOutcome {
    /// Worker exit code, or [`INTERRUPTED_EXIT_CODE`].
    pub exit_code: i32,
    /// Whether the operator interrupted supervision.
    pub interrupted: bool,
}

impl SupervisionOutcome {
    /// Outcome of a container that exited on its own.
    #[must_use]
    pub const fn exited(exit_code: i32) -> Self {
        Self {
            exit_code,
            interrupted: false,
        }
    }

    /// Outcome of an interrupted supervision.
    #[must_use]
    pub const fn interrupted() -> Self {
        Self {
            exit_code: INTERRUPTED_EXIT_CODE,
            interrupted: true,
        }
    }
}

/// Streams a container's output and waits for it to finish.
pub struct Supervisor<'e, O, E> {
    engine: &'e dyn ContainerEngine,
    router: LogRouter<O, E>,
    token: CancellationToken,
    poll_interval: Duration,
}

impl<O, E> std::fmt::Debug for Supervisor<'_, O, E> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Supervisor")
            .field("router", &self.router)
            .field("token", &self.token)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl<'e, O: Write, E: Write> Supervisor<'e, O, E> {
    /// Creates a supervisor forwarding output through `router`.
    #[must_use]
    pub fn new(engine: &'e dyn ContainerEngine, router: LogRouter<O, E>, token: CancellationToken) -> Self {
        Self {
            engine,
            router,
            token,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides how long each poll waits for output.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Token observed by this supervisor.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Router used for worker output.
    #[must_use]
    pub const fn router_mut(&mut self) -> &mut LogRouter<O, E> {
        &mut self.router
    }

    /// Forwards output until the container exits, then collects its status.
    ///
    /// When the token is raised the container is asked to stop exactly once
    /// and the interrupted outcome is returned; the stop request's own
    /// failure is only logged.
    ///
    /// # Errors
    ///
    /// Returns a [`ContainerError`] when output cannot be followed or
    /// forwarded, or when the exit status cannot be read without an
    /// interrupt pending.
    pub fn supervise(&mut self, handle: &ContainerHandle) -> Result<SupervisionOutcome, ContainerError> {
        let stream = self
            .engine
            .follow_logs(handle)
            .map_err(|source| ContainerError::LogStream {
                name: handle.name().to_owned(),
                source,
            })?;

        loop {
            if self.token.is_cancelled() {
                return Ok(self.interrupt(handle));
            }
            match stream
                .poll(self.poll_interval)
                .map_err(|source| ContainerError::LogRead {
                    name: handle.name().to_owned(),
                    source,
                })? {
                LogPoll::Line(line) => self.router.route(&line).map_err(ContainerError::LogForward)?,
                LogPoll::Pending => {}
                LogPoll::Closed => break,
            }
        }
        drop(stream);
        debug!(target: SUPERVISE_TARGET, container = handle.name(), "output closed");

        if self.token.is_cancelled() {
            return Ok(self.interrupt(handle));
        }
        match self.engine.wait(handle) {
            Ok(exit_code) => {
                debug!(target: SUPERVISE_TARGET, container = handle.name(), exit_code, "container exited");
                Ok(SupervisionOutcome::exited(exit_code))
            }
            Err(err) if self.token.is_cancelled() => {
                debug!(target: SUPERVISE_TARGET, error = %err, "wait aborted by interrupt");
                Ok(self.interrupt(handle))
            }
            Err(source) => Err(ContainerError::WaitFailed {
                name: handle.name().to_owned(),
                source,
            }),
        }
    }

    fn interrupt(&self, handle: &ContainerHandle) -> SupervisionOutcome {
        info!(target: SUPERVISE_TARGET, container = handle.name(), "interrupted, stopping container");
        if let Err(err) = self.engine.stop(handle) {
            warn!(
                target: SUPERVISE_TARGET,
                container = handle.name(),
                error = %err,
                "failed to stop container"
            );
        }
        SupervisionOutcome::interrupted()
    }
}
