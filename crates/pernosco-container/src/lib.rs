//! Container confinement and lifecycle supervision for Pernosco workers.
//!
//! The crate turns a caller's intents (an image, mounts, environment, a
//! network policy) into a [`ContainerDescriptor`], launches it through a
//! [`ContainerEngine`], and supervises the resulting container until it
//! exits. Confinement is deliberately tight:
//! - Networking is disabled unless a worker must accept inbound connections,
//!   in which case it joins an internal network with no outbound route.
//! - Every bind mount uses `rslave` propagation so mounts created inside the
//!   worker's own sandboxes never leak back to the host.
//! - A tmpfs always backs the scratch directory.
//! - The container is placed under a fixed cgroup parent chosen from the
//!   engine's cgroups version.
//!
//! Supervision streams the worker's combined output to the host, routes
//! `ERROR` lines to stderr, honours operator interrupts through a
//! [`CancellationToken`], and always force-removes the container before the
//! outcome is reported.
//!
//! ```rust,no_run
//! use std::io;
//!
//! use pernosco_config::EngineKind;
//! use pernosco_container::{
//!     CancellationToken, CliEngine, Composer, ImageReference, Launcher, LogRouter,
//!     MountIntent, Supervisor, UserMapping, WorkerRequest, run_to_completion,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = CliEngine::new(EngineKind::Docker);
//! let request = WorkerRequest::new(
//!     ImageReference::new("pernosco/db-builder:latest"),
//!     "pernosco-build",
//!     UserMapping::id(1000, Some(1000)),
//! )
//! .mount(MountIntent::read_write("/traces/run-0", "/traces/run-0"))
//! .arg("/traces/run-0");
//!
//! let descriptor = Composer::new(&engine).compose(request)?;
//! let token = CancellationToken::new();
//! token.install_interrupt_handler()?;
//! let router = LogRouter::new(io::stdout(), io::stderr());
//! let mut supervisor = Supervisor::new(&engine, router, token);
//! let outcome = run_to_completion(&Launcher::new(&engine), &descriptor, &mut supervisor, |_, _| Ok(()))?;
//! std::process::exit(i32::from(outcome.exit_status()));
//! # }
//! ```

mod cancel;
mod compose;
mod descriptor;
mod engine;
mod error;
mod launch;
mod lifecycle;
mod network;
mod probe;
mod router;
mod supervise;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use cancel::CancellationToken;
pub use compose::{
    BACKTRACE_VARIABLE, Composer, LOG_VARIABLE, SCRATCH_PATH, WorkerRequest, compose_descriptor,
};
pub use descriptor::{
    CgroupParent, ContainerDescriptor, ContainerName, DescriptorBuilder, ImageReference,
    MountIntent, MountMode, NetworkPolicy, PortMapping, SECURITY_RELAXATIONS,
    SecurityRelaxation, UserMapping, UserMappingParseError,
};
pub use engine::{
    CliEngine, ContainerEngine, ContainerHandle, LogPoll, LogStream, render_command,
    run_arguments,
};
pub use error::{ContainerError, DescriptorError, EngineError};
pub use launch::{ContainerGuard, Launch, LaunchOptions, Launcher};
pub use lifecycle::{
    INTERRUPTED_EXIT_STATUS, Lifecycle, LifecycleState, ProcessOutcome, run_to_completion,
};
pub use network::ensure_network_exists;
pub use probe::{
    CGROUP_V1_PARENT, CGROUP_V2_PARENT, CgroupsVersion, DockerProber, PodmanProber,
    SystemInfoProber, probe_cgroup_parent, prober_for,
};
pub use router::{ERROR_MARKER, LogRouter, open_log_file};
pub use supervise::{INTERRUPTED_EXIT_CODE, SupervisionOutcome, Supervisor};

#[cfg(test)]
mod tests;
