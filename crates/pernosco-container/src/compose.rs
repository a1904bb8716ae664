//! Composition of worker requests into confined container descriptors.

use std::collections::BTreeMap;

use tracing::debug;

use crate::descriptor::{
    CgroupParent, ContainerDescriptor, ContainerName, ImageReference, MountIntent, NetworkPolicy,
    UserMapping,
};
use crate::engine::ContainerEngine;
use crate::error::ContainerError;
use crate::network::ensure_network_exists;
use crate::probe::{SystemInfoProber, probe_cgroup_parent, prober_for};

/// Tracing target for composition.
const COMPOSE_TARGET: &str = "pernosco_container::compose";

/// Scratch directory always backed by tmpfs.
pub const SCRATCH_PATH: &str = "/tmp";

/// Variable forcing full backtraces from worker panics.
pub const BACKTRACE_VARIABLE: &str = "RUST_BACKTRACE";

/// Variable carrying the worker's log filter.
pub const LOG_VARIABLE: &str = "RUST_LOG";

/// What a caller wants to run, before confinement is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequest {
    image: ImageReference,
    name_prefix: String,
    user: UserMapping,
    entrypoint: Option<String>,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    mounts: Vec<MountIntent>,
    network: NetworkPolicy,
    log_filter: Option<String>,
}

impl WorkerRequest {
    /// Starts a request for `image`; container names begin with `name_prefix`.
    #[must_use]
    pub fn new(image: ImageReference, name_prefix: impl Into<String>, user: UserMapping) -> Self {
        Self {
            image,
            name_prefix: name_prefix.into(),
            user,
            entrypoint: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            mounts: Vec::new(),
            network: NetworkPolicy::None,
            log_filter: None,
        }
    }

    /// Adds a bind mount.
    #[must_use]
    pub fn mount(mut self, mount: MountIntent) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Appends one worker argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends worker arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Passes an environment variable to the worker.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Overrides the image entrypoint.
    #[must_use]
    pub fn entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    /// Sets the network policy; [`NetworkPolicy::None`] by default.
    #[must_use]
    pub fn network(mut self, network: NetworkPolicy) -> Self {
        self.network = network;
        self
    }

    /// Forwards a log filter to the worker as `RUST_LOG`.
    #[must_use]
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Image to run.
    #[must_use]
    pub const fn image(&self) -> &ImageReference {
        &self.image
    }

    /// Network policy requested.
    #[must_use]
    pub const fn network_policy(&self) -> &NetworkPolicy {
        &self.network
    }
}

/// Builds a descriptor from a request, a unique name and a cgroup parent.
///
/// Applies the fixed confinement every worker receives: tmpfs scratch
/// space, full backtraces, the security relaxations, and the requested
/// mounts unchanged in mode.
///
/// # Errors
///
/// Returns [`ContainerError::InvalidDescriptor`] when validation fails.
pub fn compose_descriptor(
    request: WorkerRequest,
    name: ContainerName,
    cgroup_parent: CgroupParent,
) -> Result<ContainerDescriptor, ContainerError> {
    let WorkerRequest {
        image,
        user,
        entrypoint,
        args,
        env,
        mounts,
        network,
        log_filter,
        ..
    } = request;

    let mut builder = ContainerDescriptor::builder(image, name, user)
        .network(network)
        .cgroup_parent(cgroup_parent)
        .tmpfs(SCRATCH_PATH)
        .args(args);
    for (key, value) in env {
        builder = builder.env(key, value);
    }
    // Fixed variables win over caller-supplied ones.
    if let Some(filter) = log_filter {
        builder = builder.env(LOG_VARIABLE, filter);
    }
    builder = builder.env(BACKTRACE_VARIABLE, "full");
    for mount in mounts {
        builder = builder.mount(mount);
    }
    if let Some(entrypoint_override) = entrypoint {
        builder = builder.entrypoint(entrypoint_override);
    }
    Ok(builder.build()?)
}

/// Probes the engine and composes requests against it.
pub struct Composer<'e> {
    engine: &'e dyn ContainerEngine,
    prober: Box<dyn SystemInfoProber>,
}

impl std::fmt::Debug for Composer<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Composer")
            .field("engine", &self.engine.kind())
            .finish_non_exhaustive()
    }
}

impl<'e> Composer<'e> {
    /// Uses the prober matching the engine's kind.
    #[must_use]
    pub fn new(engine: &'e dyn ContainerEngine) -> Self {
        Self {
            engine,
            prober: prober_for(engine.kind()),
        }
    }

    /// Substitutes the capability prober.
    #[must_use]
    pub fn with_prober(mut self, prober: Box<dyn SystemInfoProber>) -> Self {
        self.prober = prober;
        self
    }

    /// Composes `request` into a launchable descriptor.
    ///
    /// Probes the cgroup parent, ensures the isolated network exists when one
    /// is requested, and generates a unique container name.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::UnsupportedRuntime`],
    /// [`ContainerError::NetworkSetupFailed`] or
    /// [`ContainerError::InvalidDescriptor`].
    pub fn compose(&self, request: WorkerRequest) -> Result<ContainerDescriptor, ContainerError> {
        let cgroup_parent = probe_cgroup_parent(self.engine, self.prober.as_ref())?;
        if let Some(network) = request.network_policy().network_name() {
            ensure_network_exists(self.engine, network)?;
        }
        let name = ContainerName::generate(&request.name_prefix);
        debug!(
            target: COMPOSE_TARGET,
            container = name.as_str(),
            image = request.image().as_str(),
            "composing container"
        );
        compose_descriptor(request, name, cgroup_parent)
    }
}
