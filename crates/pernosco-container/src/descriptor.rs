//! Typed description of a single confined container invocation.
//!
//! [`ContainerDescriptor`] is engine-agnostic: it records *what* the
//! container may touch, and [`crate::run_arguments`] is the only place that
//! knows how a particular engine spells it on the command line.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::error::DescriptorError;

/// Opaque image identifier (`registry/repository:tag`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference(String);

impl ImageReference {
    /// Wraps an already-resolved image reference.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Returns the reference as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Whether a bind mount may be written from inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    /// The container sees the host path read-only.
    ReadOnly,
    /// The container may modify the host path.
    ReadWrite,
}

/// Request to expose a host path inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountIntent {
    host_path: PathBuf,
    container_path: PathBuf,
    mode: MountMode,
}

impl MountIntent {
    /// Creates a mount intent.
    #[must_use]
    pub fn new(
        host_path: impl Into<PathBuf>,
        container_path: impl Into<PathBuf>,
        mode: MountMode,
    ) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            mode,
        }
    }

    /// Read-only mount of `host_path` at `container_path`.
    #[must_use]
    pub fn read_only(host_path: impl Into<PathBuf>, container_path: impl Into<PathBuf>) -> Self {
        Self::new(host_path, container_path, MountMode::ReadOnly)
    }

    /// Read-write mount of `host_path` at `container_path`.
    #[must_use]
    pub fn read_write(host_path: impl Into<PathBuf>, container_path: impl Into<PathBuf>) -> Self {
        Self::new(host_path, container_path, MountMode::ReadWrite)
    }

    /// Source path on the host.
    #[must_use]
    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    /// Target path inside the container.
    #[must_use]
    pub fn container_path(&self) -> &Path {
        &self.container_path
    }

    /// Access mode.
    #[must_use]
    pub const fn mode(&self) -> MountMode {
        self.mode
    }

    /// Returns true when the container may not write through this mount.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        matches!(self.mode, MountMode::ReadOnly)
    }
}

/// Host-to-container port publication, bound to the loopback interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// Port on `127.0.0.1` of the host.
    pub host: u16,
    /// Port the worker listens on.
    pub container: u16,
}

/// Network confinement applied to the container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkPolicy {
    /// No network interfaces besides loopback.
    ///
    /// The engine's embedded resolver may still answer DNS queries; no engine
    /// switch removes that channel.
    #[default]
    None,
    /// Join an internal network with no route to the outside world.
    IsolatedPrivate {
        /// Name of the internal network.
        network: String,
        /// Optional loopback publication for inbound access.
        publish: Option<PortMapping>,
    },
}

impl NetworkPolicy {
    /// Builds an isolated policy without port publication.
    #[must_use]
    pub fn isolated(network: impl Into<String>) -> Self {
        Self::IsolatedPrivate {
            network: network.into(),
            publish: None,
        }
    }

    /// Name of the network to join, if any.
    #[must_use]
    pub fn network_name(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::IsolatedPrivate { network, .. } => Some(network),
        }
    }
}

/// How the container's processes are mapped onto host identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMapping {
    /// Run as the given numeric uid (and gid).
    Id {
        /// Numeric user id.
        uid: u32,
        /// Numeric group id; the image default when absent.
        gid: Option<u32>,
    },
    /// Keep the invoking user's identity (rootless Podman).
    KeepId,
}

impl UserMapping {
    /// Shorthand for [`UserMapping::Id`].
    #[must_use]
    pub const fn id(uid: u32, gid: Option<u32>) -> Self {
        Self::Id { uid, gid }
    }
}

/// Errors raised when parsing `UID[:GID]` text.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("expected UID[:GID] with numeric ids, got {0:?}")]
pub struct UserMappingParseError(pub String);

impl FromStr for UserMapping {
    type Err = UserMappingParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || UserMappingParseError(text.to_owned());
        let (uid_text, gid_text) = text
            .split_once(':')
            .map_or((text, None), |(uid, gid)| (uid, Some(gid)));
        let uid = uid_text.parse::<u32>().map_err(|_| invalid())?;
        let gid = gid_text
            .map(|value| value.parse::<u32>().map_err(|_| invalid()))
            .transpose()?;
        Ok(Self::Id { uid, gid })
    }
}

/// Control-group node under which the container is accounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupParent(String);

impl CgroupParent {
    /// Wraps a cgroup parent path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the parent path as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Security profile relaxations required by the workers.
///
/// The workers trace processes and build mount namespaces of their own,
/// which the engines' default syscall filter and MAC profile forbid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityRelaxation {
    /// Disable the seccomp syscall filter.
    SeccompUnconfined,
    /// Disable the AppArmor profile.
    AppArmorUnconfined,
}

/// The fixed relaxations applied to every worker container.
pub const SECURITY_RELAXATIONS: [SecurityRelaxation; 2] = [
    SecurityRelaxation::SeccompUnconfined,
    SecurityRelaxation::AppArmorUnconfined,
];

/// Unique container name: a readable prefix plus a random 64-bit suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerName(String);

impl ContainerName {
    /// Generates a fresh name under `prefix`.
    ///
    /// No lookup against running containers is made; the engine rejects the
    /// astronomically unlikely true collision at launch.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        let suffix: u64 = rand::random();
        Self(format!("{prefix}-{suffix:016x}"))
    }

    /// Uses `name` verbatim.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Fully composed, validated container invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDescriptor {
    image: ImageReference,
    name: ContainerName,
    entrypoint: Option<String>,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    mounts: Vec<MountIntent>,
    tmpfs: Vec<PathBuf>,
    network: NetworkPolicy,
    cgroup_parent: CgroupParent,
    user: UserMapping,
    security: Vec<SecurityRelaxation>,
}

impl ContainerDescriptor {
    /// Starts building a descriptor for `image` under `name`.
    #[must_use]
    pub fn builder(image: ImageReference, name: ContainerName, user: UserMapping) -> DescriptorBuilder {
        DescriptorBuilder {
            image,
            name,
            user,
            entrypoint: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            mounts: Vec::new(),
            tmpfs: Vec::new(),
            network: NetworkPolicy::None,
            cgroup_parent: None,
        }
    }

    /// Image to run.
    #[must_use]
    pub fn image(&self) -> &ImageReference {
        &self.image
    }

    /// Unique container name.
    #[must_use]
    pub fn name(&self) -> &ContainerName {
        &self.name
    }

    /// Entrypoint override, if any.
    #[must_use]
    pub fn entrypoint(&self) -> Option<&str> {
        self.entrypoint.as_deref()
    }

    /// Positional arguments passed to the entrypoint.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Environment variables, ordered by key.
    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Bind mounts in request order.
    #[must_use]
    pub fn mounts(&self) -> &[MountIntent] {
        &self.mounts
    }

    /// Paths backed by tmpfs.
    #[must_use]
    pub fn tmpfs(&self) -> &[PathBuf] {
        &self.tmpfs
    }

    /// Network confinement.
    #[must_use]
    pub fn network(&self) -> &NetworkPolicy {
        &self.network
    }

    /// Cgroup parent.
    #[must_use]
    pub fn cgroup_parent(&self) -> &CgroupParent {
        &self.cgroup_parent
    }

    /// User mapping directive.
    #[must_use]
    pub const fn user(&self) -> UserMapping {
        self.user
    }

    /// Security relaxations.
    #[must_use]
    pub fn security(&self) -> &[SecurityRelaxation] {
        &self.security
    }
}

/// Builder validating a [`ContainerDescriptor`] before it reaches an engine.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    image: ImageReference,
    name: ContainerName,
    user: UserMapping,
    entrypoint: Option<String>,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    mounts: Vec<MountIntent>,
    tmpfs: Vec<PathBuf>,
    network: NetworkPolicy,
    cgroup_parent: Option<CgroupParent>,
}

impl DescriptorBuilder {
    /// Overrides the image entrypoint.
    #[must_use]
    pub fn entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    /// Appends positional arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable; later values replace earlier ones.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Adds a bind mount.
    #[must_use]
    pub fn mount(mut self, mount: MountIntent) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Backs `path` with a tmpfs.
    #[must_use]
    pub fn tmpfs(mut self, path: impl Into<PathBuf>) -> Self {
        self.tmpfs.push(path.into());
        self
    }

    /// Sets the network policy.
    #[must_use]
    pub fn network(mut self, network: NetworkPolicy) -> Self {
        self.network = network;
        self
    }

    /// Sets the cgroup parent.
    #[must_use]
    pub fn cgroup_parent(mut self, parent: CgroupParent) -> Self {
        self.cgroup_parent = Some(parent);
        self
    }

    /// Validates the collected intents.
    ///
    /// # Errors
    ///
    /// Returns a [`DescriptorError`] for relative mount paths, duplicate
    /// container paths, malformed environment keys, or a missing cgroup
    /// parent.
    pub fn build(self) -> Result<ContainerDescriptor, DescriptorError> {
        let Some(cgroup_parent) = self.cgroup_parent else {
            return Err(DescriptorError::MissingCgroupParent {
                name: self.name.to_string(),
            });
        };

        let mut targets = BTreeSet::new();
        for mount in &self.mounts {
            if !mount.host_path().is_absolute() {
                return Err(DescriptorError::RelativeHostPath {
                    path: mount.host_path().to_path_buf(),
                });
            }
            claim_target(&mut targets, mount.container_path())?;
        }
        for path in &self.tmpfs {
            claim_target(&mut targets, path)?;
        }

        if let Some(key) = self.env.keys().find(|key| !is_valid_env_key(key)) {
            return Err(DescriptorError::InvalidEnvironmentKey { key: key.clone() });
        }

        Ok(ContainerDescriptor {
            image: self.image,
            name: self.name,
            entrypoint: self.entrypoint,
            args: self.args,
            env: self.env,
            mounts: self.mounts,
            tmpfs: self.tmpfs,
            network: self.network,
            cgroup_parent,
            user: self.user,
            security: SECURITY_RELAXATIONS.to_vec(),
        })
    }
}

fn claim_target<'a>(targets: &mut BTreeSet<&'a Path>, path: &'a Path) -> Result<(), DescriptorError> {
    if !path.is_absolute() {
        return Err(DescriptorError::RelativeContainerPath {
            path: path.to_path_buf(),
        });
    }
    if !targets.insert(path) {
        return Err(DescriptorError::DuplicateContainerPath {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn is_valid_env_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(['=', '\0'])
}
