//! Capability probe selecting the cgroup parent for worker containers.
//!
//! Docker reports the host's cgroups version under a single field. Podman
//! has spelled the field two ways across releases, so its prober tries each
//! spelling in turn and only falls back when the earlier one is absent.

use std::str::FromStr;

use pernosco_config::EngineKind;
use tracing::debug;

use crate::descriptor::CgroupParent;
use crate::engine::ContainerEngine;
use crate::error::{ContainerError, EngineError};

/// Tracing target for capability probing.
const PROBE_TARGET: &str = "pernosco_container::probe";

/// Cgroup parent used on unified (v2) hierarchies: a systemd slice.
pub const CGROUP_V2_PARENT: &str = "pernosco.slice";

/// Cgroup parent used on legacy (v1) hierarchies: a plain path.
pub const CGROUP_V1_PARENT: &str = "/pernosco/";

/// Placeholder Go templates print for a missing field.
const NO_VALUE: &str = "<no value>";

/// Cgroups hierarchy version reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupsVersion {
    /// Legacy per-controller hierarchy.
    V1,
    /// Unified hierarchy.
    V2,
}

impl CgroupsVersion {
    /// Cgroup parent for containers on this hierarchy.
    #[must_use]
    pub fn parent(self) -> CgroupParent {
        match self {
            Self::V1 => CgroupParent::new(CGROUP_V1_PARENT),
            Self::V2 => CgroupParent::new(CGROUP_V2_PARENT),
        }
    }
}

impl FromStr for CgroupsVersion {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.trim() {
            "1" | "v1" => Ok(Self::V1),
            "2" | "v2" => Ok(Self::V2),
            other => Err(other.to_owned()),
        }
    }
}

/// Reads the cgroups version from an engine.
pub trait SystemInfoProber {
    /// Go templates tried in order against `info --format`.
    fn templates(&self) -> &'static [&'static str];

    /// Determines the cgroups version.
    ///
    /// A template that fails or renders nothing moves on to the next one; a
    /// template that renders an unrecognised value is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::UnsupportedRuntime`] when no template yields
    /// a recognised version.
    fn cgroups_version(&self, engine: &dyn ContainerEngine) -> Result<CgroupsVersion, ContainerError> {
        let mut last_failure: Option<EngineError> = None;
        for template in self.templates() {
            match engine.system_info(template) {
                Ok(output) if output.is_empty() || output == NO_VALUE => {
                    debug!(target: PROBE_TARGET, template, "field absent, trying next template");
                }
                Ok(output) => {
                    return output.parse().map_err(|value: String| {
                        ContainerError::UnsupportedRuntime {
                            engine: engine.kind(),
                            detail: format!("unrecognised cgroups version {value:?}"),
                        }
                    });
                }
                Err(err) => {
                    debug!(target: PROBE_TARGET, template, error = %err, "probe query failed");
                    last_failure = Some(err);
                }
            }
        }
        Err(ContainerError::UnsupportedRuntime {
            engine: engine.kind(),
            detail: last_failure.map_or_else(
                || String::from("engine does not report a cgroups version"),
                |err| err.to_string(),
            ),
        })
    }
}

/// Prober for Docker.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerProber;

impl SystemInfoProber for DockerProber {
    fn templates(&self) -> &'static [&'static str] {
        &["{{.CgroupVersion}}"]
    }
}

/// Prober for Podman, covering both historical field spellings.
#[derive(Debug, Clone, Copy, Default)]
pub struct PodmanProber;

impl SystemInfoProber for PodmanProber {
    fn templates(&self) -> &'static [&'static str] {
        &["{{.Host.CgroupsVersion}}", "{{.Host.CGroupsVersion}}"]
    }
}

/// Returns the prober matching `kind`.
#[must_use]
pub fn prober_for(kind: EngineKind) -> Box<dyn SystemInfoProber> {
    match kind {
        EngineKind::Docker => Box::new(DockerProber),
        EngineKind::Podman => Box::new(PodmanProber),
    }
}

/// Probes `engine` and returns the cgroup parent for its hierarchy.
///
/// # Errors
///
/// Returns [`ContainerError::UnsupportedRuntime`] when the hierarchy cannot
/// be determined.
pub fn probe_cgroup_parent(
    engine: &dyn ContainerEngine,
    prober: &dyn SystemInfoProber,
) -> Result<CgroupParent, ContainerError> {
    let version = prober.cgroups_version(engine)?;
    debug!(target: PROBE_TARGET, ?version, "probed cgroups version");
    Ok(version.parent())
}
