use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Container engine families the launcher knows how to drive.
///
/// Both engines accept the same `run`/`logs`/`wait` command surface but
/// differ in how they report system facts and how users are mapped into the
/// container, so the rest of the workspace branches on this value rather than
/// on the binary name.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum EngineKind {
    /// The Docker engine (`docker` CLI).
    #[default]
    Docker,
    /// The Podman engine (`podman` CLI).
    Podman,
}

impl EngineKind {
    /// Name of the executable that fronts this engine.
    #[must_use]
    pub const fn program(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

/// Errors encountered while parsing an [`EngineKind`] from text.
pub type EngineKindParseError = strum::ParseError;
