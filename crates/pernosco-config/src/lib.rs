//! Shared configuration for the `pernosco` launcher.
//!
//! [`Config`] is loaded through `ortho_config`, layering (lowest to highest
//! precedence) built-in defaults, a TOML configuration file, `PERNOSCO_*`
//! environment variables, and command-line flags. The values here describe
//! the launcher itself: which container engine to drive, where worker images
//! live, and how the launcher reports its own diagnostics. Per-invocation
//! choices such as mounts or the worker's log level belong to the CLI.

use std::path::{Path, PathBuf};

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod defaults;
mod engine;
mod logging;

pub use defaults::{
    DEFAULT_ISOLATED_NETWORK, DEFAULT_LOG_FILTER, DEFAULT_LOGIN_USERNAME, DEFAULT_REGISTRY,
    default_engine,
    default_isolated_network_string, default_log_filter, default_log_filter_string,
    default_log_format, default_registry_string,
};
pub use engine::{EngineKind, EngineKindParseError};
pub use logging::{LogFormat, LogFormatParseError};

/// Launcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PERNOSCO")]
pub struct Config {
    /// Container engine used to run the workers.
    #[serde(default = "default_engine")]
    pub engine: EngineKind,
    /// `tracing` filter applied to launcher diagnostics.
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Output format for launcher diagnostics.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Repository prefix for the worker images.
    #[serde(default = "default_registry_string")]
    pub registry: String,
    /// Optional replacement for the embedded revision metadata.
    #[serde(default)]
    pub metadata_path: Option<PathBuf>,
    /// Name of the internal network used by inbound-serving workers.
    #[serde(default = "default_isolated_network_string")]
    pub isolated_network: String,
    /// Shell command printing a registry password on stdout.
    #[serde(default)]
    pub login_command: Option<String>,
    /// User name presented to the registry alongside the helper's password.
    #[serde(default)]
    pub login_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            registry: default_registry_string(),
            metadata_path: None,
            isolated_network: default_isolated_network_string(),
            login_command: None,
            login_username: None,
        }
    }
}

impl Config {
    /// Container engine used to run the workers.
    #[must_use]
    pub const fn engine(&self) -> EngineKind {
        self.engine
    }

    /// Filter expression for launcher diagnostics.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format for launcher diagnostics.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Repository prefix for the worker images.
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Path to a metadata file overriding the embedded revisions.
    #[must_use]
    pub fn metadata_path(&self) -> Option<&Path> {
        self.metadata_path.as_deref()
    }

    /// Name of the internal network used by inbound-serving workers.
    #[must_use]
    pub fn isolated_network(&self) -> &str {
        &self.isolated_network
    }

    /// Registry login helper, when one is configured.
    #[must_use]
    pub fn login_command(&self) -> Option<&str> {
        self.login_command.as_deref()
    }

    /// User name for registry login.
    #[must_use]
    pub fn login_username(&self) -> &str {
        self.login_username.as_deref().unwrap_or(DEFAULT_LOGIN_USERNAME)
    }
}
