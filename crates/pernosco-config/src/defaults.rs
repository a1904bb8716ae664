use crate::engine::EngineKind;
use crate::logging::LogFormat;

/// Default log filter expression for launcher diagnostics.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Repository prefix under which the worker images are published.
pub const DEFAULT_REGISTRY: &str = "pernosco";

/// Name of the internal network joined by containers that accept inbound
/// connections.
pub const DEFAULT_ISOLATED_NETWORK: &str = "pernosco-isolated";

/// Registry user name paired with token-printing login helpers.
pub const DEFAULT_LOGIN_USERNAME: &str = "AWS";

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Default container engine.
#[must_use]
pub fn default_engine() -> EngineKind {
    EngineKind::Docker
}

/// Owned registry prefix used by serde defaults.
#[must_use]
pub fn default_registry_string() -> String {
    DEFAULT_REGISTRY.to_owned()
}

/// Owned isolated network name used by serde defaults.
#[must_use]
pub fn default_isolated_network_string() -> String {
    DEFAULT_ISOLATED_NETWORK.to_owned()
}
