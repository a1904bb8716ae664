//! Layering tests for `Config::load_from_iter`.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use pernosco_config::{Config, EngineKind, LogFormat};
use tempfile::TempDir;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serialises environment mutation and restores prior values on drop.
struct EnvScope {
    previous: Vec<(&'static str, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvScope {
    fn new() -> Self {
        let guard = ENV_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Self {
            previous: Vec::new(),
            _guard: guard,
        }
    }

    fn set(&mut self, key: &'static str, value: impl AsRef<OsStr>) {
        self.previous.push((key, std::env::var_os(key)));
        // Environment mutation is `unsafe` on edition 2024; the scope holds the
        // mutex so no other test observes the intermediate state.
        unsafe { std::env::set_var(key, value) };
    }

    fn clear(&mut self, key: &'static str) {
        self.previous.push((key, std::env::var_os(key)));
        unsafe { std::env::remove_var(key) };
    }
}

impl Drop for EnvScope {
    fn drop(&mut self) {
        while let Some((key, value)) = self.previous.pop() {
            match value {
                Some(value) => unsafe { std::env::set_var(key, value) },
                None => unsafe { std::env::remove_var(key) },
            }
        }
    }
}

fn write_config(dir: &Path, contents: &str) -> OsString {
    let path = dir.join("pernosco.toml");
    fs::write(&path, contents).expect("write configuration file");
    path.into_os_string()
}

fn args(extra: &[&OsStr]) -> Vec<OsString> {
    let mut args = vec![OsString::from("pernosco")];
    args.extend(extra.iter().map(|value| value.to_os_string()));
    args
}

#[test]
fn defaults_apply_without_sources() {
    let mut env = EnvScope::new();
    env.clear("PERNOSCO_ENGINE");
    env.clear("PERNOSCO_CONFIG_PATH");
    let config = Config::load_from_iter(args(&[])).expect("load defaults");
    assert_eq!(config.engine(), EngineKind::Docker);
    assert_eq!(config.isolated_network(), "pernosco-isolated");
}

#[test]
fn file_values_are_loaded() {
    let mut env = EnvScope::new();
    env.clear("PERNOSCO_ENGINE");
    env.clear("PERNOSCO_LOG_FORMAT");
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(
        dir.path(),
        "engine = \"podman\"\nlog_format = \"json\"\nregistry = \"registry.example/pernosco\"\n",
    );
    let config = Config::load_from_iter(args(&[OsStr::new("--config-path"), &path]))
        .expect("load file configuration");
    assert_eq!(config.engine(), EngineKind::Podman);
    assert_eq!(config.log_format(), LogFormat::Json);
    assert_eq!(config.registry(), "registry.example/pernosco");
}

#[test]
fn environment_overrides_file() {
    let mut env = EnvScope::new();
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(dir.path(), "engine = \"podman\"\n");
    env.set("PERNOSCO_ENGINE", "docker");
    let config = Config::load_from_iter(args(&[OsStr::new("--config-path"), &path]))
        .expect("load layered configuration");
    assert_eq!(config.engine(), EngineKind::Docker);
}

#[test]
fn cli_overrides_environment() {
    let mut env = EnvScope::new();
    env.set("PERNOSCO_ISOLATED_NETWORK", "from-env");
    let config = Config::load_from_iter(args(&[
        OsStr::new("--isolated-network"),
        OsStr::new("from-cli"),
    ]))
    .expect("load layered configuration");
    assert_eq!(config.isolated_network(), "from-cli");
}

#[test]
fn login_helper_is_read_from_environment() {
    let mut env = EnvScope::new();
    env.clear("PERNOSCO_LOGIN_USERNAME");
    env.set("PERNOSCO_LOGIN_COMMAND", "aws ecr get-login-password");
    let config = Config::load_from_iter(args(&[])).expect("load configuration");
    assert_eq!(config.login_command(), Some("aws ecr get-login-password"));
    assert_eq!(config.login_username(), "AWS");
}

#[test]
fn malformed_file_is_reported() {
    let _env = EnvScope::new();
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(dir.path(), "engine = [\n");
    let result = Config::load_from_iter(args(&[OsStr::new("--config-path"), &path]));
    assert!(result.is_err(), "malformed TOML must fail to load");
}
