//! Worker identities, image revisions and per-invocation worker options.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ValueEnum;
use pernosco_config::EngineKind;
use pernosco_container::{ImageReference, UserMapping};
use serde::Deserialize;

use crate::errors::AppError;

/// Revision metadata shipped with the launcher.
const EMBEDDED_METADATA: &str = include_str!("../metadata.json");

/// The two Pernosco workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Worker {
    /// Indexes recorded traces into a database.
    DbBuilder,
    /// Serves indexed traces to the debugger front end.
    #[value(name = "appserver")]
    AppServer,
}

impl Worker {
    pub(crate) const ALL: [Self; 2] = [Self::DbBuilder, Self::AppServer];

    /// Repository name under the configured registry.
    pub(crate) const fn repository(self) -> &'static str {
        match self {
            Self::DbBuilder => "db-builder",
            Self::AppServer => "appserver",
        }
    }

    /// Prefix for generated container names.
    pub(crate) const fn name_prefix(self) -> &'static str {
        match self {
            Self::DbBuilder => "pernosco-db-builder",
            Self::AppServer => "pernosco-appserver",
        }
    }
}

/// Image revisions for both workers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct Metadata {
    db_builder_revision: String,
    appserver_revision: String,
}

impl Metadata {
    /// Loads the override at `path`, or the embedded metadata.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self, AppError> {
        match path {
            Some(file) => {
                let contents = fs::read_to_string(file).map_err(|source| AppError::ReadMetadata {
                    path: file.to_path_buf(),
                    source,
                })?;
                Self::parse(&contents, &file.display().to_string())
            }
            None => Self::parse(EMBEDDED_METADATA, "embedded metadata"),
        }
    }

    fn parse(contents: &str, origin: &str) -> Result<Self, AppError> {
        serde_json::from_str(contents).map_err(|source| AppError::ParseMetadata {
            origin: origin.to_owned(),
            source,
        })
    }

    pub(crate) fn revision(&self, worker: Worker) -> &str {
        match worker {
            Worker::DbBuilder => &self.db_builder_revision,
            Worker::AppServer => &self.appserver_revision,
        }
    }
}

/// Fully qualified image references for both workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkerImages {
    db_builder: ImageReference,
    appserver: ImageReference,
}

impl WorkerImages {
    pub(crate) fn resolve(registry: &str, metadata: &Metadata) -> Self {
        let reference = |worker: Worker| {
            ImageReference::new(format!(
                "{}/{}:{}",
                registry.trim_end_matches('/'),
                worker.repository(),
                metadata.revision(worker)
            ))
        };
        Self {
            db_builder: reference(Worker::DbBuilder),
            appserver: reference(Worker::AppServer),
        }
    }

    pub(crate) const fn image(&self, worker: Worker) -> &ImageReference {
        match worker {
            Worker::DbBuilder => &self.db_builder,
            Worker::AppServer => &self.appserver,
        }
    }

    pub(crate) fn all(&self) -> [&ImageReference; 2] {
        Worker::ALL.map(|worker| self.image(worker))
    }
}

/// Parsed `--log LEVEL[:FILE]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkerLogging {
    level: String,
    file: Option<PathBuf>,
}

impl WorkerLogging {
    /// Filter forwarded to the worker as `RUST_LOG`.
    pub(crate) fn level(&self) -> &str {
        &self.level
    }

    /// File receiving every worker line, if requested.
    pub(crate) fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}

impl FromStr for WorkerLogging {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (level, file) = match text.split_once(':') {
            Some((level, file)) if !file.is_empty() => (level, Some(PathBuf::from(file))),
            Some(_) => return Err(format!("missing log file after ':' in {text:?}")),
            None => (text, None),
        };
        if level.is_empty() {
            return Err(String::from("log level must not be empty"));
        }
        Ok(Self {
            level: level.to_owned(),
            file,
        })
    }
}

/// User mapping applied when `--user` is absent.
///
/// Docker runs the worker as the invoking user's effective ids; rootless
/// Podman maps the invoking user through its own user namespace.
pub(crate) fn default_user(kind: EngineKind) -> UserMapping {
    match kind {
        EngineKind::Docker => effective_ids(),
        EngineKind::Podman => UserMapping::KeepId,
    }
}

#[cfg(unix)]
fn effective_ids() -> UserMapping {
    // SAFETY: geteuid and getegid cannot fail and touch no memory.
    let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
    UserMapping::id(uid, Some(gid))
}

#[cfg(not(unix))]
fn effective_ids() -> UserMapping {
    UserMapping::KeepId
}
