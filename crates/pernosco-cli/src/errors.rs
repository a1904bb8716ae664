//! Error types for the CLI runtime.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use pernosco_container::{ContainerError, EngineError};
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to install interrupt handler: {0}")]
    InstallSignalHandler(io::Error),
    #[error("failed to read metadata {path:?}: {source}")]
    ReadMetadata { path: PathBuf, source: io::Error },
    #[error("invalid metadata in {origin}: {source}")]
    ParseMetadata {
        origin: String,
        source: serde_json::Error,
    },
    #[error("no trace directory given and no rr data directory could be located")]
    NoDefaultTraceDir,
    #[error("cannot use {path:?}: {source}")]
    ResolvePath { path: PathBuf, source: io::Error },
    #[error("path {path:?} is not valid UTF-8")]
    NonUtf8Path { path: PathBuf },
    #[error("failed to open log file {path:?}: {source}")]
    OpenLogFile { path: PathBuf, source: io::Error },
    #[error("failed to run login helper `{command}`: {source}")]
    LoginHelper { command: String, source: io::Error },
    #[error("login helper `{command}` failed with status {status:?}")]
    LoginHelperFailed {
        command: String,
        status: Option<i32>,
    },
    #[error("registry login failed: {0}")]
    Login(EngineError),
    #[error("failed to {action} image {image}: {source}")]
    Image {
        action: &'static str,
        image: String,
        source: EngineError,
    },
    #[error("image {image} is not present locally and pulling is disabled")]
    MissingImage { image: String },
    #[error("failed to write output: {0}")]
    WriteOutput(io::Error),
    #[error(transparent)]
    Container(#[from] ContainerError),
}
