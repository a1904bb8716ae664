//! CLI argument definitions for the `pernosco` launcher.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use pernosco_container::UserMapping;

use crate::worker::{Worker, WorkerLogging};

/// Default port the appserver listens on.
pub(crate) const DEFAULT_PORT: u16 = 3000;

/// Runs Pernosco's db-builder and appserver workers in confined containers.
#[derive(Parser, Debug)]
#[command(name = "pernosco", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Echoes every container engine command before running it.
    #[arg(short = 'x', long = "trace-commands")]
    pub(crate) trace_commands: bool,
    /// Worker log level, optionally followed by a file receiving all output.
    #[arg(long = "log", value_name = "LEVEL[:FILE]")]
    pub(crate) log: Option<WorkerLogging>,
    /// User the workers run as (defaults to the invoking user).
    #[arg(long, value_name = "UID[:GID]")]
    pub(crate) user: Option<UserMapping>,
    /// Never pulls missing worker images.
    #[arg(long)]
    pub(crate) no_pull: bool,
    /// The action to perform.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Launcher subcommands.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Pulls both worker images.
    Pull,
    /// Writes both worker images to an archive.
    SaveContainers {
        /// Archive to create.
        file: PathBuf,
    },
    /// Loads worker images from an archive.
    LoadContainers {
        /// Archive to read.
        file: PathBuf,
    },
    /// Indexes a recorded trace with the db-builder.
    Build(BuildArgs),
    /// Serves an indexed trace with the appserver.
    Serve(ServeArgs),
    /// Prints a file from a worker image.
    Manifest {
        /// Worker image to read from.
        #[arg(value_enum)]
        worker: Worker,
        /// Absolute path of the file inside the image.
        path: String,
    },
}

/// Arguments for `pernosco build`.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct BuildArgs {
    /// Extra environment variable for the db-builder.
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub(crate) env: Vec<(String, String)>,
    /// Asks the db-builder to verify the trace before indexing.
    #[arg(long)]
    pub(crate) check_trace: bool,
    /// Trace directory (defaults to rr's latest trace).
    pub(crate) trace_dir: Option<PathBuf>,
    /// Arguments passed through to the db-builder.
    #[arg(last = true, value_name = "WORKER_ARGS")]
    pub(crate) worker_args: Vec<String>,
}

/// Arguments for `pernosco serve`.
#[derive(Args, Debug, Clone)]
pub(crate) struct ServeArgs {
    /// Directory where the appserver keeps its state.
    #[arg(long, value_name = "DIR")]
    pub(crate) storage: PathBuf,
    /// Source tree to expose read-only, optionally read from another host path.
    #[arg(long = "sources", value_name = "PATH[=HOST_PATH]")]
    pub(crate) sources: Vec<SourceMapping>,
    /// Port the appserver listens on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub(crate) port: u16,
    /// Indexed trace directory.
    pub(crate) trace_dir: PathBuf,
}

/// Source directory exposed to the appserver.
///
/// `PATH` is where the worker expects the sources; `HOST_PATH`, when given,
/// is where they actually live on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SourceMapping {
    pub(crate) container_path: PathBuf,
    pub(crate) host_path: PathBuf,
}

impl FromStr for SourceMapping {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (container, host) = text.split_once('=').unwrap_or((text, text));
        if container.is_empty() || host.is_empty() {
            return Err(format!("expected PATH[=HOST_PATH], got {text:?}"));
        }
        Ok(Self {
            container_path: PathBuf::from(container),
            host_path: PathBuf::from(host),
        })
    }
}

fn parse_env_pair(text: &str) -> Result<(String, String), String> {
    match text.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got {text:?}")),
    }
}
