//! Command-line runtime for the `pernosco` launcher.
//!
//! The launcher parses its command line, loads configuration, and drives the
//! db-builder and appserver workers through `pernosco_container`. The runtime
//! can be exercised from the binary entrypoint or from tests where the
//! configuration loader and IO streams are substituted.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use pernosco_config::Config;
use pernosco_container::{CancellationToken, CliEngine, ProcessOutcome};
use tracing::debug;

mod cli;
mod commands;
mod config;
mod errors;
mod runtime_utils;
mod session;
pub mod telemetry;
mod worker;

use cli::Cli;
use commands::{Runtime, WorkerOptions};
use config::{ConfigArgumentSplit, ConfigLoader, OrthoConfigLoader, split_config_arguments};
use errors::AppError;
use runtime_utils::{exit_code_from_error, exit_code_from_outcome};
use session::HelperLogin;

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in sync with the fields of `pernosco_config::Config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--engine",
    "--log-filter",
    "--log-format",
    "--registry",
    "--metadata-path",
    "--isolated-network",
    "--login-command",
    "--login-username",
];

/// Bundles the IO streams provided to the CLI runtime.
pub(crate) struct IoStreams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> IoStreams<'a, W, E> {
    pub(crate) fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

struct CliRunner<'a, W: Write, E: Write, L: ConfigLoader> {
    io: &'a mut IoStreams<'a, W, E>,
    loader: &'a L,
}

impl<'a, W, E, L> CliRunner<'a, W, E, L>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    fn new(io: &'a mut IoStreams<'a, W, E>, loader: &'a L) -> Self {
        Self { io, loader }
    }

    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        let split = split_config_arguments(&args);
        let cli_arguments = prepare_cli_arguments(&args, &split);

        let result = Cli::try_parse_from(cli_arguments)
            .map_err(AppError::CliUsage)
            .and_then(|cli| {
                self.loader
                    .load(&split.config_arguments)
                    .map(|config| (cli, config))
            })
            .and_then(|(cli, config)| self.execute(&cli, &config));

        match result {
            Ok(outcome) => exit_code_from_outcome(outcome),
            Err(error) => {
                self.report(&error);
                exit_code_from_error(&error)
            }
        }
    }

    fn execute(&mut self, cli: &Cli, config: &Config) -> Result<ProcessOutcome, AppError> {
        telemetry::initialise(config)?;
        debug!(
            target: "pernosco_cli",
            engine = %config.engine(),
            registry = config.registry(),
            "configuration loaded"
        );

        let engine = CliEngine::new(config.engine()).with_echo(cli.trace_commands);
        let login = HelperLogin::from_config(&engine, config);
        let token = CancellationToken::new();
        token
            .install_interrupt_handler()
            .map_err(AppError::InstallSignalHandler)?;

        let runtime = Runtime {
            config,
            engine: &engine,
            images: &engine,
            login: &login,
            token,
        };
        commands::execute(
            &cli.command,
            &WorkerOptions::from(cli),
            &runtime,
            &mut *self.io.stdout,
            &mut *self.io.stderr,
        )
    }

    fn report(&mut self, error: &AppError) {
        match error {
            // Help and version requests are ordinary output.
            AppError::CliUsage(usage) if !usage.use_stderr() => {
                let _ = write!(self.io.stdout, "{}", usage.render());
            }
            AppError::CliUsage(usage) => {
                let _ = write!(self.io.stderr, "{}", usage.render());
            }
            _ => {
                let _ = writeln!(self.io.stderr, "pernosco: {error}");
            }
        }
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let mut io = IoStreams::new(stdout, stderr);
    run_with_loader(args, &mut io, &OrthoConfigLoader)
}

/// Runs the CLI with a custom configuration loader.
#[must_use]
pub(crate) fn run_with_loader<'a, I, W, E, L>(
    args: I,
    io: &'a mut IoStreams<'a, W, E>,
    loader: &'a L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    CliRunner::new(io, loader).run(args)
}

fn prepare_cli_arguments(args: &[OsString], split: &ConfigArgumentSplit) -> Vec<OsString> {
    let mut cli_arguments: Vec<OsString> = args.first().cloned().into_iter().collect();
    if let Some(rest) = args.get(split.command_start..) {
        cli_arguments.extend(rest.iter().cloned());
    }
    cli_arguments
}
