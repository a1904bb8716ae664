//! [`ContainerEngine`] implementation that shells out to `docker` or `podman`.

use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::process::{Command, Output, Stdio};

use pernosco_config::EngineKind;
use tracing::{debug, info};

use super::logs::LogStream;
use super::syntax::run_arguments;
use super::{ContainerEngine, ContainerHandle};
use crate::descriptor::ContainerDescriptor;
use crate::error::EngineError;

/// Tracing target for engine invocations.
const ENGINE_TARGET: &str = "pernosco_container::engine";

/// Placeholder Go templates print for absent fields.
const NO_VALUE: &str = "<no value>";

/// Drives a container engine through its command-line interface.
#[derive(Debug, Clone)]
pub struct CliEngine {
    kind: EngineKind,
    program: OsString,
    echo: bool,
}

impl CliEngine {
    /// Uses the engine binary found on `PATH`.
    #[must_use]
    pub fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            program: OsString::from(kind.program()),
            echo: false,
        }
    }

    /// Overrides the binary used to reach the engine.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    /// Logs every engine command at `info` instead of `debug`.
    #[must_use]
    pub const fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Runs an engine subcommand outside the container lifecycle, such as
    /// image transfer, and returns its standard output.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the engine cannot be started or exits
    /// unsuccessfully.
    pub fn execute<I, S>(&self, args: I) -> Result<Vec<u8>, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.output(args).map(|(stdout, _)| stdout)
    }

    /// Like [`CliEngine::execute`], feeding `input` to the engine's stdin.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the engine cannot be started, the
    /// input cannot be written, or the engine exits unsuccessfully.
    pub fn execute_with_input<I, S>(&self, args: I, input: &[u8]) -> Result<Vec<u8>, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (mut command, rendered) = self.command(args);
        let spawn_failed = |source| EngineError::Spawn {
            command: rendered.clone(),
            source,
        };
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_failed)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).map_err(spawn_failed)?;
        }
        let Output {
            status,
            stdout,
            stderr,
        } = child.wait_with_output().map_err(spawn_failed)?;
        if status.success() {
            Ok(stdout)
        } else {
            Err(EngineError::failed(rendered, status.code(), &stderr))
        }
    }

    fn command<I, S>(&self, args: I) -> (Command, String)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let owned: Vec<OsString> = args.into_iter().map(|arg| arg.as_ref().to_owned()).collect();
        let rendered = render_command(&self.program, &owned);
        if self.echo {
            info!(target: ENGINE_TARGET, command = %rendered, "running engine command");
        } else {
            debug!(target: ENGINE_TARGET, command = %rendered, "running engine command");
        }
        let mut command = Command::new(&self.program);
        command.args(&owned).stdin(Stdio::null());
        (command, rendered)
    }

    /// Runs the command to completion and returns its stdout with the
    /// rendered command line.
    fn output<I, S>(&self, args: I) -> Result<(Vec<u8>, String), EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (mut command, rendered) = self.command(args);
        let Output {
            status,
            stdout,
            stderr,
        } = match command.output() {
            Ok(output) => output,
            Err(source) => {
                return Err(EngineError::Spawn {
                    command: rendered,
                    source,
                });
            }
        };
        if status.success() {
            Ok((stdout, rendered))
        } else {
            Err(EngineError::failed(rendered, status.code(), &stderr))
        }
    }

    fn text<I, S>(&self, args: I) -> Result<(String, String), EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (stdout, rendered) = self.output(args)?;
        Ok((String::from_utf8_lossy(&stdout).trim().to_owned(), rendered))
    }
}

impl ContainerEngine for CliEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn system_info(&self, template: &str) -> Result<String, EngineError> {
        self.text(["info", "--format", template])
            .map(|(output, _)| output)
    }

    fn network_exists(&self, name: &str) -> Result<bool, EngineError> {
        match self.output(["network", "inspect", name]) {
            Ok(_) => Ok(true),
            Err(EngineError::Failed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn create_internal_network(&self, name: &str) -> Result<(), EngineError> {
        self.output(["network", "create", "--internal", name])
            .map(drop)
    }

    fn run_detached(
        &self,
        descriptor: &ContainerDescriptor,
        auto_remove: bool,
    ) -> Result<ContainerHandle, EngineError> {
        let (output, _) = self.text(run_arguments(descriptor, true, auto_remove))?;
        let id = output.lines().last().map(str::to_owned).filter(|value| !value.is_empty());
        Ok(ContainerHandle::new(descriptor.name().as_str(), id))
    }

    fn run_foreground(
        &self,
        descriptor: &ContainerDescriptor,
        auto_remove: bool,
    ) -> Result<Vec<u8>, EngineError> {
        self.output(run_arguments(descriptor, false, auto_remove))
            .map(|(stdout, _)| stdout)
    }

    fn follow_logs(&self, handle: &ContainerHandle) -> Result<LogStream, EngineError> {
        let (mut command, rendered) = self.command(["logs", "--follow", handle.name()]);
        let child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                command: rendered,
                source,
            })?;
        Ok(LogStream::from_child(child))
    }

    fn wait(&self, handle: &ContainerHandle) -> Result<i32, EngineError> {
        let (output, rendered) = self.text(["wait", handle.name()])?;
        output
            .lines()
            .last()
            .and_then(|line| line.trim().parse::<i32>().ok())
            .ok_or(EngineError::Parse {
                command: rendered,
                output,
            })
    }

    fn stop(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        self.output(["stop", handle.name()]).map(drop)
    }

    fn remove(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        self.output(["rm", "--force", "--volumes", handle.name()])
            .map(drop)
    }

    fn address(&self, handle: &ContainerHandle, network: &str) -> Result<String, EngineError> {
        let template = format!(
            "{{{{(index .NetworkSettings.Networks {network:?}).IPAddress}}}}"
        );
        let (output, rendered) = self.text(["inspect", "--format", &template, handle.name()])?;
        if output.is_empty() || output == NO_VALUE {
            return Err(EngineError::Parse {
                command: rendered,
                output,
            });
        }
        Ok(output)
    }
}

/// Renders a command line the way a POSIX shell would accept it.
///
/// Arguments made only of safe characters are left bare; everything else is
/// single-quoted.
#[must_use]
pub fn render_command<S: AsRef<OsStr>>(program: &OsStr, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .map(|arg| shell_quote(&arg.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg.chars().all(|ch| {
            ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '=' | ',' | '@' | '+')
        });
    if safe {
        arg.to_owned()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
