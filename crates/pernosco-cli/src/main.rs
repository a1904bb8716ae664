//! CLI entrypoint for the `pernosco` launcher.
//!
//! The binary delegates to [`pernosco_cli::run`], which loads configuration,
//! parses the command line, and supervises the requested worker.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    pernosco_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
