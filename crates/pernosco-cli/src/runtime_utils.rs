//! Exit status mapping for the CLI entrypoint.

use std::process::ExitCode;

use pernosco_container::ProcessOutcome;

use crate::errors::AppError;

/// Status reported when the launcher itself could not start, confine or
/// observe a worker.
pub(crate) const LAUNCHER_FAILURE: u8 = 125;

pub(crate) fn exit_code_from_outcome(outcome: ProcessOutcome) -> ExitCode {
    outcome.exit_code()
}

pub(crate) fn exit_code_from_error(error: &AppError) -> ExitCode {
    match error {
        AppError::CliUsage(usage) => exit_code_from_status(usage.exit_code()),
        _ => ExitCode::from(LAUNCHER_FAILURE),
    }
}

fn exit_code_from_status(status: i32) -> ExitCode {
    u8::try_from(status).map_or(ExitCode::FAILURE, ExitCode::from)
}
