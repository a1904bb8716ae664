//! `pernosco manifest`: read a file out of a worker image.

use std::io::Write;

use pernosco_container::{Composer, Launcher, NetworkPolicy, ProcessOutcome};

use super::Invocation;
use crate::errors::AppError;
use crate::worker::Worker;

pub(super) fn run<W: Write>(
    invocation: &mut Invocation<'_, '_>,
    worker: Worker,
    path: &str,
    stdout: &mut W,
) -> Result<ProcessOutcome, AppError> {
    invocation.ensure_images(&[worker])?;

    let engine = invocation.runtime.engine;
    let request = invocation
        .request(worker)
        .network(NetworkPolicy::None)
        .entrypoint("cat")
        .arg(path);
    let descriptor = Composer::new(engine).compose(request)?;
    let contents = Launcher::new(engine).run_captured(&descriptor)?;

    stdout.write_all(&contents).map_err(AppError::WriteOutput)?;
    stdout.flush().map_err(AppError::WriteOutput)?;
    Ok(ProcessOutcome::Success)
}
