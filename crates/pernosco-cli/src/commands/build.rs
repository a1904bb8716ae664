//! `pernosco build`: index a recorded trace with the db-builder.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use pernosco_container::{MountIntent, NetworkPolicy, ProcessOutcome};

use super::Invocation;
use crate::cli::BuildArgs;
use crate::errors::AppError;
use crate::worker::Worker;

/// Variable rr uses to relocate its trace directory.
const RR_TRACE_DIR_VARIABLE: &str = "_RR_TRACE_DIR";

/// Symlink rr maintains to the most recent recording.
const LATEST_TRACE: &str = "latest-trace";

/// rr's latest trace: `$_RR_TRACE_DIR/latest-trace`, else
/// `<data dir>/rr/latest-trace`.
pub(crate) fn default_trace_dir(rr_trace_dir: Option<OsString>, data_dir: Option<PathBuf>) -> Option<PathBuf> {
    rr_trace_dir
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| data_dir.map(|dir| dir.join("rr")))
        .map(|dir| dir.join(LATEST_TRACE))
}

/// Canonicalises `path` so the worker sees the same absolute location.
pub(super) fn resolve_dir(path: &Path) -> Result<PathBuf, AppError> {
    path.canonicalize().map_err(|source| AppError::ResolvePath {
        path: path.to_path_buf(),
        source,
    })
}

pub(super) fn path_text(path: &Path) -> Result<String, AppError> {
    path.to_str()
        .map(str::to_owned)
        .ok_or_else(|| AppError::NonUtf8Path {
            path: path.to_path_buf(),
        })
}

pub(super) fn run<W: Write, E: Write>(
    invocation: &mut Invocation<'_, '_>,
    args: &BuildArgs,
    stdout: &mut W,
    stderr: &mut E,
) -> Result<ProcessOutcome, AppError> {
    let requested = match &args.trace_dir {
        Some(dir) => dir.clone(),
        None => default_trace_dir(std::env::var_os(RR_TRACE_DIR_VARIABLE), dirs::data_dir())
            .ok_or(AppError::NoDefaultTraceDir)?,
    };
    let trace_dir = resolve_dir(&requested)?;
    let trace_text = path_text(&trace_dir)?;

    invocation.ensure_images(&[Worker::DbBuilder])?;

    let mut request = invocation
        .request(Worker::DbBuilder)
        .network(NetworkPolicy::None)
        .mount(MountIntent::read_write(&trace_dir, &trace_dir))
        .arg(trace_text);
    if args.check_trace {
        request = request.arg("--check-trace");
    }
    request = request.args(args.worker_args.iter().cloned());
    for (key, value) in &args.env {
        request = request.env(key.as_str(), value.as_str());
    }

    invocation.supervise(request, stdout, stderr, |_, _| Ok(()))
}
