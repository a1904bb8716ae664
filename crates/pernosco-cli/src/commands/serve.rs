//! `pernosco serve`: expose an indexed trace through the appserver.

use std::io::Write;

use pernosco_container::{ContainerError, MountIntent, NetworkPolicy, ProcessOutcome};

use super::Invocation;
use super::build::{path_text, resolve_dir};
use crate::cli::ServeArgs;
use crate::errors::AppError;
use crate::worker::Worker;

pub(super) fn run<W: Write, E: Write>(
    invocation: &mut Invocation<'_, '_>,
    args: &ServeArgs,
    stdout: &mut W,
    stderr: &mut E,
) -> Result<ProcessOutcome, AppError> {
    let trace_dir = resolve_dir(&args.trace_dir)?;
    let storage_dir = resolve_dir(&args.storage)?;

    invocation.ensure_images(&[Worker::AppServer])?;

    let network = invocation.runtime.config.isolated_network().to_owned();
    let port = args.port.to_string();
    let mut request = invocation
        .request(Worker::AppServer)
        .network(NetworkPolicy::isolated(network.as_str()))
        .mount(MountIntent::read_only(&trace_dir, &trace_dir))
        .mount(MountIntent::read_write(&storage_dir, &storage_dir));
    for source in &args.sources {
        let host = resolve_dir(&source.host_path)?;
        request = request.mount(MountIntent::read_only(host, &source.container_path));
    }
    request = request.args([
        String::from("--port"),
        port,
        String::from("--storage"),
        path_text(&storage_dir)?,
        path_text(&trace_dir)?,
    ]);

    let engine = invocation.runtime.engine;
    let listen_port = args.port;
    invocation.supervise(request, stdout, stderr, |handle, router| {
        let address = engine
            .address(handle, &network)
            .map_err(|source| ContainerError::Inspect {
                name: handle.name().to_owned(),
                source,
            })?;
        router
            .announce(&format!("Appserver running at http://{address}:{listen_port}/"))
            .map_err(ContainerError::LogForward)
    })
}
