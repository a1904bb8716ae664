//! Launcher commands driving the confinement pipeline.

mod build;
mod images;
mod manifest;
mod serve;

use std::io::Write;

use pernosco_config::Config;
use pernosco_container::{
    CancellationToken, Composer, ContainerEngine, ContainerError, ContainerHandle, Launcher,
    LogRouter, ProcessOutcome, Supervisor, UserMapping, WorkerRequest, open_log_file,
    run_to_completion,
};

use crate::cli::{Cli, CliCommand};
use crate::errors::AppError;
use crate::session::{ImageStore, RegistryLogin, RegistrySession};
use crate::worker::{Metadata, Worker, WorkerImages, WorkerLogging, default_user};

pub(crate) use build::default_trace_dir;

/// Collaborators shared by every command.
pub(crate) struct Runtime<'a> {
    pub(crate) config: &'a Config,
    pub(crate) engine: &'a dyn ContainerEngine,
    pub(crate) images: &'a dyn ImageStore,
    pub(crate) login: &'a dyn RegistryLogin,
    pub(crate) token: CancellationToken,
}

/// Options that apply to every worker the invocation starts.
#[derive(Debug, Clone, Default)]
pub(crate) struct WorkerOptions {
    pub(crate) logging: Option<WorkerLogging>,
    pub(crate) user: Option<UserMapping>,
    pub(crate) no_pull: bool,
}

impl From<&Cli> for WorkerOptions {
    fn from(cli: &Cli) -> Self {
        Self {
            logging: cli.log.clone(),
            user: cli.user,
            no_pull: cli.no_pull,
        }
    }
}

/// Per-invocation state threaded through a command.
struct Invocation<'a, 'r> {
    runtime: &'r Runtime<'a>,
    options: &'r WorkerOptions,
    images: WorkerImages,
    session: RegistrySession,
}

impl Invocation<'_, '_> {
    fn ensure_images(&mut self, workers: &[Worker]) -> Result<(), AppError> {
        let images: Vec<_> = workers.iter().map(|worker| self.images.image(*worker)).collect();
        self.session.ensure_present(
            self.runtime.login,
            self.runtime.images,
            &images,
            self.options.no_pull,
        )
    }

    fn request(&self, worker: Worker) -> WorkerRequest {
        let user = self
            .options
            .user
            .unwrap_or_else(|| default_user(self.runtime.engine.kind()));
        let request = WorkerRequest::new(self.images.image(worker).clone(), worker.name_prefix(), user);
        match &self.options.logging {
            Some(logging) => request.log_filter(logging.level()),
            None => request,
        }
    }

    /// Composes, launches and supervises `request` to completion.
    fn supervise<W, E, F>(
        &self,
        request: WorkerRequest,
        stdout: &mut W,
        stderr: &mut E,
        on_launch: F,
    ) -> Result<ProcessOutcome, AppError>
    where
        W: Write,
        E: Write,
        F: FnOnce(&ContainerHandle, &mut LogRouter<&mut W, &mut E>) -> Result<(), ContainerError>,
    {
        let engine = self.runtime.engine;
        let descriptor = Composer::new(engine).compose(request)?;
        let mut router = LogRouter::new(stdout, stderr);
        if let Some(path) = self.options.logging.as_ref().and_then(WorkerLogging::file) {
            let file = open_log_file(path).map_err(|source| AppError::OpenLogFile {
                path: path.to_path_buf(),
                source,
            })?;
            router = router.with_log_file(Box::new(file));
        }
        let mut supervisor = Supervisor::new(engine, router, self.runtime.token.clone());
        let outcome = run_to_completion(&Launcher::new(engine), &descriptor, &mut supervisor, on_launch)?;
        Ok(outcome)
    }
}

/// Runs `command` and reports the worker's outcome.
pub(crate) fn execute<W, E>(
    command: &CliCommand,
    options: &WorkerOptions,
    runtime: &Runtime<'_>,
    stdout: &mut W,
    stderr: &mut E,
) -> Result<ProcessOutcome, AppError>
where
    W: Write,
    E: Write,
{
    let metadata = Metadata::load(runtime.config.metadata_path())?;
    let mut invocation = Invocation {
        runtime,
        options,
        images: WorkerImages::resolve(runtime.config.registry(), &metadata),
        session: RegistrySession::new(),
    };

    match command {
        CliCommand::Pull => images::pull(&mut invocation),
        CliCommand::SaveContainers { file } => images::save(&mut invocation, file),
        CliCommand::LoadContainers { file } => images::load(&invocation, file),
        CliCommand::Build(args) => build::run(&mut invocation, args, stdout, stderr),
        CliCommand::Serve(args) => serve::run(&mut invocation, args, stdout, stderr),
        CliCommand::Manifest { worker, path } => {
            manifest::run(&mut invocation, *worker, path, stdout)
        }
    }
}
