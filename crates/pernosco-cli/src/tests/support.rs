//! Test support for launcher command coverage.
//!
//! Supplies an in-memory image store, a scripted registry login and a
//! harness that runs parsed commands against a
//! [`FakeEngine`](pernosco_container::testing::FakeEngine).

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use clap::Parser;
use mockall::mock;
use pernosco_config::Config;
use pernosco_container::testing::FakeEngine;
use pernosco_container::{CancellationToken, EngineError, ImageReference, ProcessOutcome};

use crate::cli::Cli;
use crate::commands::{Runtime, WorkerOptions, execute};
use crate::config::ConfigLoader;
use crate::errors::AppError;
use crate::session::{ImageStore, RegistryLogin};

mock! {
    pub(super) Login {}

    impl RegistryLogin for Login {
        fn login(&self) -> Result<(), AppError>;
    }
}

/// A login that always succeeds, for tests that do not count logins.
pub(super) fn permissive_login() -> MockLogin {
    let mut login = MockLogin::new();
    login.expect_login().returning(|| Ok(()));
    login
}

pub(super) struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    pub(super) fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

/// One recorded image store request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum ImageCall {
    Exists(String),
    Pull(String),
    Save { images: Vec<String>, file: PathBuf },
    Load(PathBuf),
}

#[derive(Debug, Default)]
struct ImageState {
    present: BTreeSet<String>,
    calls: Vec<ImageCall>,
}

/// Image store that records requests and tracks which images are local.
#[derive(Debug, Default)]
pub(super) struct FakeImages {
    state: Mutex<ImageState>,
    fail_pulls: bool,
}

impl FakeImages {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Marks every image as already present.
    pub(super) fn with_all_present(self, images: &[&str]) -> Self {
        self.lock()
            .present
            .extend(images.iter().map(|image| (*image).to_owned()));
        self
    }

    pub(super) fn failing_pulls(mut self) -> Self {
        self.fail_pulls = true;
        self
    }

    pub(super) fn calls(&self) -> Vec<ImageCall> {
        self.lock().calls.clone()
    }

    pub(super) fn pulled(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ImageCall::Pull(image) => Some(image),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, ImageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ImageStore for FakeImages {
    fn image_exists(&self, image: &ImageReference) -> Result<bool, EngineError> {
        let mut state = self.lock();
        state.calls.push(ImageCall::Exists(image.to_string()));
        Ok(state.present.contains(image.as_str()))
    }

    fn pull(&self, image: &ImageReference) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.push(ImageCall::Pull(image.to_string()));
        if self.fail_pulls {
            return Err(EngineError::failed(
                format!("docker pull {image}"),
                Some(1),
                b"manifest unknown",
            ));
        }
        state.present.insert(image.to_string());
        Ok(())
    }

    fn save(&self, images: &[&ImageReference], file: &Path) -> Result<(), EngineError> {
        self.lock().calls.push(ImageCall::Save {
            images: images.iter().map(ToString::to_string).collect(),
            file: file.to_path_buf(),
        });
        Ok(())
    }

    fn load(&self, file: &Path) -> Result<(), EngineError> {
        self.lock().calls.push(ImageCall::Load(file.to_path_buf()));
        Ok(())
    }
}

/// Captured result of one command run.
pub(super) struct CommandRun {
    pub(super) result: Result<ProcessOutcome, AppError>,
    pub(super) stdout: String,
    pub(super) stderr: String,
}

/// Parses `args` and executes the command against the given doubles.
pub(super) fn run_command(
    args: &[&str],
    config: &Config,
    engine: &FakeEngine,
    images: &FakeImages,
    login: &MockLogin,
) -> CommandRun {
    let cli = Cli::try_parse_from(std::iter::once("pernosco").chain(args.iter().copied()))
        .expect("command line parses");
    let runtime = Runtime {
        config,
        engine,
        images,
        login,
        token: CancellationToken::new(),
    };
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let result = execute(
        &cli.command,
        &WorkerOptions::from(&cli),
        &runtime,
        &mut stdout,
        &mut stderr,
    );
    CommandRun {
        result,
        stdout: String::from_utf8(stdout).expect("stdout utf8"),
        stderr: String::from_utf8(stderr).expect("stderr utf8"),
    }
}

/// Image references the embedded metadata resolves under the default
/// registry.
pub(super) fn default_images() -> [String; 2] {
    let metadata = crate::worker::Metadata::load(None).expect("embedded metadata");
    let images = crate::worker::WorkerImages::resolve(pernosco_config::DEFAULT_REGISTRY, &metadata);
    images.all().map(ToString::to_string)
}

/// Canonical text of a temporary directory.
pub(super) fn canonical(path: &Path) -> String {
    path.canonicalize()
        .expect("canonical path")
        .to_str()
        .expect("utf8 path")
        .to_owned()
}
