//! `pull`, `save-containers` and `load-containers`.

use std::path::Path;

use pernosco_container::ProcessOutcome;
use tracing::info;

use super::Invocation;
use crate::errors::AppError;
use crate::worker::Worker;

const IMAGES_TARGET: &str = "pernosco_cli::images";

pub(super) fn pull(invocation: &mut Invocation<'_, '_>) -> Result<ProcessOutcome, AppError> {
    let images = invocation.images.all();
    invocation
        .session
        .pull(invocation.runtime.login, invocation.runtime.images, &images)?;
    Ok(ProcessOutcome::Success)
}

pub(super) fn save(invocation: &mut Invocation<'_, '_>, file: &Path) -> Result<ProcessOutcome, AppError> {
    invocation.ensure_images(&Worker::ALL)?;
    let images = invocation.images.all();
    info!(target: IMAGES_TARGET, archive = %file.display(), "saving worker images");
    invocation
        .runtime
        .images
        .save(&images, file)
        .map_err(|source| AppError::Image {
            action: "save",
            image: images.map(ToString::to_string).join(" "),
            source,
        })?;
    Ok(ProcessOutcome::Success)
}

pub(super) fn load(invocation: &Invocation<'_, '_>, file: &Path) -> Result<ProcessOutcome, AppError> {
    info!(target: IMAGES_TARGET, archive = %file.display(), "loading worker images");
    invocation
        .runtime
        .images
        .load(file)
        .map_err(|source| AppError::Image {
            action: "load",
            image: file.display().to_string(),
            source,
        })?;
    Ok(ProcessOutcome::Success)
}
