//! Configuration loading helpers for the launcher.
//!
//! Launcher flags such as `--engine` are handed to `ortho_config`; everything
//! from the first other token onwards belongs to the `clap` command line.

use std::ffi::{OsStr, OsString};

use ortho_config::OrthoConfig;
use pernosco_config::Config;

use crate::errors::AppError;

pub(crate) trait ConfigLoader {
    /// Loads the launcher configuration.
    ///
    /// Configuration flags (listed in `CONFIG_CLI_FLAGS`) must appear before
    /// the subcommand. Later occurrences are parsed as command arguments.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

#[derive(Debug, Clone, Copy)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

impl OrthoConfigLoader {
    fn process_config_flag(argument: &OsStr) -> FlagAction {
        let argument_text = argument.to_string_lossy();
        let Some((flag, has_inline_value)) = split_flag(&argument_text) else {
            return FlagAction::Skip;
        };
        if crate::CONFIG_CLI_FLAGS.contains(&flag) {
            FlagAction::Include {
                needs_value: !has_inline_value,
            }
        } else {
            FlagAction::Skip
        }
    }
}

/// Splits `--flag[=value]` into the flag and whether a value was inlined.
fn split_flag(argument: &str) -> Option<(&str, bool)> {
    if !argument.starts_with("--") {
        return None;
    }
    Some(match argument.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (argument, false),
    })
}

pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_start: usize,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some((program, rest)) = args.split_first() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            command_start: 0,
        };
    };

    let mut config_arguments = vec![program.clone()];
    let mut command_start = 1usize;
    let mut pending_value = false;

    for argument in rest {
        if pending_value {
            pending_value = false;
        } else {
            match OrthoConfigLoader::process_config_flag(argument) {
                FlagAction::Include { needs_value } => pending_value = needs_value,
                FlagAction::Skip => break,
            }
        }
        config_arguments.push(argument.clone());
        command_start += 1;
    }

    ConfigArgumentSplit {
        config_arguments,
        command_start,
    }
}
