//! Registry authentication and worker image transfer.

use std::path::Path;
use std::process::{Command, Stdio};

use pernosco_config::Config;
use pernosco_container::{CliEngine, EngineError, ImageReference};
use tracing::{debug, info};

use crate::errors::AppError;

/// Tracing target for registry and image operations.
const SESSION_TARGET: &str = "pernosco_cli::session";

/// Image operations the launcher needs from the container engine.
pub(crate) trait ImageStore {
    fn image_exists(&self, image: &ImageReference) -> Result<bool, EngineError>;
    fn pull(&self, image: &ImageReference) -> Result<(), EngineError>;
    fn save(&self, images: &[&ImageReference], file: &Path) -> Result<(), EngineError>;
    fn load(&self, file: &Path) -> Result<(), EngineError>;
}

impl ImageStore for CliEngine {
    fn image_exists(&self, image: &ImageReference) -> Result<bool, EngineError> {
        match self.execute(["image", "inspect", image.as_str()]) {
            Ok(_) => Ok(true),
            Err(EngineError::Failed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn pull(&self, image: &ImageReference) -> Result<(), EngineError> {
        self.execute(["pull", image.as_str()]).map(drop)
    }

    fn save(&self, images: &[&ImageReference], file: &Path) -> Result<(), EngineError> {
        let mut args = vec![
            String::from("save"),
            String::from("--output"),
            file.display().to_string(),
        ];
        args.extend(images.iter().map(|image| image.as_str().to_owned()));
        self.execute(args).map(drop)
    }

    fn load(&self, file: &Path) -> Result<(), EngineError> {
        self.execute([
            String::from("load"),
            String::from("--input"),
            file.display().to_string(),
        ])
        .map(drop)
    }
}

/// Performs a registry login.
pub(crate) trait RegistryLogin {
    fn login(&self) -> Result<(), AppError>;
}

/// Logs in with a password printed by an operator-configured helper.
///
/// Without a helper the registry is assumed to allow anonymous pulls.
pub(crate) struct HelperLogin<'a> {
    engine: &'a CliEngine,
    command: Option<String>,
    username: String,
    server: Option<String>,
}

impl<'a> HelperLogin<'a> {
    pub(crate) fn from_config(engine: &'a CliEngine, config: &Config) -> Self {
        Self {
            engine,
            command: config.login_command().map(str::to_owned),
            username: config.login_username().to_owned(),
            server: registry_server(config.registry()).map(str::to_owned),
        }
    }

    fn password(&self, command: &str) -> Result<Vec<u8>, AppError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| AppError::LoginHelper {
                command: command.to_owned(),
                source,
            })?;
        if !output.status.success() {
            return Err(AppError::LoginHelperFailed {
                command: command.to_owned(),
                status: output.status.code(),
            });
        }
        let mut password = output.stdout;
        while password.last().is_some_and(|byte| *byte == b'\n' || *byte == b'\r') {
            password.pop();
        }
        Ok(password)
    }
}

impl RegistryLogin for HelperLogin<'_> {
    fn login(&self) -> Result<(), AppError> {
        let Some(command) = self.command.as_deref() else {
            debug!(target: SESSION_TARGET, "no login helper configured");
            return Ok(());
        };
        let password = self.password(command)?;
        let mut args = vec![
            "login",
            "--username",
            self.username.as_str(),
            "--password-stdin",
        ];
        if let Some(server) = self.server.as_deref() {
            args.push(server);
        }
        self.engine
            .execute_with_input(args, &password)
            .map(drop)
            .map_err(AppError::Login)?;
        info!(target: SESSION_TARGET, server = ?self.server, "logged in to registry");
        Ok(())
    }
}

/// Registry host of a repository prefix, when it names one.
///
/// `registry.example:5000/pernosco` logs in to `registry.example:5000`; a bare
/// `pernosco` organisation lives on the engine's default registry.
fn registry_server(registry: &str) -> Option<&str> {
    registry
        .split_once('/')
        .map(|(host, _)| host)
        .filter(|host| host.contains(['.', ':']) || *host == "localhost")
}

/// Authentication state for one launcher invocation.
#[derive(Debug, Default)]
pub(crate) struct RegistrySession {
    authenticated: bool,
}

impl RegistrySession {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Logs in unless this session already has.
    pub(crate) fn ensure_authenticated(&mut self, login: &dyn RegistryLogin) -> Result<(), AppError> {
        if !self.authenticated {
            login.login()?;
            self.authenticated = true;
        }
        Ok(())
    }

    /// Pulls `images` after authenticating once.
    pub(crate) fn pull(
        &mut self,
        login: &dyn RegistryLogin,
        store: &dyn ImageStore,
        images: &[&ImageReference],
    ) -> Result<(), AppError> {
        self.ensure_authenticated(login)?;
        for image in images {
            info!(target: SESSION_TARGET, image = image.as_str(), "pulling image");
            store.pull(image).map_err(|source| AppError::Image {
                action: "pull",
                image: image.to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Makes sure `images` are available locally.
    ///
    /// Missing images are pulled unless `no_pull` is set, in which case the
    /// first missing image is an error.
    pub(crate) fn ensure_present(
        &mut self,
        login: &dyn RegistryLogin,
        store: &dyn ImageStore,
        images: &[&ImageReference],
        no_pull: bool,
    ) -> Result<(), AppError> {
        for image in images {
            let present = store.image_exists(image).map_err(|source| AppError::Image {
                action: "inspect",
                image: image.to_string(),
                source,
            })?;
            if present {
                continue;
            }
            if no_pull {
                return Err(AppError::MissingImage {
                    image: image.to_string(),
                });
            }
            self.pull(login, store, &[*image])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::cell::Cell;

    #[rstest]
    #[case("pernosco", None)]
    #[case("pernosco/nightly", None)]
    #[case("registry.example/pernosco", Some("registry.example"))]
    #[case("registry:5000/pernosco", Some("registry:5000"))]
    #[case("localhost/pernosco", Some("localhost"))]
    fn extracts_registry_server(#[case] registry: &str, #[case] expected: Option<&str>) {
        assert_eq!(registry_server(registry), expected);
    }

    struct CountingLogin(Cell<usize>);

    impl RegistryLogin for CountingLogin {
        fn login(&self) -> Result<(), AppError> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn logs_in_once_per_session() {
        let login = CountingLogin(Cell::new(0));
        let mut session = RegistrySession::new();
        assert!(!session.is_authenticated());

        session.ensure_authenticated(&login).expect("first login");
        session.ensure_authenticated(&login).expect("second login");

        assert!(session.is_authenticated());
        assert_eq!(login.0.get(), 1);
    }

    #[test]
    fn failed_login_leaves_the_session_unauthenticated() {
        struct RefusingLogin;

        impl RegistryLogin for RefusingLogin {
            fn login(&self) -> Result<(), AppError> {
                Err(AppError::LoginHelperFailed {
                    command: String::from("false"),
                    status: Some(1),
                })
            }
        }

        let mut session = RegistrySession::new();
        assert!(session.ensure_authenticated(&RefusingLogin).is_err());
        assert!(!session.is_authenticated());
    }
}
