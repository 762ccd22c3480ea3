//! Launcher error types.

use std::path::PathBuf;

use pants_bootstrap::NativeBuildError;
use pants_env::EnvironmentActivationError;

/// The caller's settings contradict each other or cannot be loaded.
///
/// Always detected before anything is built or spawned.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Must pass '{flag}' when using {variable}")]
    DebugRequiresNoDaemon {
        flag: &'static str,
        variable: &'static str,
    },

    #[error("Failed to load bootstrap file {path}: {source}")]
    BootstrapFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("Could not determine the build root: {0}")]
    BuildRoot(#[source] std::io::Error),
}

/// Result type for dispatch.
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Everything that stops the launcher before the command's own exit code is
/// known.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Activation(#[from] EnvironmentActivationError),

    #[error(transparent)]
    NativeBuild(#[from] NativeBuildError),

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to exec {program}: {source}")]
    Exec {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
