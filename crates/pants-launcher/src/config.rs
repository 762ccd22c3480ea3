//! Launcher configuration.
//!
//! Every environment variable the launcher honours is read exactly once, here,
//! into an immutable [`LauncherConfig`]. The rest of the launcher only ever
//! sees this struct.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use log::debug;
use pants_env::InterpreterOverrides;

use crate::error::ConfigurationError;

/// Environment of the launcher and its children.
pub type EnvMap = BTreeMap<OsString, OsString>;

/// Environment variable keys.
pub mod env_keys {
    /// Site-local settings file loaded before anything else.
    pub const BOOTSTRAP_FILE: &str = "PANTS_BOOTSTRAP_FILE";
    /// Forces the interpreter constraints.
    pub const INTERPRETER_CONSTRAINTS: &str = "PANTS_PYTHON_INTERPRETER_CONSTRAINTS";
    /// Forces the interpreter.
    pub const INTERPRETER: &str = "PY";
    /// Launch the Python entrypoint under debugpy.
    pub const DEBUG: &str = "PANTS_DEBUG";
    /// Skip the native client.
    pub const NO_NATIVE_CLIENT: &str = "PANTS_NO_NATIVE_CLIENT";
    /// Arguments spliced in before the Python entrypoint.
    pub const PREPEND_ARGS: &str = "PANTS_PREPEND_ARGS";
    /// Prebuilt native client to use instead of building one.
    pub const NATIVE_CLIENT: &str = "PANTS_NATIVE_CLIENT";
    /// Cache root for virtualenvs and native builds.
    pub const CACHE_DIR: &str = "PANTS_DEV_CACHE_DIR";
    /// Repository root.
    pub const BUILD_ROOT: &str = "PANTS_BUILDROOT";
    /// Log filter for the launcher itself.
    pub const LOG: &str = "PANTS_LAUNCHER_LOG";
    /// Cargo used to build the native client.
    pub const CARGO: &str = "CARGO";
}

/// Bootstrap file picked up from the build root when present.
pub const DEFAULT_BOOTSTRAP_FILE: &str = ".pants.bootstrap";

/// Launcher log filter when none is given.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Python source root, relative to the build root.
pub const SOURCE_ROOT: &str = "src/python";

/// Python entrypoint, relative to the build root.
pub const ENTRYPOINT: &str = "src/python/pants/bin/pants_loader.py";

/// Requirements of the development virtualenv, relative to the build root.
pub const REQUIREMENTS: &str = "3rdparty/python/requirements.txt";

/// Cargo workspace of the native client, relative to the build root.
pub const NATIVE_SOURCE_ROOT: &str = "src/rust/engine";

/// `[[bin]]` name of the native client.
pub const NATIVE_CLIENT_BINARY: &str = "pants";

/// Immutable launcher configuration.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Repository root.
    pub build_root: PathBuf,
    /// Cache root for virtualenvs and native builds.
    pub cache_dir: PathBuf,
    /// Bootstrap file that was loaded, if any.
    pub bootstrap_file: Option<PathBuf>,
    /// Interpreter overrides handed to the resolver.
    pub interpreter: InterpreterOverrides,
    /// Run the Python entrypoint under a debugger.
    pub debug: bool,
    /// Skip the native client and go straight to the Python entrypoint.
    pub no_native_client: bool,
    /// Arguments spliced in before the Python entrypoint.
    pub prepend_args: Vec<OsString>,
    /// Prebuilt native client.
    pub native_client: Option<PathBuf>,
    /// Cargo to build the native client with instead of the one on PATH.
    pub cargo: Option<PathBuf>,
    /// Filter for the launcher's own logging.
    pub log_filter: String,
    /// Environment forwarded to child processes, bootstrap file included.
    pub env: EnvMap,
}

impl LauncherConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let cwd = std::env::current_dir().map_err(ConfigurationError::BuildRoot)?;
        Self::from_vars(std::env::vars_os(), &cwd)
    }

    /// Load configuration from explicit variables.
    ///
    /// `cwd` is the build root unless `PANTS_BUILDROOT` says otherwise.
    pub fn from_vars<I>(vars: I, cwd: &Path) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut env: EnvMap = vars.into_iter().collect();

        let build_root =
            lookup_path(&env, env_keys::BUILD_ROOT, cwd).unwrap_or_else(|| cwd.to_path_buf());

        let bootstrap_file = match lookup_path(&env, env_keys::BOOTSTRAP_FILE, &build_root) {
            Some(explicit) => Some(explicit),
            None => {
                let default = build_root.join(DEFAULT_BOOTSTRAP_FILE);
                default.is_file().then_some(default)
            }
        };
        if let Some(path) = &bootstrap_file {
            load_bootstrap_file(path, &mut env)?;
        }

        let cache_dir = lookup_path(&env, env_keys::CACHE_DIR, &build_root)
            .unwrap_or_else(pants_bootstrap::default_cache_dir);

        let prepend_args = lookup(&env, env_keys::PREPEND_ARGS)
            .map(|raw| raw.split_whitespace().map(OsString::from).collect())
            .unwrap_or_default();

        Ok(Self {
            cache_dir,
            bootstrap_file,
            interpreter: InterpreterOverrides {
                interpreter: lookup(&env, env_keys::INTERPRETER),
                constraints: lookup(&env, env_keys::INTERPRETER_CONSTRAINTS),
            },
            debug: lookup(&env, env_keys::DEBUG).is_some(),
            no_native_client: lookup(&env, env_keys::NO_NATIVE_CLIENT).is_some(),
            prepend_args,
            native_client: lookup_path(&env, env_keys::NATIVE_CLIENT, &build_root),
            cargo: lookup_path(&env, env_keys::CARGO, &build_root),
            log_filter: lookup(&env, env_keys::LOG)
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            build_root,
            env,
        })
    }

    pub fn source_root(&self) -> PathBuf {
        self.build_root.join(SOURCE_ROOT)
    }

    pub fn entrypoint(&self) -> PathBuf {
        self.build_root.join(ENTRYPOINT)
    }

    pub fn requirements(&self) -> PathBuf {
        self.build_root.join(REQUIREMENTS)
    }

    pub fn native_source_root(&self) -> PathBuf {
        self.build_root.join(NATIVE_SOURCE_ROOT)
    }
}

/// A variable's value; unset and empty are the same.
fn lookup(env: &EnvMap, key: &str) -> Option<String> {
    env.get(OsStr::new(key))
        .map(|value| value.to_string_lossy().into_owned())
        .filter(|value| !value.is_empty())
}

/// A path variable, resolved against `base` when relative.
fn lookup_path(env: &EnvMap, key: &str, base: &Path) -> Option<PathBuf> {
    env.get(OsStr::new(key))
        .filter(|value| !value.is_empty())
        .map(|value| base.join(value))
}

/// Overlay the entries of a dotenv-format file onto `env`.
fn load_bootstrap_file(path: &Path, env: &mut EnvMap) -> Result<(), ConfigurationError> {
    let to_error = |source| ConfigurationError::BootstrapFile {
        path: path.to_path_buf(),
        source,
    };

    for item in dotenvy::from_path_iter(path).map_err(to_error)? {
        let (key, value) = item.map_err(to_error)?;
        debug!("Bootstrap file sets {}", key);
        env.insert(key.into(), value.into());
    }
    Ok(())
}
