//! Development virtualenv management.
//!
//! The launcher runs the interpreted entrypoint inside a virtualenv holding
//! the repository's third-party requirements. Environments are keyed by a
//! SHA-256 hash of (requirements + interpreter selection) and stored under
//! `<cache>/pants_dev_deps/<hash>.venv`. A `.pants-venv.json` marker is
//! written last, so an environment without a matching marker is treated as
//! partial and rebuilt.
//!
//! `uv` is used when it is on PATH, otherwise the selected interpreter's own
//! `venv` and `pip` modules. Environments are built in a staging directory
//! and renamed into place. uv environments are created `--relocatable`; for
//! `venv` environments only `bin/python` is guaranteed to work after the
//! rename, which is all the launcher runs.
//!
//! Using an environment refreshes its marker, and environments unused for
//! [`CACHE_RETENTION`] are pruned whenever a new one is built.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use pants_bootstrap::{prune_unused, touch, CACHE_RETENTION};

use crate::progress::{EnvProgressPhase, ProgressHandler};
use crate::resolver::{PythonVersion, RuntimeSelection};

/// Marker file written into every completed environment.
pub const MARKER_FILE: &str = ".pants-venv.json";

const VERSION_SCRIPT: &str = "import sys; print('.'.join(map(str, sys.version_info[:3])))";

/// A ready-to-use virtualenv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivatedRuntime {
    pub env_path: PathBuf,
    pub python_path: PathBuf,
}

/// Errors that can occur while activating the runtime.
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentActivationError {
    #[error("IO error while activating the environment: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read requirements from {path}: {source}")]
    Requirements {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No interpreter satisfies {constraints:?} (tried: {tried})")]
    NoInterpreter {
        constraints: Vec<String>,
        tried: String,
    },

    #[error("Failed to create virtual environment: {0}")]
    CreateFailed(String),

    #[error("Failed to install requirements: {0}")]
    InstallFailed(String),
}

/// Guarantees a runtime environment exists for a selection.
#[allow(async_fn_in_trait)]
pub trait RuntimeActivator {
    /// Return the environment for `selection`, creating or repairing it if
    /// needed. Calling this again with the same selection must not rebuild a
    /// valid environment.
    async fn activate(
        &self,
        selection: &RuntimeSelection,
    ) -> Result<ActivatedRuntime, EnvironmentActivationError>;
}

/// Contents of [`MARKER_FILE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenvMarker {
    pub env_hash: String,
    pub interpreter: PathBuf,
    pub python_version: String,
    pub created_at: DateTime<Utc>,
}

impl VenvMarker {
    pub fn new(env_hash: &str, interpreter: PathBuf, version: PythonVersion) -> Self {
        Self {
            env_hash: env_hash.to_string(),
            interpreter,
            python_version: version.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Write this marker into `venv_path`, completing the environment.
    pub async fn write(&self, venv_path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        tokio::fs::write(venv_path.join(MARKER_FILE), json).await
    }
}

/// State of an environment directory on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvState {
    Valid,
    Stale(String),
    Missing,
}

/// Path of the interpreter inside a virtualenv.
pub fn python_in(venv_path: &Path) -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        venv_path.join("Scripts").join("python.exe")
    }
    #[cfg(not(target_os = "windows"))]
    {
        venv_path.join("bin").join("python")
    }
}

/// Compute the cache key for a requirements file and selection.
///
/// Constraint order does not matter.
pub fn compute_env_hash(requirements: &[u8], selection: &RuntimeSelection) -> String {
    let mut hasher = Sha256::new();

    hasher.update(b"interpreter:");
    hasher.update(selection.interpreter.as_bytes());
    hasher.update(b"\n");

    let mut constraints = selection.constraints.clone();
    constraints.sort();
    for constraint in &constraints {
        hasher.update(b"constraint:");
        hasher.update(constraint.as_bytes());
        hasher.update(b"\n");
    }

    hasher.update(b"requirements:");
    hasher.update(requirements);

    hex::encode(hasher.finalize())[..16].to_string()
}

/// Inspect an environment directory.
pub async fn check_environment(venv_path: &Path, env_hash: &str) -> EnvState {
    if !venv_path.exists() {
        return EnvState::Missing;
    }
    if !python_in(venv_path).exists() {
        return EnvState::Stale("interpreter missing".to_string());
    }
    let marker = match tokio::fs::read_to_string(venv_path.join(MARKER_FILE)).await {
        Ok(contents) => contents,
        Err(_) => return EnvState::Stale("no completion marker".to_string()),
    };
    match serde_json::from_str::<VenvMarker>(&marker) {
        Ok(marker) if marker.env_hash == env_hash => EnvState::Valid,
        Ok(marker) => EnvState::Stale(format!(
            "marker hash {} does not match {}",
            marker.env_hash, env_hash
        )),
        Err(e) => EnvState::Stale(format!("unreadable marker: {}", e)),
    }
}

/// Ask an interpreter for its version.
pub async fn query_version(interpreter: &Path) -> Option<PythonVersion> {
    let output = tokio::process::Command::new(interpreter)
        .args(["-c", VERSION_SCRIPT])
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    PythonVersion::parse(&String::from_utf8_lossy(&output.stdout))
}

/// Find the first candidate interpreter that satisfies the selection.
pub async fn find_interpreter(
    selection: &RuntimeSelection,
) -> Result<(PathBuf, PythonVersion), EnvironmentActivationError> {
    let mut tried = Vec::new();

    for candidate in selection.candidates() {
        let Ok(path) = which::which(candidate) else {
            tried.push(format!("{} (not found)", candidate));
            continue;
        };
        match query_version(&path).await {
            Some(version) if selection.accepts(&version) => {
                info!("[venv] Using interpreter {:?} ({})", path, version);
                return Ok((path, version));
            }
            Some(version) => tried.push(format!("{} ({})", candidate, version)),
            None => tried.push(format!("{} (did not run)", candidate)),
        }
    }

    Err(EnvironmentActivationError::NoInterpreter {
        constraints: selection.constraints.clone(),
        tried: tried.join(", "),
    })
}

/// Run a command, capturing its output. Returns stderr on failure.
async fn run_captured(command: &mut tokio::process::Command) -> Result<(), String> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| e.to_string())?;

    if output.status.success() {
        debug!("{}", String::from_utf8_lossy(&output.stdout).trim_end());
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim_end().to_string())
    }
}

/// Activates virtualenvs built from a requirements file.
pub struct VenvActivator {
    /// Requirements installed into every environment.
    pub requirements: PathBuf,
    /// Directory holding the environments.
    pub cache_dir: PathBuf,
    /// Build with uv when it is on PATH.
    prefer_uv: bool,
    handler: Arc<dyn ProgressHandler>,
}

impl VenvActivator {
    pub fn new(
        requirements: PathBuf,
        cache_root: &Path,
        handler: Arc<dyn ProgressHandler>,
    ) -> Self {
        Self {
            requirements,
            cache_dir: cache_root.join("pants_dev_deps"),
            prefer_uv: true,
            handler,
        }
    }

    /// Where the environment with `env_hash` lives.
    pub fn env_path(&self, env_hash: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.venv", env_hash))
    }

    async fn create(
        &self,
        staging: &Path,
        interpreter: &Path,
    ) -> Result<&'static str, EnvironmentActivationError> {
        let staging_python = python_in(staging);
        let interpreter_display = interpreter.to_string_lossy().to_string();
        let requirements_display = self.requirements.to_string_lossy().to_string();

        let uv = if self.prefer_uv {
            pants_bootstrap::find_uv().await
        } else {
            None
        };
        if let Some(uv) = uv {
            self.handler.on_progress(
                "uv",
                EnvProgressPhase::CreatingVenv {
                    interpreter: interpreter_display,
                },
            );
            run_captured(
                tokio::process::Command::new(&uv)
                    .arg("venv")
                    .arg(staging)
                    .arg("--relocatable")
                    .arg("--python")
                    .arg(interpreter),
            )
            .await
            .map_err(EnvironmentActivationError::CreateFailed)?;

            self.handler.on_progress(
                "uv",
                EnvProgressPhase::InstallingRequirements {
                    requirements: requirements_display,
                },
            );
            run_captured(
                tokio::process::Command::new(&uv)
                    .args(["pip", "install", "--python"])
                    .arg(&staging_python)
                    .arg("-r")
                    .arg(&self.requirements),
            )
            .await
            .map_err(EnvironmentActivationError::InstallFailed)?;

            return Ok("uv");
        }

        self.handler.on_progress(
            "venv",
            EnvProgressPhase::CreatingVenv {
                interpreter: interpreter_display,
            },
        );
        run_captured(
            tokio::process::Command::new(interpreter)
                .args(["-m", "venv"])
                .arg(staging),
        )
        .await
        .map_err(EnvironmentActivationError::CreateFailed)?;

        self.handler.on_progress(
            "venv",
            EnvProgressPhase::InstallingRequirements {
                requirements: requirements_display,
            },
        );
        run_captured(
            tokio::process::Command::new(&staging_python)
                .args(["-m", "pip", "install", "--quiet", "-r"])
                .arg(&self.requirements),
        )
        .await
        .map_err(EnvironmentActivationError::InstallFailed)?;

        Ok("venv")
    }
}

impl RuntimeActivator for VenvActivator {
    async fn activate(
        &self,
        selection: &RuntimeSelection,
    ) -> Result<ActivatedRuntime, EnvironmentActivationError> {
        let requirements = tokio::fs::read(&self.requirements).await.map_err(|source| {
            EnvironmentActivationError::Requirements {
                path: self.requirements.clone(),
                source,
            }
        })?;

        let env_hash = compute_env_hash(&requirements, selection);
        let env_path = self.env_path(&env_hash);
        let python_path = python_in(&env_path);

        self.handler.on_progress(
            "venv",
            EnvProgressPhase::Starting {
                env_hash: env_hash.clone(),
            },
        );

        match check_environment(&env_path, &env_hash).await {
            EnvState::Valid => {
                if let Err(e) = touch(&env_path.join(MARKER_FILE)) {
                    debug!("[venv] Could not record use of {:?}: {}", env_path, e);
                }
                self.handler.on_progress(
                    "venv",
                    EnvProgressPhase::CacheHit {
                        env_path: env_path.to_string_lossy().to_string(),
                    },
                );
                return Ok(ActivatedRuntime {
                    env_path,
                    python_path,
                });
            }
            EnvState::Stale(reason) => {
                self.handler.on_progress(
                    "venv",
                    EnvProgressPhase::Stale {
                        env_path: env_path.to_string_lossy().to_string(),
                        reason,
                    },
                );
                tokio::fs::remove_dir_all(&env_path).await?;
            }
            EnvState::Missing => {}
        }

        let (interpreter, version) = find_interpreter(selection).await?;

        tokio::fs::create_dir_all(&self.cache_dir).await?;

        // Build beside the final location and rename into place so concurrent
        // launchers never see a half-built environment.
        let staging = self
            .cache_dir
            .join(format!("{}.staging-{}", env_hash, uuid::Uuid::new_v4()));

        let backend = match self.create(&staging, &interpreter).await {
            Ok(backend) => backend,
            Err(e) => {
                tokio::fs::remove_dir_all(&staging).await.ok();
                self.handler.on_progress(
                    "venv",
                    EnvProgressPhase::Error {
                        message: e.to_string(),
                    },
                );
                return Err(e);
            }
        };

        VenvMarker::new(&env_hash, interpreter, version)
            .write(&staging)
            .await?;

        if let Err(e) = tokio::fs::rename(&staging, &env_path).await {
            tokio::fs::remove_dir_all(&staging).await.ok();
            if check_environment(&env_path, &env_hash).await != EnvState::Valid {
                return Err(e.into());
            }
            debug!(
                "[venv] Another launcher finished {:?} first, using it",
                env_path
            );
        }

        prune_unused(&self.cache_dir, &env_path, CACHE_RETENTION, |entry| {
            entry.join(MARKER_FILE)
        })
        .await;

        self.handler.on_progress(
            backend,
            EnvProgressPhase::Ready {
                env_path: env_path.to_string_lossy().to_string(),
                python_path: python_path.to_string_lossy().to_string(),
            },
        );

        Ok(ActivatedRuntime {
            env_path,
            python_path,
        })
    }
}
