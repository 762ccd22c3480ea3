//! Progress reporting for virtualenv activation.
//!
//! Activation runs before the user's command, so nothing it reports may reach
//! stdout. [`LogHandler`] routes every phase to the `log` crate, which the
//! launcher binary points at stderr.

use serde::{Deserialize, Serialize};

/// Progress phases during activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum EnvProgressPhase {
    /// Starting activation.
    Starting { env_hash: String },
    /// Using an existing environment (fast path).
    CacheHit { env_path: String },
    /// An existing environment is unusable and will be rebuilt.
    Stale { env_path: String, reason: String },
    /// Creating the virtual environment.
    CreatingVenv { interpreter: String },
    /// Installing requirements into the new environment.
    InstallingRequirements { requirements: String },
    /// Environment is ready.
    Ready {
        env_path: String,
        python_path: String,
    },
    /// An error occurred.
    Error { message: String },
}

/// Trait for receiving activation progress events.
pub trait ProgressHandler: Send + Sync {
    /// Called for each phase. `backend` is `"uv"` or `"venv"`.
    fn on_progress(&self, backend: &str, phase: EnvProgressPhase);
}

/// Log-only progress handler.
pub struct LogHandler;

impl ProgressHandler for LogHandler {
    fn on_progress(&self, backend: &str, phase: EnvProgressPhase) {
        match &phase {
            EnvProgressPhase::Starting { env_hash } => {
                log::debug!("[{backend}] Activating environment (hash: {env_hash})");
            }
            EnvProgressPhase::CacheHit { env_path } => {
                log::debug!("[{backend}] Cache hit: {env_path}");
            }
            EnvProgressPhase::Stale { env_path, reason } => {
                log::warn!("[{backend}] Rebuilding {env_path}: {reason}");
            }
            EnvProgressPhase::CreatingVenv { interpreter } => {
                log::info!("[{backend}] Creating virtual environment with {interpreter}...");
            }
            EnvProgressPhase::InstallingRequirements { requirements } => {
                log::info!("[{backend}] Installing requirements from {requirements}...");
            }
            EnvProgressPhase::Ready {
                env_path,
                python_path,
            } => {
                log::info!("[{backend}] Ready: env={env_path} python={python_path}");
            }
            EnvProgressPhase::Error { message } => {
                log::error!("[{backend}] Error: {message}");
            }
        }
    }
}
