//! Interpreter selection and development virtualenv management.
//!
//! This crate provides the two environment-side seams of the launcher:
//!
//! - [`EnvironmentResolver`]: picks the interpreter and version constraints
//!   from explicit overrides and the host platform
//! - [`RuntimeActivator`]: guarantees a virtualenv with the repository's
//!   requirements exists, reusing a valid one and rebuilding a stale one
//!
//! All progress goes through a [`ProgressHandler`], never stdout.
//!
//! ```ignore
//! use pants_env::{EnvironmentResolver, HostResolver, LogHandler, RuntimeActivator, VenvActivator};
//!
//! let selection = HostResolver::new(overrides, HostPlatform::current()).resolve();
//! let activator = VenvActivator::new(requirements, &cache_root, Arc::new(LogHandler));
//! let runtime = activator.activate(&selection).await?;
//! ```

pub mod progress;
pub mod resolver;
pub mod venv;

// Re-export key types
pub use progress::{EnvProgressPhase, LogHandler, ProgressHandler};
pub use resolver::{
    EnvironmentResolver, HostPlatform, HostResolver, InterpreterOverrides, PythonVersion,
    RuntimeSelection,
};
pub use venv::{ActivatedRuntime, EnvironmentActivationError, RuntimeActivator, VenvActivator};
