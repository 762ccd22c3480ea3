//! Tool lookup and native client bootstrapping for the live-source launcher.
//!
//! This crate provides:
//!
//! - Lookup of `uv` and `cargo` on PATH, cached per process
//! - The [`NativeBootstrapper`] seam and its cargo-backed implementation,
//!   which keeps one cached client binary per source fingerprint
//! - Cache housekeeping shared with the virtualenv cache: entries record
//!   their last use and are pruned after [`CACHE_RETENTION`]
//!
//! ```ignore
//! use pants_bootstrap::{CargoBootstrapper, NativeBootstrapper};
//!
//! let bootstrapper = CargoBootstrapper::new(engine_dir, "pants", &cache_root);
//! let client = bootstrapper.bootstrap().await?;
//! ```

pub mod native;
pub mod tools;

pub use native::{CargoBootstrapper, NativeBootstrapper, NativeBuildError, NativeClientBinary};
pub use tools::{default_cache_dir, find_cargo, find_uv, prune_unused, touch, CACHE_RETENTION};
