//! Native client bootstrapping.
//!
//! The native client is built from the Rust sources in the repository with
//! `cargo`. Built binaries are cached under
//! `<cache>/native_client/<fingerprint>/`, where the fingerprint covers every
//! source file plus the target platform, so a source edit produces a fresh
//! build and an unchanged tree reuses the cached binary.

use log::{debug, info};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use walkdir::{DirEntry, WalkDir};

use crate::tools::{
    executable_name, find_cargo, prune_unused, stderr_stdio, touch, CACHE_RETENTION,
};

/// Fingerprint recorded for a caller-supplied prebuilt binary.
pub const PREBUILT_FINGERPRINT: &str = "prebuilt";

/// A native client binary that is ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeClientBinary {
    /// Path to the executable.
    pub path: PathBuf,
    /// Fingerprint of the sources it was built from.
    pub fingerprint: String,
}

/// Errors that can occur while producing the native client.
#[derive(Debug, thiserror::Error)]
pub enum NativeBuildError {
    #[error("IO error while bootstrapping the native client: {0}")]
    Io(#[from] std::io::Error),

    #[error("Native client sources not found at {0}")]
    SourcesNotFound(PathBuf),

    #[error("Failed to fingerprint native client sources: {0}")]
    Fingerprint(String),

    #[error("cargo is required to build the native client but was not found on PATH")]
    CargoNotFound,

    #[error("cargo build of the native client failed ({0})")]
    BuildFailed(String),

    #[error("Native client was built but binary not found at {0}")]
    BinaryMissing(PathBuf),

    #[error("Prebuilt native client not found at {0}")]
    PrebuiltMissing(PathBuf),
}

/// Produces an up-to-date native client binary.
#[allow(async_fn_in_trait)]
pub trait NativeBootstrapper {
    /// Return the native client, building it first if it is missing or stale.
    async fn bootstrap(&self) -> Result<NativeClientBinary, NativeBuildError>;
}

/// Bootstraps the native client by building it with cargo.
#[derive(Debug, Clone)]
pub struct CargoBootstrapper {
    /// Root of the cargo workspace containing the client.
    pub source_root: PathBuf,
    /// Name of the client's `[[bin]]` target.
    pub binary_name: String,
    /// Directory holding one subdirectory per fingerprint.
    pub cache_dir: PathBuf,
    /// Use this binary as-is instead of building.
    pub prebuilt: Option<PathBuf>,
    /// Cargo to build with instead of the one on PATH.
    pub cargo: Option<PathBuf>,
}

impl CargoBootstrapper {
    pub fn new(source_root: PathBuf, binary_name: &str, cache_root: &Path) -> Self {
        Self {
            source_root,
            binary_name: binary_name.to_string(),
            cache_dir: cache_root.join("native_client"),
            prebuilt: None,
            cargo: None,
        }
    }

    pub fn with_prebuilt(mut self, prebuilt: Option<PathBuf>) -> Self {
        self.prebuilt = prebuilt;
        self
    }

    pub fn with_cargo(mut self, cargo: Option<PathBuf>) -> Self {
        self.cargo = cargo;
        self
    }

    /// Where the binary for `fingerprint` lives in the cache.
    pub fn cached_binary_path(&self, fingerprint: &str) -> PathBuf {
        self.cache_dir
            .join(fingerprint)
            .join(executable_name(&self.binary_name))
    }

    async fn build(&self, destination: &Path) -> Result<(), NativeBuildError> {
        let cargo = match &self.cargo {
            Some(cargo) => cargo.clone(),
            None => find_cargo().await.ok_or(NativeBuildError::CargoNotFound)?,
        };
        let target_dir = self.source_root.join("target");

        info!(
            "[native] Building {} in {:?}...",
            self.binary_name, self.source_root
        );

        let status = tokio::process::Command::new(&cargo)
            .arg("build")
            .arg("--release")
            .arg("--bin")
            .arg(&self.binary_name)
            .arg("--target-dir")
            .arg(&target_dir)
            .current_dir(&self.source_root)
            .stdin(Stdio::null())
            .stdout(stderr_stdio()?)
            .stderr(Stdio::inherit())
            .status()
            .await?;

        if !status.success() {
            return Err(NativeBuildError::BuildFailed(status.to_string()));
        }

        let built = target_dir
            .join("release")
            .join(executable_name(&self.binary_name));
        if !built.is_file() {
            return Err(NativeBuildError::BinaryMissing(built));
        }

        let parent = destination
            .parent()
            .ok_or_else(|| NativeBuildError::BinaryMissing(destination.to_path_buf()))?;
        tokio::fs::create_dir_all(parent).await?;

        // Copy next to the final location, then rename so concurrent launchers
        // never observe a half-written binary.
        let staging = parent.join(format!(
            ".{}.{}",
            executable_name(&self.binary_name),
            uuid::Uuid::new_v4()
        ));
        tokio::fs::copy(&built, &staging).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o755)).await?;
        }

        if let Err(e) = tokio::fs::rename(&staging, destination).await {
            tokio::fs::remove_file(&staging).await.ok();
            if !destination.is_file() {
                return Err(e.into());
            }
            debug!("[native] Another launcher installed {:?} first", destination);
        }

        Ok(())
    }
}

impl NativeBootstrapper for CargoBootstrapper {
    async fn bootstrap(&self) -> Result<NativeClientBinary, NativeBuildError> {
        if let Some(prebuilt) = &self.prebuilt {
            if !prebuilt.is_file() {
                return Err(NativeBuildError::PrebuiltMissing(prebuilt.clone()));
            }
            info!("[native] Using prebuilt native client at {:?}", prebuilt);
            return Ok(NativeClientBinary {
                path: prebuilt.clone(),
                fingerprint: PREBUILT_FINGERPRINT.to_string(),
            });
        }

        let source_root = self.source_root.clone();
        let fingerprint = tokio::task::spawn_blocking(move || fingerprint_sources(&source_root))
            .await
            .map_err(|e| NativeBuildError::Fingerprint(e.to_string()))??;

        let path = self.cached_binary_path(&fingerprint);
        if path.is_file() {
            info!("[native] Using cached native client at {:?}", path);
            if let Err(e) = touch(&path) {
                debug!("[native] Could not record use of {:?}: {}", path, e);
            }
            return Ok(NativeClientBinary { path, fingerprint });
        }

        info!(
            "[native] No native client for fingerprint {}, building",
            fingerprint
        );
        self.build(&path).await?;
        info!("[native] Native client ready at {:?}", path);

        let binary = executable_name(&self.binary_name);
        prune_unused(
            &self.cache_dir,
            &self.cache_dir.join(&fingerprint),
            CACHE_RETENTION,
            |entry| entry.join(&binary),
        )
        .await;

        Ok(NativeClientBinary { path, fingerprint })
    }
}

/// Build output and VCS metadata never contribute to the fingerprint.
fn is_ignored(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && name == "target")
}

/// Compute the fingerprint of a native source tree for the current platform.
pub fn fingerprint_sources(source_root: &Path) -> Result<String, NativeBuildError> {
    if !source_root.is_dir() {
        return Err(NativeBuildError::SourcesNotFound(source_root.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(source_root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
    {
        let entry = entry.map_err(|e| NativeBuildError::Fingerprint(e.to_string()))?;
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(source_root)
                .map_err(|e| NativeBuildError::Fingerprint(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            files.push((relative, entry.into_path()));
        }
    }
    files.sort();

    let mut hasher = Sha256::new();
    for (relative, path) in &files {
        hasher.update(relative.as_bytes());
        hasher.update(b"\0");
        hasher.update(std::fs::read(path)?);
        hasher.update(b"\0");
    }
    // Binaries are platform-specific
    hasher.update(std::env::consts::ARCH.as_bytes());
    hasher.update(b"-");
    hasher.update(std::env::consts::OS.as_bytes());

    debug!(
        "[native] Fingerprinted {} files under {:?}",
        files.len(),
        source_root
    );
    Ok(hex::encode(hasher.finalize())[..16].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn source_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Cargo.toml", "[workspace]\n");
        write(dir.path(), "client/src/main.rs", "fn main() {}\n");
        dir
    }

    #[test]
    fn test_fingerprint_stable() {
        let sources = source_tree();
        let first = fingerprint_sources(sources.path()).unwrap();
        let second = fingerprint_sources(sources.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
    }

    #[test]
    fn test_fingerprint_changes_with_sources() {
        let sources = source_tree();
        let before = fingerprint_sources(sources.path()).unwrap();

        write(sources.path(), "client/src/main.rs", "fn main() { println!(); }\n");
        let after = fingerprint_sources(sources.path()).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn test_fingerprint_ignores_build_output() {
        let sources = source_tree();
        let before = fingerprint_sources(sources.path()).unwrap();

        write(sources.path(), "target/release/pants", "binary");
        write(sources.path(), ".git/HEAD", "ref: refs/heads/main");
        let after = fingerprint_sources(sources.path()).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn test_fingerprint_missing_sources() {
        let result = fingerprint_sources(Path::new("/nonexistent/native/sources"));
        assert!(matches!(result, Err(NativeBuildError::SourcesNotFound(_))));
    }

    #[tokio::test]
    async fn test_bootstrap_reuses_cached_binary() {
        let sources = source_tree();
        let cache = TempDir::new().unwrap();
        let bootstrapper =
            CargoBootstrapper::new(sources.path().to_path_buf(), "pants", cache.path());

        // Seed the cache so no cargo build is needed
        let fingerprint = fingerprint_sources(sources.path()).unwrap();
        let cached = bootstrapper.cached_binary_path(&fingerprint);
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, "#!/bin/sh\n").unwrap();

        let first = bootstrapper.bootstrap().await.unwrap();
        let second = bootstrapper.bootstrap().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.path, cached);
        assert_eq!(first.fingerprint, fingerprint);
    }

    /// A cargo that records each build and produces a trivial binary.
    #[cfg(unix)]
    fn fake_cargo(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let cargo = dir.join("cargo");
        let script = format!(
            r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    --target-dir) target="$2"; shift ;;
  esac
  shift
done
mkdir -p "$target/release"
printf '#!/bin/sh\nexit 0\n' > "$target/release/pants"
echo built >> "{log}"
"#,
            log = dir.join("cargo.log").display()
        );
        std::fs::write(&cargo, script).unwrap();
        std::fs::set_permissions(&cargo, std::fs::Permissions::from_mode(0o755)).unwrap();
        cargo
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_bootstrap_builds_and_installs_on_cache_miss() {
        use std::os::unix::fs::PermissionsExt;

        let sources = source_tree();
        let tools = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let bootstrapper =
            CargoBootstrapper::new(sources.path().to_path_buf(), "pants", cache.path())
                .with_cargo(Some(fake_cargo(tools.path())));

        let first = bootstrapper.bootstrap().await.unwrap();

        let fingerprint = fingerprint_sources(sources.path()).unwrap();
        assert_eq!(first.fingerprint, fingerprint);
        assert_eq!(first.path, bootstrapper.cached_binary_path(&fingerprint));
        let mode = std::fs::metadata(&first.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        // Only the installed binary remains next to it
        let installed: Vec<_> = std::fs::read_dir(first.path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(installed, vec![std::ffi::OsString::from("pants")]);

        let second = bootstrapper.bootstrap().await.unwrap();
        assert_eq!(first, second);

        let builds = std::fs::read_to_string(tools.path().join("cargo.log")).unwrap();
        assert_eq!(builds.lines().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_bootstrap_rebuilds_after_source_change() {
        let sources = source_tree();
        let tools = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let bootstrapper =
            CargoBootstrapper::new(sources.path().to_path_buf(), "pants", cache.path())
                .with_cargo(Some(fake_cargo(tools.path())));

        let before = bootstrapper.bootstrap().await.unwrap();
        write(sources.path(), "client/src/main.rs", "fn main() { std::process::exit(1) }\n");
        let after = bootstrapper.bootstrap().await.unwrap();

        assert_ne!(before.fingerprint, after.fingerprint);
        assert!(after.path.is_file());
        // A fresh previous build is not pruned
        assert!(before.path.is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_bootstrap_build_failure() {
        use std::os::unix::fs::PermissionsExt;

        let sources = source_tree();
        let tools = TempDir::new().unwrap();
        let cargo = tools.path().join("cargo");
        std::fs::write(&cargo, "#!/bin/sh\nexit 101\n").unwrap();
        std::fs::set_permissions(&cargo, std::fs::Permissions::from_mode(0o755)).unwrap();

        let bootstrapper =
            CargoBootstrapper::new(sources.path().to_path_buf(), "pants", tools.path())
                .with_cargo(Some(cargo));

        let result = bootstrapper.bootstrap().await;
        assert!(matches!(result, Err(NativeBuildError::BuildFailed(_))));
    }

    #[tokio::test]
    async fn test_bootstrap_prebuilt() {
        let dir = TempDir::new().unwrap();
        let prebuilt = dir.path().join("pants-client");
        std::fs::write(&prebuilt, "").unwrap();

        let bootstrapper = CargoBootstrapper::new(dir.path().join("missing"), "pants", dir.path())
            .with_prebuilt(Some(prebuilt.clone()));

        let binary = bootstrapper.bootstrap().await.unwrap();
        assert_eq!(binary.path, prebuilt);
        assert_eq!(binary.fingerprint, PREBUILT_FINGERPRINT);
    }

    #[tokio::test]
    async fn test_bootstrap_prebuilt_missing() {
        let dir = TempDir::new().unwrap();
        let bootstrapper = CargoBootstrapper::new(dir.path().to_path_buf(), "pants", dir.path())
            .with_prebuilt(Some(dir.path().join("nope")));

        let result = bootstrapper.bootstrap().await;
        assert!(matches!(result, Err(NativeBuildError::PrebuiltMissing(_))));
    }

    #[tokio::test]
    async fn test_bootstrap_missing_sources() {
        let cache = TempDir::new().unwrap();
        let bootstrapper = CargoBootstrapper::new(
            cache.path().join("no-sources"),
            "pants",
            cache.path(),
        );

        let result = bootstrapper.bootstrap().await;
        assert!(matches!(result, Err(NativeBuildError::SourcesNotFound(_))));
    }
}
