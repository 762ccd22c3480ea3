//! Lookup of the external tools the launcher shells out to.
//!
//! `uv` is optional (virtualenv creation falls back to `python -m venv`),
//! `cargo` is required to build the native client. Lookups are cached for the
//! lifetime of the process.

use log::{debug, info};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tokio::sync::OnceCell;

/// Cache entries unused for this long are removed when a new one is built.
pub const CACHE_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default cache root for everything the launcher builds.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("pants")
}

/// Record a use of a cache entry by bumping `path`'s modification time.
pub fn touch(path: &Path) -> std::io::Result<()> {
    std::fs::OpenOptions::new()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}

/// Remove the entries of `dir` last used more than `max_age` ago.
///
/// An entry's last use is the modification time of `anchor(entry)`, or of
/// the entry itself when the anchor does not exist (partial builds). `keep`
/// is never removed. Failures are logged and skipped. Returns the number of
/// entries removed.
pub async fn prune_unused<F>(dir: &Path, keep: &Path, max_age: Duration, anchor: F) -> usize
where
    F: Fn(&Path) -> PathBuf,
{
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path == keep {
            continue;
        }

        let metadata = match tokio::fs::metadata(anchor(&path)).await {
            Ok(metadata) => metadata,
            Err(_) => match tokio::fs::symlink_metadata(&path).await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            },
        };
        let unused_for = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .unwrap_or_default();
        if unused_for < max_age {
            continue;
        }

        let result = if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => debug!("[cache] Could not remove {:?}: {}", path, e),
        }
    }

    if removed > 0 {
        info!("[cache] Pruned {} unused entries from {:?}", removed, dir);
    }
    removed
}

/// Name of an executable on the current platform.
pub fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// A `Stdio` that writes into this process's stderr.
///
/// Used for child processes whose stdout must never reach the launcher's own
/// stdout.
pub fn stderr_stdio() -> std::io::Result<Stdio> {
    #[cfg(unix)]
    {
        use std::os::fd::AsFd;
        let fd = std::io::stderr().as_fd().try_clone_to_owned()?;
        Ok(Stdio::from(fd))
    }
    #[cfg(windows)]
    {
        use std::os::windows::io::AsHandle;
        let handle = std::io::stderr().as_handle().try_clone_to_owned()?;
        Ok(Stdio::from(handle))
    }
}

/// Check that a binary runs and answers `--version`.
async fn responds_to_version(binary: &Path) -> bool {
    match tokio::process::Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
    {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout);
            debug!(
                "{:?} reports {}",
                binary,
                version.lines().next().unwrap_or("unknown").trim()
            );
            true
        }
        _ => false,
    }
}

async fn find_tool(name: &str) -> Option<PathBuf> {
    let path = which::which(name).ok()?;
    if responds_to_version(&path).await {
        info!("Using system {} at {:?}", name, path);
        Some(path)
    } else {
        info!("{} found at {:?} but did not run, ignoring it", name, path);
        None
    }
}

static UV_PATH: OnceCell<Option<PathBuf>> = OnceCell::const_new();

/// Path to `uv` if it is installed and runs.
pub async fn find_uv() -> Option<PathBuf> {
    UV_PATH.get_or_init(|| find_tool("uv")).await.clone()
}

static CARGO_PATH: OnceCell<Option<PathBuf>> = OnceCell::const_new();

/// Path to `cargo` if it is installed and runs.
pub async fn find_cargo() -> Option<PathBuf> {
    CARGO_PATH.get_or_init(|| find_tool("cargo")).await.clone()
}
