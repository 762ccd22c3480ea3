//! Dispatch with fallback.
//!
//! ```text
//! START ──► NATIVE_ATTEMPT ──► DONE
//!   │            │ EX_TEMPFAIL
//!   │            ▼
//!   └──────► FALLBACK_ATTEMPT ──► DONE
//!   (native client disabled)
//! ```
//!
//! `START` validates the debug settings before anything else, then resolves
//! the interpreter, activates the virtualenv and bootstraps the native
//! client. Any failure there ends the dispatch with an error and nothing has
//! been spawned. The native client runs as a child. Only
//! [`EX_TEMPFAIL`](crate::protocol::EX_TEMPFAIL) sends the command on to the
//! Python entrypoint, which is returned as a [`TerminalCommand`] for the
//! caller to exec; there is no second fallback.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use log::{info, warn};
use pants_bootstrap::{NativeBootstrapper, NativeClientBinary};
use pants_env::{ActivatedRuntime, EnvironmentResolver, RuntimeActivator};

use crate::config::LauncherConfig;
use crate::debug::DebugInjector;
use crate::error::LaunchResult;
use crate::invocation::Invocation;
use crate::process::{CommandLine, ProcessRunner, TerminalCommand};
use crate::protocol::ClientExit;

/// Marks the Python process as running from uninstalled sources.
pub const FROM_SOURCES_MARKER: &str = "RUNNING_PANTS_FROM_SOURCES";

/// Suppresses the advisory about not running from a scie package.
pub const NO_SCIE_WARNING_MARKER: &str = "NO_SCIE_WARNING";

/// Markers exported to the Python entrypoint, and only to it.
pub const FALLBACK_MARKERS: &[(&str, &str)] =
    &[(FROM_SOURCES_MARKER, "1"), (NO_SCIE_WARNING_MARKER, "1")];

/// What the launcher must do once dispatch has finished.
#[derive(Debug)]
pub enum Dispatch {
    /// Exit with this code.
    Exit(i32),
    /// Replace the launcher with this command.
    Replace(TerminalCommand),
}

/// Dispatch settings taken from the launcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub debug: bool,
    pub no_native_client: bool,
    pub prepend_args: Vec<OsString>,
    pub source_root: PathBuf,
    pub entrypoint: PathBuf,
    pub debugger: DebugInjector,
}

impl DispatchOptions {
    pub fn from_config(config: &LauncherConfig) -> Self {
        Self {
            debug: config.debug,
            no_native_client: config.no_native_client,
            prepend_args: config.prepend_args.clone(),
            source_root: config.source_root(),
            entrypoint: config.entrypoint(),
            debugger: DebugInjector::default(),
        }
    }
}

/// Chooses between the native client and the Python entrypoint.
pub struct Dispatcher<R, A, B, P> {
    resolver: R,
    activator: A,
    bootstrapper: B,
    runner: P,
    options: DispatchOptions,
}

impl<R, A, B, P> Dispatcher<R, A, B, P>
where
    R: EnvironmentResolver,
    A: RuntimeActivator,
    B: NativeBootstrapper,
    P: ProcessRunner,
{
    pub fn new(
        resolver: R,
        activator: A,
        bootstrapper: B,
        runner: P,
        options: DispatchOptions,
    ) -> Self {
        Self {
            resolver,
            activator,
            bootstrapper,
            runner,
            options,
        }
    }

    /// Run the state machine for `invocation`.
    pub async fn dispatch(&self, invocation: Invocation) -> LaunchResult<Dispatch> {
        // Contradictory settings must fail before anything is built
        let invocation = self.options.debugger.apply(invocation, self.options.debug)?;

        let selection = self.resolver.resolve();
        info!(
            "[dispatch] Interpreter {} with constraints {:?}",
            selection.interpreter, selection.constraints
        );
        let runtime = self.activator.activate(&selection).await?;
        let client = self.bootstrapper.bootstrap().await?;

        if self.options.no_native_client {
            info!("[dispatch] Native client disabled, using the Python entrypoint");
        } else {
            let command = native_command(&client, &invocation);
            match ClientExit::from_code(self.runner.run(&command).await?) {
                ClientExit::Completed(code) => return Ok(Dispatch::Exit(code)),
                ClientExit::NeedsFallback => {
                    info!(
                        "[dispatch] Native client could not proceed, \
                         falling back to the Python entrypoint"
                    );
                }
            }
        }

        if self.options.debug {
            eprintln!("{}", self.options.debugger.notice());
        }
        Ok(Dispatch::Replace(self.fallback_command(&runtime, &invocation)))
    }

    /// The Python entrypoint command for `invocation`.
    ///
    /// `<python> <launcher args> <prepend args> <entrypoint> <args>`
    pub fn fallback_command(
        &self,
        runtime: &ActivatedRuntime,
        invocation: &Invocation,
    ) -> TerminalCommand {
        let mut args = invocation.launcher_args.clone();
        args.extend(self.options.prepend_args.iter().cloned());
        args.push(self.options.entrypoint.clone().into_os_string());
        args.extend(invocation.args.iter().cloned());

        let mut env = invocation.env.clone();
        let python_path =
            prepend_search_path(&self.options.source_root, env.get(OsStr::new("PYTHONPATH")));
        env.insert("PYTHONPATH".into(), python_path);
        for (key, value) in FALLBACK_MARKERS {
            env.insert((*key).into(), (*value).into());
        }

        TerminalCommand::new(CommandLine {
            program: runtime.python_path.clone(),
            args,
            env,
        })
    }
}

/// The native client command for `invocation`.
pub fn native_command(client: &NativeClientBinary, invocation: &Invocation) -> CommandLine {
    CommandLine {
        program: client.path.clone(),
        args: invocation.args.clone(),
        env: invocation.env.clone(),
    }
}

/// `root` followed by the entries of `existing`.
fn prepend_search_path(root: &Path, existing: Option<&OsString>) -> OsString {
    let existing: Vec<PathBuf> = existing
        .map(|value| std::env::split_paths(value).collect())
        .unwrap_or_default();

    std::env::join_paths(std::iter::once(root.to_path_buf()).chain(existing)).unwrap_or_else(|e| {
        warn!("[dispatch] Ignoring existing PYTHONPATH: {}", e);
        root.as_os_str().to_owned()
    })
}
