//! Running the two execution paths.
//!
//! The native client is a child process: the launcher waits for it and reads
//! its exit code. The Python entrypoint replaces the launcher altogether, so
//! it is modelled as a [`TerminalCommand`] whose successful result is
//! uninhabited.

use std::convert::Infallible;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use log::debug;

use crate::config::EnvMap;
use crate::error::{LaunchError, LaunchResult};
use crate::protocol::exit_code;

/// A fully specified command. The environment replaces, not extends, the
/// launcher's own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: EnvMap,
}

impl CommandLine {
    fn to_std(&self) -> std::process::Command {
        let mut command = std::process::Command::new(&self.program);
        command.args(&self.args).env_clear().envs(&self.env);
        command
    }
}

/// Runs a child process to completion.
#[allow(async_fn_in_trait)]
pub trait ProcessRunner {
    /// Run `command` with inherited stdio and return its exit code.
    async fn run(&self, command: &CommandLine) -> LaunchResult<i32>;
}

/// Runs real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    async fn run(&self, command: &CommandLine) -> LaunchResult<i32> {
        debug!("[dispatch] Running {:?} {:?}", command.program, command.args);

        let status = tokio::process::Command::from(command.to_std())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| LaunchError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        Ok(exit_code(status))
    }
}

/// A command that takes over the launcher process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalCommand(CommandLine);

impl TerminalCommand {
    pub fn new(command: CommandLine) -> Self {
        Self(command)
    }

    pub fn command(&self) -> &CommandLine {
        &self.0
    }

    /// Replace the current process with this command.
    ///
    /// Only returns if the replacement could not be started.
    #[cfg(unix)]
    pub fn exec(self) -> LaunchResult<Infallible> {
        use std::os::unix::process::CommandExt;

        debug!("[dispatch] Exec {:?} {:?}", self.0.program, self.0.args);
        let source = self.0.to_std().exec();
        Err(LaunchError::Exec {
            program: self.0.program,
            source,
        })
    }

    /// Run this command and exit with its exit code.
    ///
    /// Only returns if the command could not be started.
    #[cfg(not(unix))]
    pub fn exec(self) -> LaunchResult<Infallible> {
        debug!("[dispatch] Running {:?} {:?} to completion", self.0.program, self.0.args);
        let status = self
            .0
            .to_std()
            .status()
            .map_err(|source| LaunchError::Exec {
                program: self.0.program.clone(),
                source,
            })?;
        std::process::exit(exit_code(status))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandLine {
        let mut env = EnvMap::new();
        env.insert("PATH".into(), "/usr/bin:/bin".into());
        CommandLine {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into()],
            env,
        }
    }

    #[tokio::test]
    async fn test_run_returns_exit_code() {
        assert_eq!(SystemRunner.run(&sh("exit 0")).await.unwrap(), 0);
        assert_eq!(SystemRunner.run(&sh("exit 3")).await.unwrap(), 3);
        assert_eq!(SystemRunner.run(&sh("exit 75")).await.unwrap(), 75);
    }

    #[tokio::test]
    async fn test_run_signal_maps_to_shell_convention() {
        let code = SystemRunner.run(&sh("kill -9 $$")).await.unwrap();
        assert_eq!(code, 137);
    }

    #[tokio::test]
    async fn test_run_uses_only_given_environment() {
        let mut command = sh("test \"$ONLY_THIS\" = yes && test -z \"$HOME\"");
        command.env.insert("ONLY_THIS".into(), "yes".into());
        assert_eq!(SystemRunner.run(&command).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let command = CommandLine {
            program: PathBuf::from("/nonexistent/native-client"),
            args: Vec::new(),
            env: EnvMap::new(),
        };
        let result = SystemRunner.run(&command).await;
        assert!(matches!(result, Err(LaunchError::Spawn { .. })));
    }

    #[test]
    fn test_exec_missing_program_returns_error() {
        let command = TerminalCommand::new(CommandLine {
            program: PathBuf::from("/nonexistent/python"),
            args: vec!["pants_loader.py".into()],
            env: EnvMap::new(),
        });
        let result = command.exec();
        assert!(matches!(result, Err(LaunchError::Exec { .. })));
    }
}
