//! Remote debugging of the Python entrypoint.
//!
//! With `PANTS_DEBUG` set, the Python entrypoint is started under `debugpy`,
//! which listens for a debugger and blocks until one attaches. The daemon
//! would run the command in another process, so `--no-pantsd` is mandatory.

use std::ffi::OsString;

use crate::config::env_keys;
use crate::error::ConfigurationError;
use crate::invocation::Invocation;

/// Flag that disables the background daemon.
pub const NO_DAEMON_FLAG: &str = "--no-pantsd";

/// Default debugpy listen host.
pub const DEFAULT_DEBUG_HOST: &str = "127.0.0.1";

/// Default debugpy listen port.
pub const DEFAULT_DEBUG_PORT: u16 = 5678;

/// Adds debugger-launcher arguments to an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInjector {
    pub host: String,
    pub port: u16,
}

impl Default for DebugInjector {
    fn default() -> Self {
        Self {
            host: DEFAULT_DEBUG_HOST.to_string(),
            port: DEFAULT_DEBUG_PORT,
        }
    }
}

impl DebugInjector {
    /// Interpreter arguments that start debugpy and wait for a client.
    pub fn launcher_args(&self) -> Vec<OsString> {
        vec![
            "-m".into(),
            "debugpy".into(),
            "--listen".into(),
            format!("{}:{}", self.host, self.port).into(),
            "--wait-for-client".into(),
        ]
    }

    /// Return `invocation`, prefixed with the debugger launcher when
    /// `requested`.
    pub fn apply(
        &self,
        mut invocation: Invocation,
        requested: bool,
    ) -> Result<Invocation, ConfigurationError> {
        if !requested {
            return Ok(invocation);
        }

        if !invocation.has_arg(NO_DAEMON_FLAG) {
            return Err(ConfigurationError::DebugRequiresNoDaemon {
                flag: NO_DAEMON_FLAG,
                variable: env_keys::DEBUG,
            });
        }

        let mut launcher_args = self.launcher_args();
        launcher_args.append(&mut invocation.launcher_args);
        invocation.launcher_args = launcher_args;

        Ok(invocation)
    }

    /// Told to the user when the debugger is actually started.
    pub fn notice(&self) -> String {
        format!(
            "Will launch debugpy server at '{}:{}' waiting for client connection.",
            self.host, self.port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvMap;

    fn invocation(values: &[&str]) -> Invocation {
        Invocation::new(values.iter().map(OsString::from).collect(), EnvMap::new())
    }

    #[test]
    fn test_not_requested_is_unchanged() {
        let original = invocation(&["test", "::"]);
        let result = DebugInjector::default().apply(original.clone(), false).unwrap();
        assert_eq!(result, original);
    }

    #[test]
    fn test_requires_no_daemon_flag() {
        let result = DebugInjector::default().apply(invocation(&["test", "::"]), true);
        match result {
            Err(e @ ConfigurationError::DebugRequiresNoDaemon { .. }) => {
                assert_eq!(
                    e.to_string(),
                    "Must pass '--no-pantsd' when using PANTS_DEBUG"
                );
            }
            other => panic!("expected DebugRequiresNoDaemon, got {:?}", other),
        }
    }

    #[test]
    fn test_prepends_debugger_arguments() {
        let result = DebugInjector::default()
            .apply(invocation(&["--no-pantsd", "test", "::"]), true)
            .unwrap();

        let launcher_args: Vec<String> = result
            .launcher_args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            launcher_args,
            vec![
                "-m",
                "debugpy",
                "--listen",
                "127.0.0.1:5678",
                "--wait-for-client",
            ]
        );
        // The user's own arguments are untouched
        assert_eq!(result.args, invocation(&["--no-pantsd", "test", "::"]).args);
    }

    #[test]
    fn test_custom_listen_address() {
        let injector = DebugInjector {
            host: "0.0.0.0".to_string(),
            port: 9000,
        };
        let args = injector.launcher_args();
        assert_eq!(args[3], OsString::from("0.0.0.0:9000"));
        assert_eq!(
            injector.notice(),
            "Will launch debugpy server at '0.0.0.0:9000' waiting for client connection."
        );
    }
}
