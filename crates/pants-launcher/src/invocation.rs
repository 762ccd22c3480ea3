//! The user's command as forwarded to either execution path.

use std::ffi::OsString;

use crate::config::EnvMap;

/// Arguments and environment forwarded to the native client or the Python
/// entrypoint.
///
/// `launcher_args` are interpreter-side arguments (the debugger launcher)
/// placed before everything else. Only the debug injector adds to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub launcher_args: Vec<OsString>,
    pub args: Vec<OsString>,
    pub env: EnvMap,
}

impl Invocation {
    pub fn new(args: Vec<OsString>, env: EnvMap) -> Self {
        Self {
            launcher_args: Vec::new(),
            args,
            env,
        }
    }

    /// Whether `flag` was passed verbatim.
    pub fn has_arg(&self, flag: &str) -> bool {
        self.args.iter().any(|arg| arg == flag)
    }
}
