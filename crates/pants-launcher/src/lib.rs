//! pants-launcher - Runs Pants from live sources.
//!
//! The launcher prepares the development interpreter and the native client,
//! then runs the native client. If the native client exits with
//! [`protocol::EX_TEMPFAIL`] the command is handed to the Python entrypoint,
//! which replaces the launcher process.

pub mod config;
pub mod debug;
pub mod dispatch;
pub mod error;
pub mod invocation;
pub mod process;
pub mod protocol;

pub use config::{EnvMap, LauncherConfig};
pub use debug::DebugInjector;
pub use dispatch::{Dispatch, DispatchOptions, Dispatcher, FALLBACK_MARKERS};
pub use error::{ConfigurationError, LaunchError, LaunchResult};
pub use invocation::Invocation;
pub use process::{CommandLine, ProcessRunner, SystemRunner, TerminalCommand};
pub use protocol::{ClientExit, EX_TEMPFAIL};
