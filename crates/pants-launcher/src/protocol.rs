//! Exit-code contract between the launcher and the native client.
//!
//! The native client only talks to an already running daemon. When none is
//! running it exits with [`EX_TEMPFAIL`] instead of starting one, and the
//! launcher hands the command to the Python entrypoint, which knows how to
//! start the daemon. Every other exit code is the command's own.

/// `EX_TEMPFAIL` from `sysexits.h`: the native client cannot proceed.
pub const EX_TEMPFAIL: i32 = 75;

/// How the native client's exit should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// The command ran; this is its exit code.
    Completed(i32),
    /// Retry through the Python entrypoint.
    NeedsFallback,
}

impl ClientExit {
    pub fn from_code(code: i32) -> Self {
        if code == EX_TEMPFAIL {
            ClientExit::NeedsFallback
        } else {
            ClientExit::Completed(code)
        }
    }
}

/// Exit code of a finished process, using the shell's `128 + signal`
/// convention for processes killed by a signal.
pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_needs_fallback() {
        assert_eq!(ClientExit::from_code(EX_TEMPFAIL), ClientExit::NeedsFallback);
    }

    #[test]
    fn test_other_codes_are_final() {
        for code in [0, 1, 2, 74, 76, 127, 130, 255, -1] {
            assert_eq!(ClientExit::from_code(code), ClientExit::Completed(code));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_from_status() {
        use std::os::unix::process::ExitStatusExt;

        // Raw wait statuses: exit code in the high byte, signal in the low bits
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(75 << 8)), 75);
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(9)), 137);
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(2)), 130);
    }
}
