//! Interpreter selection.
//!
//! Turns the interpreter overrides and host information into a
//! [`RuntimeSelection`]. Resolution is pure: the same overrides on the same
//! host always produce the same selection.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Interpreter pinned on ARM macOS hosts unless overridden.
pub const MACOS_ARM_INTERPRETER: &str = "python3.9";

/// Constraint applied on ARM macOS hosts unless overridden.
pub const MACOS_ARM_CONSTRAINT: &str = "==3.9.*";

/// Interpreter used when nothing else is specified.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Interpreters tried, newest first, when the preferred one does not
/// satisfy the constraints.
pub const SEARCH_INTERPRETERS: &[&str] = &[
    "python3.13",
    "python3.12",
    "python3.11",
    "python3.10",
    "python3.9",
    "python3.8",
];

/// Operating system and CPU architecture of the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatform {
    pub os: String,
    pub arch: String,
}

impl HostPlatform {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    pub fn is_macos_arm(&self) -> bool {
        self.os == "macos" && self.arch == "aarch64"
    }
}

/// Caller-supplied interpreter overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterpreterOverrides {
    /// Interpreter name or path (`PY`).
    pub interpreter: Option<String>,
    /// Raw constraint value (`PANTS_PYTHON_INTERPRETER_CONSTRAINTS`).
    pub constraints: Option<String>,
}

/// The interpreter to build the runtime with, and the versions it may have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSelection {
    /// Preferred interpreter (name on PATH or a path).
    pub interpreter: String,
    /// Further interpreters to try if the preferred one is missing or does
    /// not satisfy the constraints. Empty when the interpreter was overridden.
    pub search: Vec<String>,
    /// Alternative constraints; a version is accepted if any one matches.
    /// Each alternative may AND several comma-separated specifiers.
    pub constraints: Vec<String>,
}

impl RuntimeSelection {
    /// Interpreters to try, in order.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.interpreter.as_str()).chain(
            self.search
                .iter()
                .map(String::as_str)
                .filter(move |c| *c != self.interpreter),
        )
    }

    /// Whether `version` satisfies the constraints.
    pub fn accepts(&self, version: &PythonVersion) -> bool {
        if self.constraints.is_empty() {
            return true;
        }
        self.constraints
            .iter()
            .any(|alternative| alternative_accepts(alternative, version))
    }
}

/// Produces the runtime selection for this invocation.
pub trait EnvironmentResolver {
    fn resolve(&self) -> RuntimeSelection;
}

/// Resolves from explicit overrides and host information.
#[derive(Debug, Clone)]
pub struct HostResolver {
    pub overrides: InterpreterOverrides,
    pub host: HostPlatform,
}

impl HostResolver {
    pub fn new(overrides: InterpreterOverrides, host: HostPlatform) -> Self {
        Self { overrides, host }
    }
}

impl EnvironmentResolver for HostResolver {
    fn resolve(&self) -> RuntimeSelection {
        let macos_arm = self.host.is_macos_arm();

        let (interpreter, search) = match &self.overrides.interpreter {
            Some(py) => (py.clone(), Vec::new()),
            None => {
                let preferred = if macos_arm {
                    MACOS_ARM_INTERPRETER
                } else {
                    DEFAULT_INTERPRETER
                };
                let search = SEARCH_INTERPRETERS.iter().map(|s| s.to_string()).collect();
                (preferred.to_string(), search)
            }
        };

        let constraints = match &self.overrides.constraints {
            Some(raw) => parse_constraints(raw),
            None if macos_arm => vec![MACOS_ARM_CONSTRAINT.to_string()],
            None => Vec::new(),
        };

        RuntimeSelection {
            interpreter,
            search,
            constraints,
        }
    }
}

/// Parse an interpreter constraint value.
///
/// Accepts a Python list literal (`['==3.9.*', '>=3.11']`, elements are
/// alternatives) or a bare constraint (`>=3.9,<3.10`).
pub fn parse_constraints(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        let mut items = Vec::new();
        let mut current = String::new();
        let mut quote: Option<char> = None;
        for c in inner.chars() {
            match quote {
                Some(q) if c == q => {
                    quote = None;
                    let item = current.trim().to_string();
                    if !item.is_empty() {
                        items.push(item);
                    }
                    current.clear();
                }
                Some(_) => current.push(c),
                None if c == '\'' || c == '"' => quote = Some(c),
                None => {}
            }
        }
        items
    } else if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![trimmed.to_string()]
    }
}

/// A concrete `major.minor.patch` interpreter version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PythonVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl PythonVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `3.9.18`, `3.9`, or `Python 3.9.18`.
    pub fn parse(text: &str) -> Option<Self> {
        let token = text
            .split_whitespace()
            .find(|s| s.starts_with(|c: char| c.is_ascii_digit()))?;
        let mut parts = token.split('.').map(|p| p.parse::<u64>().ok());
        let major = parts.next()??;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }

    fn components(&self) -> [u64; 3] {
        [self.major, self.minor, self.patch]
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn alternative_accepts(alternative: &str, version: &PythonVersion) -> bool {
    // Implementation prefix (`CPython==3.9.*`) carries no version information
    let spec = alternative.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|specifier| match specifier_accepts(specifier, version) {
            Some(ok) => ok,
            None => {
                warn!("Ignoring unrecognised interpreter constraint {specifier:?}");
                true
            }
        })
}

/// Evaluate one PEP 440 style specifier. `None` if it cannot be parsed.
fn specifier_accepts(specifier: &str, version: &PythonVersion) -> Option<bool> {
    const OPERATORS: &[&str] = &["===", "==", "!=", "~=", ">=", "<=", ">", "<"];
    let op = OPERATORS.iter().find(|op| specifier.starts_with(**op))?;
    let rest = specifier[op.len()..].trim();

    let (rest, wildcard) = match rest.strip_suffix(".*") {
        Some(prefix) => (prefix, true),
        None => (rest, false),
    };
    let wanted = rest
        .split('.')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if wanted.is_empty() || wanted.len() > 3 {
        return None;
    }

    let actual = version.components();
    let prefix_matches = actual[..wanted.len()] == wanted[..];
    let mut padded = [0u64; 3];
    padded[..wanted.len()].copy_from_slice(&wanted);
    let ordering = actual.cmp(&padded);

    Some(match (*op, wildcard) {
        ("==", true) => prefix_matches,
        ("!=", true) => !prefix_matches,
        ("==", false) | ("===", false) => ordering.is_eq(),
        ("!=", false) => !ordering.is_eq(),
        (">=", false) => ordering.is_ge(),
        ("<=", false) => ordering.is_le(),
        (">", false) => ordering.is_gt(),
        ("<", false) => ordering.is_lt(),
        ("~=", false) if wanted.len() >= 2 => {
            ordering.is_ge() && actual[..wanted.len() - 1] == wanted[..wanted.len() - 1]
        }
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(os: &str, arch: &str) -> HostPlatform {
        HostPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }

    fn selection(constraints: &[&str]) -> RuntimeSelection {
        RuntimeSelection {
            interpreter: "python3".to_string(),
            search: Vec::new(),
            constraints: constraints.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_macos_arm_defaults() {
        let resolver = HostResolver::new(InterpreterOverrides::default(), host("macos", "aarch64"));
        let selection = resolver.resolve();
        assert_eq!(selection.interpreter, MACOS_ARM_INTERPRETER);
        assert_eq!(selection.constraints, vec![MACOS_ARM_CONSTRAINT.to_string()]);
    }

    #[test]
    fn test_constraint_override_wins_on_macos_arm() {
        let overrides = InterpreterOverrides {
            interpreter: None,
            constraints: Some("['==3.11.*']".to_string()),
        };
        let resolver = HostResolver::new(overrides, host("macos", "aarch64"));
        assert_eq!(resolver.resolve().constraints, vec!["==3.11.*".to_string()]);
    }

    #[test]
    fn test_interpreter_override_disables_search() {
        let overrides = InterpreterOverrides {
            interpreter: Some("/opt/python/bin/python3.10".to_string()),
            constraints: None,
        };
        let resolver = HostResolver::new(overrides, host("linux", "x86_64"));
        let selection = resolver.resolve();
        assert_eq!(selection.interpreter, "/opt/python/bin/python3.10");
        assert!(selection.search.is_empty());
        assert!(selection.constraints.is_empty());
    }

    #[test]
    fn test_other_hosts_unconstrained() {
        for (os, arch) in [("linux", "x86_64"), ("linux", "aarch64"), ("macos", "x86_64")] {
            let resolver = HostResolver::new(InterpreterOverrides::default(), host(os, arch));
            let selection = resolver.resolve();
            assert_eq!(selection.interpreter, DEFAULT_INTERPRETER);
            assert!(selection.constraints.is_empty(), "{os}/{arch}");
        }
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let resolver = HostResolver::new(InterpreterOverrides::default(), host("linux", "x86_64"));
        assert_eq!(resolver.resolve(), resolver.resolve());
    }

    #[test]
    fn test_candidates_order_without_duplicates() {
        let selection = RuntimeSelection {
            interpreter: "python3.9".to_string(),
            search: vec!["python3.10".to_string(), "python3.9".to_string()],
            constraints: Vec::new(),
        };
        let candidates: Vec<_> = selection.candidates().collect();
        assert_eq!(candidates, vec!["python3.9", "python3.10"]);
    }

    #[test]
    fn test_parse_constraints() {
        assert_eq!(parse_constraints("['==3.9.*']"), vec!["==3.9.*"]);
        assert_eq!(
            parse_constraints("[\"CPython>=3.9,<3.10\", '==3.11.*']"),
            vec!["CPython>=3.9,<3.10", "==3.11.*"]
        );
        assert_eq!(parse_constraints(">=3.9,<3.10"), vec![">=3.9,<3.10"]);
        assert!(parse_constraints("  ").is_empty());
        assert!(parse_constraints("[]").is_empty());
    }

    #[test]
    fn test_parse_python_version() {
        assert_eq!(PythonVersion::parse("3.9.18"), Some(PythonVersion::new(3, 9, 18)));
        assert_eq!(PythonVersion::parse("Python 3.11.4"), Some(PythonVersion::new(3, 11, 4)));
        assert_eq!(PythonVersion::parse("3.12"), Some(PythonVersion::new(3, 12, 0)));
        assert_eq!(PythonVersion::parse("not a version"), None);
        assert_eq!(PythonVersion::parse(""), None);
    }

    #[test]
    fn test_accepts_wildcard() {
        let sel = selection(&["==3.9.*"]);
        assert!(sel.accepts(&PythonVersion::new(3, 9, 18)));
        assert!(!sel.accepts(&PythonVersion::new(3, 10, 0)));
    }

    #[test]
    fn test_accepts_range_and_alternatives() {
        let sel = selection(&[">=3.8,<3.10", "CPython==3.11.*"]);
        assert!(sel.accepts(&PythonVersion::new(3, 8, 0)));
        assert!(sel.accepts(&PythonVersion::new(3, 9, 5)));
        assert!(!sel.accepts(&PythonVersion::new(3, 10, 1)));
        assert!(sel.accepts(&PythonVersion::new(3, 11, 2)));
        assert!(!sel.accepts(&PythonVersion::new(3, 7, 9)));
    }

    #[test]
    fn test_accepts_compatible_release() {
        let sel = selection(&["~=3.9"]);
        assert!(sel.accepts(&PythonVersion::new(3, 9, 0)));
        assert!(sel.accepts(&PythonVersion::new(3, 12, 0)));
        assert!(!sel.accepts(&PythonVersion::new(4, 0, 0)));
        assert!(!sel.accepts(&PythonVersion::new(3, 8, 10)));
    }

    #[test]
    fn test_accepts_without_constraints() {
        assert!(selection(&[]).accepts(&PythonVersion::new(2, 7, 18)));
    }

    #[test]
    fn test_unrecognised_specifier_is_ignored() {
        let sel = selection(&["==3.9.*,@weird"]);
        assert!(sel.accepts(&PythonVersion::new(3, 9, 1)));
        assert!(!sel.accepts(&PythonVersion::new(3, 10, 1)));
    }
}
