//! Hook discovery and execution.
//!
//! A hook is an executable the operator, repository, or a plugin drops at
//! a well-known path. Plain shell scripts are "sourced" through a wrapper
//! so the env mutations and directory changes they make carry forward to
//! later phases (see `wrapper`); binaries and shebang scripts run
//! directly and keep their environment to themselves.

mod envdump;
mod wrapper;

pub use wrapper::run_hook;

use std::path::{Path, PathBuf};

/// Wrapper-internal variable holding the sourced hook's exit status.
pub const HOOK_EXIT_STATUS_KEY: &str = "HOOK_EXIT_STATUS";
/// Wrapper-internal variable holding the post-hook working directory.
pub const HOOK_WORKING_DIR_KEY: &str = "HOOK_WORKING_DIR";

/// Where a hook came from. Scope is surfaced to the hook itself (via
/// `HOOK_SCOPE`) and in log headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookScope {
    /// Operator-installed, from the agent's hooks path.
    Agent,
    /// From the checked-out repository (`.buildkite/hooks`).
    Local,
    /// From a plugin checkout.
    Plugin,
}

impl std::fmt::Display for HookScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HookScope::Agent => "agent",
            HookScope::Local => "local",
            HookScope::Plugin => "plugin",
        };
        f.write_str(s)
    }
}

/// A discovered hook, ready to run.
#[derive(Debug, Clone)]
pub struct Hook {
    /// Hook name, e.g. `pre-command`.
    pub name: String,
    pub path: PathBuf,
    pub scope: HookScope,
    /// Label shown in the job log. Relative where that reads better; the
    /// absolute `path` is what actually executes.
    pub display: String,
}

impl Hook {
    pub fn new(name: &str, path: PathBuf, scope: HookScope) -> Self {
        let display = path.to_string_lossy().into_owned();
        Self {
            name: name.to_string(),
            path,
            scope,
            display,
        }
    }
}

/// What kind of executable a hook file is, decided by its leading bytes
/// (and extension on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Plain shell script: sourced through the wrapper.
    ShellScript,
    /// `#!` script: executed directly, env changes not captured.
    ShebangScript,
    /// Compiled executable: executed directly.
    Binary,
    /// Windows batch file: wrapped with CALL semantics.
    Batch,
}

/// Probe the hook file to classify how it must be invoked.
pub fn classify(path: &Path) -> std::io::Result<HookKind> {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let ext = ext.to_ascii_lowercase();
        if ext == "bat" || ext == "cmd" {
            return Ok(HookKind::Batch);
        }
        if ext == "ps1" {
            return Ok(HookKind::ShebangScript);
        }
    }

    // The leading bytes are enough to classify; no point slurping a
    // large binary.
    use std::io::Read;
    let mut head = [0u8; 8];
    let n = std::fs::File::open(path)?.read(&mut head)?;
    let head = &head[..n];
    if head.starts_with(b"#!") {
        return Ok(HookKind::ShebangScript);
    }
    if is_binary_magic(head) {
        return Ok(HookKind::Binary);
    }
    Ok(HookKind::ShellScript)
}

/// ELF, Mach-O (both endiannesses, fat binaries) and PE magic numbers.
fn is_binary_magic(bytes: &[u8]) -> bool {
    const MAGICS: [&[u8]; 6] = [
        b"\x7fELF",
        b"\xfe\xed\xfa\xce",
        b"\xfe\xed\xfa\xcf",
        b"\xcf\xfa\xed\xfe",
        b"\xca\xfe\xba\xbe",
        b"MZ",
    ];
    MAGICS.iter().any(|m| bytes.starts_with(m))
}

/// Windows probes the scriptable extensions; POSIX takes the bare name.
#[cfg(windows)]
const HOOK_EXTENSIONS: &[&str] = &["", ".bat", ".cmd", ".ps1", ".exe"];
#[cfg(not(windows))]
const HOOK_EXTENSIONS: &[&str] = &[""];

/// Look for a hook called `name` in `dir`.
pub fn find_hook(dir: &Path, name: &str) -> Option<PathBuf> {
    for ext in HOOK_EXTENSIONS {
        let candidate = dir.join(format!("{name}{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
