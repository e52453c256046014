//! Typed error hierarchy for the job executor.
//!
//! Four enums cover the failure domains:
//! - `HookError` — wrapped-hook exits and hook infrastructure failures
//! - `GitError` — git subprocess failures, subtyped for retry policy
//! - `PluginError` — plugin parsing, locking, checkout and validation
//! - `PhaseError` — the funnel the phase driver records and maps to an
//!   exit code
//!
//! A user command exiting non-zero is deliberately NOT an error type: it
//! is captured as a plain exit status and only influences the final exit
//! code (see `job`).

use std::path::PathBuf;

use thiserror::Error;

/// Errors from running a single hook.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook itself ran and exited non-zero. Carries the code so the
    /// job can exit with it.
    #[error("hook \"{hook}\" exited with status {code}")]
    Exit { hook: String, code: i32 },

    #[error("failed to write hook wrapper at {path}: {source}")]
    WrapperWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read environment dump at {path}: {source}")]
    EnvDumpRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to make {path} executable: {source}")]
    Chmod {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn hook \"{hook}\": {source}")]
    Spawn {
        hook: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to apply changes from hook \"{hook}\": {message}")]
    Apply { hook: String, message: String },

    /// Windows cannot source interpreter scripts; only .bat/.cmd/.ps1 or
    /// compiled binaries are supported there.
    #[error("hook {path} has a shebang line, which is not supported on Windows")]
    ShebangOnWindows { path: PathBuf },
}

impl HookError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            HookError::Exit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Which git operation failed. The subtype drives the checkout retry
/// policy: local-corruption subtypes are healed with a wipe-and-retry,
/// the rest surface immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitOp {
    Clone,
    Fetch,
    Checkout,
    Clean,
    CleanSubmodules,
    Other,
}

impl GitOp {
    /// Subtypes where removing the checkout dir and cloning fresh is a
    /// plausible fix.
    pub fn is_recoverable(self) -> bool {
        matches!(self, GitOp::Clone | GitOp::Clean | GitOp::CleanSubmodules)
    }
}

impl std::fmt::Display for GitOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GitOp::Clone => "clone",
            GitOp::Fetch => "fetch",
            GitOp::Checkout => "checkout",
            GitOp::Clean => "clean",
            GitOp::CleanSubmodules => "clean-submodules",
            GitOp::Other => "other",
        };
        f.write_str(s)
    }
}

/// A git subprocess failure.
#[derive(Debug, Error)]
#[error("git {op} failed{}: {message}", .code.map(|c| format!(" (exit {c})")).unwrap_or_default())]
pub struct GitError {
    pub op: GitOp,
    pub code: Option<i32>,
    pub message: String,
}

impl GitError {
    pub fn new(op: GitOp, code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            op,
            code,
            message: message.into(),
        }
    }
}

/// Errors from the plugin engine.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to parse plugin JSON: {0}")]
    Parse(String),

    #[error("plugin location {location:?} has more than one \"#\"")]
    TooManyVersionSeparators { location: String },

    #[error("timed out waiting for plugin lock at {path}")]
    LockTimeout { path: PathBuf },

    /// Vendored plugins must live inside the source checkout.
    #[error("vendored plugin {location:?} resolves outside the checkout directory")]
    OutsideCheckout { location: String },

    #[error("failed to read plugin definition at {path}: {message}")]
    Definition { path: PathBuf, message: String },

    /// Aggregated schema/requirement failures for one plugin.
    #[error("plugin {plugin} validation failed:\n{}", .errors.join("\n"))]
    Validation { plugin: String, errors: Vec<String> },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The funnel recorded by the phase driver. The first `PhaseError` of a
/// job decides the final exit code; user-command exits never appear here.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Exit code used when a cancelled job has no better answer. 130 is the
/// conventional 128+SIGINT value.
pub const EXIT_CODE_CANCELLED: i32 = 130;

impl PhaseError {
    /// Map the error to the process exit code per the error-scope rules:
    /// a hook or git subprocess exit keeps its code, cancellation gets the
    /// interrupt code, anything else is 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            PhaseError::Hook(e) => e.exit_code().unwrap_or(1),
            PhaseError::Git(e) => e.code.unwrap_or(1),
            PhaseError::Cancelled => EXIT_CODE_CANCELLED,
            _ => 1,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PhaseError::Cancelled)
    }
}

/// Why a job ended abnormally, reported alongside the exit status so the
/// control plane can distinguish retry-worthy terminations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalReason {
    None,
    Cancelled,
    ProcessSignaled,
}

impl SignalReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalReason::None => "",
            SignalReason::Cancelled => "cancelled",
            SignalReason::ProcessSignaled => "process_signaled",
        }
    }
}
