//! Job configuration.
//!
//! The executor is handed one job as a set of `BUILDKITE_*` environment
//! variables (the seed). This module turns the seed into a typed
//! `JobConfig` up front, so a malformed job fails before any phase runs,
//! and owns the derived bits: the checkout path layout, the protected
//! environment keys, and the default redaction patterns.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::env::Environment;
use crate::shell::split_flags;
use crate::util::slugify;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
}

/// Variable-name patterns whose values are always redacted from job
/// logs, unless the operator overrides the list.
pub const DEFAULT_REDACTED_VARS: &[&str] = &[
    "*_PASSWORD",
    "*_SECRET",
    "*_TOKEN",
    "*_PRIVATE_KEY",
    "*_ACCESS_KEY",
    "*_SECRET_KEY",
    "*_CONNECTION_STRING",
];

/// Operator- and pipeline-supplied behavior switches.
#[derive(Debug, Clone)]
pub struct ExecutorFlags {
    pub clean_checkout: bool,
    pub git_clone_flags: Vec<String>,
    pub git_clean_flags: Vec<String>,
    pub git_fetch_flags: Vec<String>,
    pub git_submodules: bool,
    pub ssh_keyscan: bool,
    pub artifact_paths: String,
    pub artifact_upload_destination: String,
    pub no_local_hooks: bool,
    pub no_command_eval: bool,
    pub plugins_always_clone_fresh: bool,
    pub plugin_validation: bool,
    pub cancel_grace_period: Duration,
}

/// The immutable job descriptor, extracted from the seed.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub job_id: String,
    pub access_token: String,
    pub command: String,
    pub repo: String,
    pub commit: String,
    pub branch: String,
    pub refspec: String,
    pub pull_request: Option<String>,
    pub pipeline_provider: String,
    pub plugins_json: String,
    pub hooks_path: PathBuf,
    pub plugins_path: PathBuf,
    pub build_path: PathBuf,
    pub binaries_path: PathBuf,
    pub mirror_path: Option<PathBuf>,
    pub sockets_path: PathBuf,
    pub checkout_path: PathBuf,
    pub agent_name: String,
    pub organization_slug: String,
    pub pipeline_slug: String,
    pub redacted_var_names: Vec<String>,
    /// Protected variables the pipeline tried to set; surfaced as a
    /// warning at the start of the job.
    pub ignored_env: Vec<String>,
    pub flags: ExecutorFlags,
}

fn var(env: &Environment, key: &str) -> String {
    env.get(&format!("BUILDKITE_{key}")).unwrap_or_default().to_string()
}

fn var_opt(env: &Environment, key: &str) -> Option<String> {
    env.get(&format!("BUILDKITE_{key}"))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn var_bool(env: &Environment, key: &str, default: bool) -> bool {
    match env.get(&format!("BUILDKITE_{key}")) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes"),
        None => default,
    }
}

impl JobConfig {
    /// Build the descriptor from the seed environment. Fails fast on
    /// missing essentials; everything else has a sensible default.
    pub fn from_env(env: &Environment) -> Result<Self, ConfigError> {
        let job_id = var_opt(env, "JOB_ID").ok_or(ConfigError::Missing("BUILDKITE_JOB_ID"))?;
        let build_path = var_opt(env, "BUILD_PATH")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("BUILDKITE_BUILD_PATH"))?;

        let agent_name = var(env, "AGENT_NAME");
        let organization_slug = var(env, "ORGANIZATION_SLUG");
        let pipeline_slug = var(env, "PIPELINE_SLUG");

        let checkout_path = var_opt(env, "BUILD_CHECKOUT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                build_path
                    .join(slugify(&agent_name))
                    .join(&organization_slug)
                    .join(&pipeline_slug)
            });

        let redacted_var_names = match var_opt(env, "REDACTED_VARS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_REDACTED_VARS.iter().map(|s| s.to_string()).collect(),
        };

        let ignored_env = var(env, "IGNORED_ENV")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let grace_secs = var_opt(env, "CANCEL_GRACE_PERIOD")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);

        let flags = ExecutorFlags {
            clean_checkout: var_bool(env, "CLEAN_CHECKOUT", false),
            git_clone_flags: split_flags(&var(env, "GIT_CLONE_FLAGS")),
            git_clean_flags: split_flags(
                &var_opt(env, "GIT_CLEAN_FLAGS").unwrap_or_else(|| "-ffxdq".to_string()),
            ),
            git_fetch_flags: split_flags(&var(env, "GIT_FETCH_FLAGS")),
            git_submodules: var_bool(env, "GIT_SUBMODULES", true),
            ssh_keyscan: var_bool(env, "SSH_KEYSCAN", false),
            artifact_paths: var(env, "ARTIFACT_PATHS"),
            artifact_upload_destination: var(env, "ARTIFACT_UPLOAD_DESTINATION"),
            no_local_hooks: var_bool(env, "NO_LOCAL_HOOKS", false),
            no_command_eval: var_bool(env, "NO_COMMAND_EVAL", false),
            plugins_always_clone_fresh: var_bool(env, "PLUGINS_ALWAYS_CLONE_FRESH", false),
            plugin_validation: var_bool(env, "PLUGIN_VALIDATION", false),
            cancel_grace_period: Duration::from_secs(grace_secs),
        };

        Ok(Self {
            job_id,
            access_token: var(env, "AGENT_ACCESS_TOKEN"),
            command: var(env, "COMMAND"),
            repo: var(env, "REPO"),
            commit: var(env, "COMMIT"),
            branch: var(env, "BRANCH"),
            refspec: var(env, "REFSPEC"),
            pull_request: var_opt(env, "PULL_REQUEST").filter(|v| v != "false"),
            pipeline_provider: var(env, "PIPELINE_PROVIDER"),
            plugins_json: var(env, "PLUGINS"),
            hooks_path: PathBuf::from(var(env, "HOOKS_PATH")),
            plugins_path: PathBuf::from(var_opt(env, "PLUGINS_PATH").unwrap_or_else(|| "plugins".to_string())),
            build_path,
            binaries_path: PathBuf::from(var(env, "BIN_PATH")),
            mirror_path: var_opt(env, "GIT_MIRRORS_PATH").map(PathBuf::from),
            sockets_path: var_opt(env, "SOCKETS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            checkout_path,
            agent_name,
            organization_slug,
            pipeline_slug,
            redacted_var_names,
            ignored_env,
            flags,
        })
    }

    /// Environment keys the pipeline and Job API may never touch.
    pub fn protected_env_keys(&self) -> HashSet<String> {
        let mut keys: HashSet<String> = [
            "BUILDKITE_AGENT_ACCESS_TOKEN",
            crate::api::ENV_SOCKET,
            crate::api::ENV_TOKEN,
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        keys.extend(self.ignored_env.iter().cloned());
        keys
    }
}
