//! The phase driver.
//!
//! One `JobRunner` takes a job from environment setup through plugin
//! checkout, source checkout, the command, artifact upload, and
//! teardown. Two error variables never mix: a *phase error* means the
//! executor (or a hook) failed and wins the exit code; a *command error*
//! is the user's own non-zero exit, reported through
//! `BUILDKITE_COMMAND_EXIT_STATUS` while post-command, artifact, and
//! pre-exit work still runs. `pre-exit` hooks run exactly once per job,
//! no matter what came before.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::api::JobApiServer;
use crate::artifact;
use crate::cancel::CancelToken;
use crate::checkout::{self, CheckoutOptions};
use crate::config::JobConfig;
use crate::control::ControlPlane;
use crate::env::Environment;
use crate::errors::{HookError, PhaseError, SignalReason};
use crate::hook::{self, Hook, HookScope};
use crate::logstream::{DEFAULT_MAX_CHUNK_SIZE, DEFAULT_UPLOADER_CONCURRENCY, LogStreamer};
use crate::plugin::{
    CheckedOutPlugin, PluginCheckoutOptions, PluginDescriptor, checkout_plugins,
};
use crate::redact::{RedactorHandle, values_to_redact};
use crate::shell::{RunOpts, Shell};

const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";
/// Log marker that tells the UI to expand the current group.
const EXPAND_GROUP: &str = "^^^ +++";

/// The phases a caller may restrict a job to. Environment setup and
/// pre-exit teardown always run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPhase {
    Plugin,
    Checkout,
    Command,
}

impl std::str::FromStr for JobPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "plugin" => Ok(JobPhase::Plugin),
            "checkout" => Ok(JobPhase::Checkout),
            "command" => Ok(JobPhase::Command),
            other => Err(anyhow!("unknown phase {other:?} (expected plugin, checkout or command)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRunnerOptions {
    /// Restrict to a subset of {plugin, checkout, command}.
    pub phases: Option<HashSet<JobPhase>>,
    pub max_chunk_size: usize,
    pub upload_interval: Duration,
    pub uploader_concurrency: usize,
}

impl Default for JobRunnerOptions {
    fn default() -> Self {
        Self {
            phases: None,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            upload_interval: Duration::from_secs(1),
            uploader_concurrency: DEFAULT_UPLOADER_CONCURRENCY,
        }
    }
}

/// What the process should do once the job is over.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub exit_code: i32,
    pub signal_reason: SignalReason,
    pub failed_chunks: usize,
}

pub struct JobRunner {
    config: JobConfig,
    control: Arc<dyn ControlPlane>,
    options: JobRunnerOptions,
}

/// Mutable state threaded through the phases.
struct JobState {
    shell: Shell,
    plugins: Vec<CheckedOutPlugin>,
    /// Vendored descriptors wait for the source checkout to exist.
    pending_vendored: Vec<PluginDescriptor>,
    phase_error: Option<PhaseError>,
    command_ran: bool,
    command_signaled: bool,
}

impl JobRunner {
    pub fn new(config: JobConfig, control: Arc<dyn ControlPlane>, options: JobRunnerOptions) -> Self {
        Self {
            config,
            control,
            options,
        }
    }

    fn phase_enabled(&self, phase: JobPhase) -> bool {
        self.options
            .phases
            .as_ref()
            .map(|set| set.contains(&phase))
            .unwrap_or(true)
    }

    /// Run the job to completion and report the result. The seed is the
    /// job environment the control plane dispatched.
    pub async fn run(&self, seed: Environment, cancel: CancelToken) -> Result<JobResult> {
        self.control
            .start_job(&self.config.job_id)
            .await
            .context("reporting job start")?;

        // Log pipeline: redactor -> chunker -> bounded queue -> uploaders.
        let streamer = Arc::new(LogStreamer::start(
            Arc::clone(&self.control),
            &self.config.job_id,
            self.options.max_chunk_size,
            self.options.uploader_concurrency,
        ));
        let secrets = values_to_redact(&self.config.redacted_var_names, &seed);
        let redactor = RedactorHandle::new(Box::new(streamer.sink()), secrets);

        let flusher = {
            let streamer = Arc::clone(&streamer);
            let mut redactor = redactor.clone();
            let interval = self.options.upload_interval;
            tokio::spawn(async move {
                use std::io::Write;
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = redactor.flush() {
                        tracing::warn!(error = %e, "log flush failed");
                    }
                    if let Err(e) = streamer.flush_partial().await {
                        tracing::warn!(error = %e, "log upload enqueue failed");
                        break;
                    }
                }
            })
        };

        std::fs::create_dir_all(&self.config.build_path)
            .with_context(|| format!("creating build path {}", self.config.build_path.display()))?;
        let shell = Shell::new(
            self.prepare_env(seed),
            self.config.build_path.clone(),
            redactor.clone(),
            cancel.clone(),
            self.config.flags.cancel_grace_period,
        );

        let api = self.start_job_api(&shell, &redactor).await;

        let mut state = JobState {
            shell: shell.clone(),
            plugins: Vec::new(),
            pending_vendored: Vec::new(),
            phase_error: None,
            command_ran: false,
            command_signaled: false,
        };

        self.run_phases(&mut state).await;

        // Teardown: pre-exit always runs, then the API dies, then the log
        // tail drains.
        self.preexit_phase(&mut state).await;

        if cancel.is_cancelled() {
            shell.writeln("Job was interrupted by a signal");
        }

        if let Some(api) = api {
            api.stop().await;
        }
        flusher.abort();
        let _ = flusher.await;
        if let Err(e) = redactor.finish() {
            tracing::warn!(error = %e, "failed to flush redactor tail");
        }
        drop(redactor);
        let streamer = Arc::try_unwrap(streamer)
            .map_err(|_| anyhow!("log streamer still shared at teardown"))?;
        let failed_chunks = streamer.finish().await;

        let exit_code = self.final_exit_code(&state);
        let signal_reason = if cancel.is_cancelled() {
            SignalReason::Cancelled
        } else if state.command_signaled {
            SignalReason::ProcessSignaled
        } else {
            SignalReason::None
        };

        self.control
            .finish_job(&self.config.job_id, exit_code, signal_reason, failed_chunks)
            .await
            .context("reporting job finish")?;

        Ok(JobResult {
            exit_code,
            signal_reason,
            failed_chunks,
        })
    }

    /// Seed plus the executor's own contributions.
    fn prepare_env(&self, mut env: Environment) -> Environment {
        env.set(
            "BUILDKITE_BUILD_CHECKOUT_PATH",
            &self.config.checkout_path.to_string_lossy(),
        );
        if !self.config.binaries_path.as_os_str().is_empty() {
            let path = env.get("PATH").unwrap_or_default();
            let sep = if cfg!(windows) { ';' } else { ':' };
            env.set(
                "PATH",
                &format!("{}{}{}", self.config.binaries_path.display(), sep, path),
            );
        }
        env
    }

    async fn start_job_api(&self, shell: &Shell, redactor: &RedactorHandle) -> Option<JobApiServer> {
        #[cfg(not(unix))]
        {
            let _ = (shell, redactor);
            return None;
        }
        #[cfg(unix)]
        {
            match JobApiServer::start(
                &self.config.sockets_path,
                shell.clone(),
                redactor.clone(),
                self.config.protected_env_keys(),
            )
            .await
            {
                Ok(api) => {
                    shell.env_set(crate::api::ENV_SOCKET, &api.socket_path().to_string_lossy());
                    shell.env_set(crate::api::ENV_TOKEN, api.token());
                    // If the token variable's name matches a redaction
                    // pattern, the token value must never hit the log.
                    let matches_pattern = self.config.redacted_var_names.iter().any(|p| {
                        glob::Pattern::new(p)
                            .map(|pat| pat.matches(crate::api::ENV_TOKEN))
                            .unwrap_or(false)
                    });
                    if matches_pattern {
                        if let Err(e) = redactor.add_secret(api.token()) {
                            tracing::warn!(error = %e, "could not redact job api token");
                        }
                    }
                    Some(api)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "job api unavailable for this job");
                    None
                }
            }
        }
    }

    async fn run_phases(&self, state: &mut JobState) {
        self.environment_phase(state).await;

        if self.clear_to_proceed(state) && self.phase_enabled(JobPhase::Plugin) {
            let result = self.plugin_phase(state).await;
            self.record(state, result);
        }
        if self.clear_to_proceed(state)
            && self.phase_enabled(JobPhase::Checkout)
            && !self.config.repo.is_empty()
        {
            let result = self.checkout_phase(state).await;
            self.record(state, result);
        }
        if self.clear_to_proceed(state) && self.phase_enabled(JobPhase::Command) {
            let result = self.command_phase(state).await;
            self.record(state, result);
        }
        if self.clear_to_proceed(state) && state.command_ran {
            let result = self.artifact_phase(state).await;
            self.record(state, result);
        }
    }

    /// A phase starts only when nothing failed before it and the job is
    /// not cancelled. `pre-exit` does not go through this gate.
    fn clear_to_proceed(&self, state: &mut JobState) -> bool {
        if state.phase_error.is_some() {
            return false;
        }
        if state.shell.cancel_token().is_cancelled() {
            state.phase_error = Some(PhaseError::Cancelled);
            return false;
        }
        true
    }

    /// Record the first phase error, with the red banner and the group
    /// expansion marker the UI keys off.
    fn record(&self, state: &mut JobState, result: Result<(), PhaseError>) {
        if let Err(e) = result {
            if !e.is_cancelled() {
                state.shell.writeln(EXPAND_GROUP);
                state.shell.writeln(&format!("{RED}Error: {e}{RESET}"));
            }
            state.phase_error = Some(e);
        }
    }

    async fn environment_phase(&self, state: &mut JobState) {
        if !self.config.ignored_env.is_empty() {
            state.shell.writeln(&format!(
                "Some environment variables were ignored because they are protected: {}",
                self.config.ignored_env.join(", "),
            ));
        }
        let result = self
            .run_scope_hook(state, HookScope::Agent, "environment")
            .await
            .map_err(PhaseError::from);
        self.record(state, result);
    }

    async fn plugin_phase(&self, state: &mut JobState) -> Result<(), PhaseError> {
        if self.config.plugins_json.trim().is_empty() {
            return Ok(());
        }
        let descriptors = PluginDescriptor::parse_list(&self.config.plugins_json)?;
        if descriptors.is_empty() {
            return Ok(());
        }

        state.shell.writeln("~~~ Setting up plugins");
        for descriptor in &descriptors {
            let derived = descriptor.configuration_env();
            for (old, new) in &derived.deprecations {
                state.shell.writeln(&format!(
                    "Deprecated environment variable name {old}; use {new} instead",
                ));
            }
            state.shell.with_env(|env| {
                for (k, v) in &derived.vars {
                    env.set(k, v);
                }
            });
        }

        let (vendored, remote): (Vec<_>, Vec<_>) =
            descriptors.into_iter().partition(|d| d.vendored);
        state.pending_vendored = vendored;

        let checkouts = checkout_plugins(&state.shell, &remote, &self.plugin_options()).await?;
        state.plugins = checkouts;

        for plugin in state.plugins.clone() {
            self.run_plugin_hook(state, &plugin, "environment").await?;
        }
        Ok(())
    }

    fn plugin_options(&self) -> PluginCheckoutOptions {
        let mut opts = PluginCheckoutOptions::new(
            self.config.plugins_path.clone(),
            self.config.checkout_path.clone(),
        );
        opts.always_clone_fresh = self.config.flags.plugins_always_clone_fresh;
        opts.validate = self.config.flags.plugin_validation;
        opts.ssh_keyscan = self.config.flags.ssh_keyscan;
        opts.git_submodules = self.config.flags.git_submodules;
        opts
    }

    async fn checkout_phase(&self, state: &mut JobState) -> Result<(), PhaseError> {
        self.run_scope_hook(state, HookScope::Agent, "pre-checkout").await?;
        self.run_all_plugin_hooks(state, "pre-checkout").await?;

        // Exactly one of plugin hook / agent hook / default checkout.
        state.shell.writeln("~~~ Preparing build directory");
        if self.run_one_plugin_hook(state, "checkout").await? {
            // plugin-provided checkout
        } else if self.run_scope_hook_if_found(state, HookScope::Agent, "checkout").await? {
            // operator-provided checkout
        } else {
            checkout::run_default_checkout(
                &state.shell,
                self.control.as_ref(),
                &self.config.job_id,
                &self.checkout_options(),
            )
            .await?;
        }

        // Hook-driven checkouts are expected to leave the tree at the
        // checkout path; position the shell there if it now exists.
        let wd = state.shell.wd();
        if wd != self.config.checkout_path && self.config.checkout_path.is_dir() {
            state
                .shell
                .chdir(&self.config.checkout_path)
                .map_err(PhaseError::Other)?;
        }

        self.run_scope_hook(state, HookScope::Agent, "post-checkout").await?;
        self.run_local_hook(state, "post-checkout").await?;
        self.run_all_plugin_hooks(state, "post-checkout").await?;

        // Vendored plugins only exist now that the source tree does.
        if !state.pending_vendored.is_empty() {
            let vendored = std::mem::take(&mut state.pending_vendored);
            let checkouts =
                checkout_plugins(&state.shell, &vendored, &self.plugin_options()).await?;
            for plugin in &checkouts {
                self.run_plugin_hook(state, plugin, "environment").await?;
            }
            state.plugins.extend(checkouts);
        }
        Ok(())
    }

    fn checkout_options(&self) -> CheckoutOptions {
        CheckoutOptions {
            repo: self.config.repo.clone(),
            commit: self.config.commit.clone(),
            branch: self.config.branch.clone(),
            refspec: self.config.refspec.clone(),
            pull_request: self.config.pull_request.clone(),
            pipeline_provider: self.config.pipeline_provider.clone(),
            checkout_path: self.config.checkout_path.clone(),
            mirror_path: self.config.mirror_path.clone(),
            clone_flags: self.config.flags.git_clone_flags.clone(),
            clean_flags: self.config.flags.git_clean_flags.clone(),
            fetch_flags: self.config.flags.git_fetch_flags.clone(),
            submodules: self.config.flags.git_submodules,
            ssh_keyscan: self.config.flags.ssh_keyscan,
            clean_checkout: self.config.flags.clean_checkout,
            send_commit_metadata: !self.config.access_token.is_empty(),
            mirror_lock_timeout: Duration::from_secs(5 * 60),
        }
    }

    async fn command_phase(&self, state: &mut JobState) -> Result<(), PhaseError> {
        self.run_scope_hook(state, HookScope::Agent, "pre-command").await?;
        self.run_local_hook(state, "pre-command").await?;
        self.run_all_plugin_hooks(state, "pre-command").await?;

        state.command_ran = true;
        let command_result = self.run_command(state).await;

        match command_result {
            Ok(()) => {}
            // The user's command failing is not an executor failure:
            // record the status, keep going.
            Err(PhaseError::Hook(HookError::Exit { code, .. })) => {
                state
                    .shell
                    .env_set("BUILDKITE_COMMAND_EXIT_STATUS", &code.to_string());
                let shell = state.shell.clone();
                shell.writeln(EXPAND_GROUP);
                shell.writeln(&format!("{RED}The command exited with status {code}{RESET}"));
            }
            Err(other) => return Err(other),
        }

        self.run_scope_hook(state, HookScope::Agent, "post-command").await?;
        self.run_local_hook(state, "post-command").await?;
        self.run_all_plugin_hooks(state, "post-command").await?;
        Ok(())
    }

    /// Exactly one of plugin / local / agent command hook, or the
    /// default runner.
    async fn run_command(&self, state: &mut JobState) -> Result<(), PhaseError> {
        if self.run_one_plugin_hook(state, "command").await? {
            return Ok(());
        }
        if !self.local_hooks_disabled(state) {
            if let Some(dir) = self.local_hooks_dir(state) {
                if let Some(path) = hook::find_hook(&dir, "command") {
                    let hook = Hook::new("command", path, HookScope::Local);
                    self.run_found_hook(state, &hook).await?;
                    return Ok(());
                }
            }
        }
        if self.run_scope_hook_if_found(state, HookScope::Agent, "command").await? {
            return Ok(());
        }
        self.run_default_command(state).await
    }

    async fn run_default_command(&self, state: &mut JobState) -> Result<(), PhaseError> {
        let command = self.config.command.trim().to_string();
        if command.is_empty() {
            return Ok(());
        }
        state.shell.writeln("~~~ Running commands");
        state.shell.writeln(&format!("$ {command}"));
        state.shell.env_set("BUILDKITE_COMMAND_EXIT_STATUS", "0");

        // A hook may have toggled command eval off mid-job; honor the
        // current environment, not the seed.
        let eval_disabled = state
            .shell
            .env_get("BUILDKITE_NO_COMMAND_EVAL")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes"))
            .unwrap_or(self.config.flags.no_command_eval);

        let outcome = if eval_disabled {
            let script = self.resolve_in_checkout_script(state, &command)?;
            state
                .shell
                .run(&script.to_string_lossy(), &[], RunOpts::default())
                .await
                .map_err(PhaseError::Other)?
        } else {
            state
                .shell
                .run_command_line(&command, RunOpts::default())
                .await
                .map_err(PhaseError::Other)?
        };

        state.command_signaled = outcome.signaled;
        if outcome.code != 0 {
            return Err(PhaseError::Hook(HookError::Exit {
                hook: "command".to_string(),
                code: outcome.code,
            }));
        }
        Ok(())
    }

    /// With command eval disabled the command must name a script inside
    /// the checkout; anything else is a path-safety violation.
    fn resolve_in_checkout_script(
        &self,
        state: &JobState,
        command: &str,
    ) -> Result<PathBuf, PhaseError> {
        let candidate = state.shell.wd().join(command);
        let resolved = candidate.canonicalize().map_err(|_| {
            PhaseError::Other(anyhow!(
                "command evaluation is disabled and {command:?} is not a file in the checkout"
            ))
        })?;
        let root = self
            .config
            .checkout_path
            .canonicalize()
            .map_err(|e| PhaseError::Other(anyhow!("cannot resolve checkout dir: {e}")))?;
        if !resolved.starts_with(&root) || !resolved.is_file() {
            return Err(PhaseError::Other(anyhow!(
                "command evaluation is disabled and {command:?} does not resolve to a script inside the checkout"
            )));
        }
        Ok(resolved)
    }

    async fn artifact_phase(&self, state: &mut JobState) -> Result<(), PhaseError> {
        let result = self.artifact_phase_inner(state).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                // A failing command already owns the exit code; losing
                // artifacts on top of that is reported, not fatal.
                if self.command_exit_status(state) != 0 {
                    state
                        .shell
                        .writeln(&format!("Artifact upload failed after a command error: {e}"));
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn artifact_phase_inner(&self, state: &mut JobState) -> Result<(), PhaseError> {
        self.run_scope_hook(state, HookScope::Agent, "pre-artifact").await?;
        self.run_local_hook(state, "pre-artifact").await?;
        self.run_all_plugin_hooks(state, "pre-artifact").await?;

        state.shell.writeln("~~~ Uploading artifacts");
        artifact::upload_artifacts(
            &state.shell,
            self.control.as_ref(),
            &self.config.job_id,
            &self.config.flags.artifact_paths,
            &self.config.flags.artifact_upload_destination,
        )
        .await
        .map_err(PhaseError::Other)?;

        self.run_scope_hook(state, HookScope::Agent, "post-artifact").await?;
        self.run_local_hook(state, "post-artifact").await?;
        self.run_all_plugin_hooks(state, "post-artifact").await?;
        Ok(())
    }

    /// Always runs; failures are written to the log and dropped.
    async fn preexit_phase(&self, state: &mut JobState) {
        if let Err(e) = self.run_scope_hook(state, HookScope::Agent, "pre-exit").await {
            state.shell.writeln(&format!("{RED}Error in pre-exit hook: {e}{RESET}"));
        }
        if let Err(e) = self.run_local_hook(state, "pre-exit").await {
            state.shell.writeln(&format!("{RED}Error in pre-exit hook: {e}{RESET}"));
        }
        for plugin in state.plugins.clone() {
            if let Err(e) = self.run_plugin_hook(state, &plugin, "pre-exit").await {
                state.shell.writeln(&format!("{RED}Error in pre-exit hook: {e}{RESET}"));
            }
        }
    }

    fn command_exit_status(&self, state: &JobState) -> i32 {
        state
            .shell
            .env_get("BUILDKITE_COMMAND_EXIT_STATUS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn final_exit_code(&self, state: &JobState) -> i32 {
        match &state.phase_error {
            Some(e) => e.exit_code(),
            // Advisory by design: whatever value is present at the end of
            // the job wins, even if a post-command hook rewrote it.
            None => self.command_exit_status(state),
        }
    }

    // ---- hook plumbing -------------------------------------------------

    fn local_hooks_disabled(&self, state: &JobState) -> bool {
        state
            .shell
            .env_get("BUILDKITE_NO_LOCAL_HOOKS")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes"))
            .unwrap_or(self.config.flags.no_local_hooks)
    }

    fn local_hooks_dir(&self, _state: &JobState) -> Option<PathBuf> {
        let dir = self.config.checkout_path.join(".buildkite").join("hooks");
        dir.is_dir().then_some(dir)
    }

    /// Agent-scope hook; missing hooks are a no-op.
    async fn run_scope_hook(
        &self,
        state: &mut JobState,
        scope: HookScope,
        name: &str,
    ) -> Result<(), HookError> {
        self.run_scope_hook_if_found(state, scope, name).await.map(|_| ())
    }

    async fn run_scope_hook_if_found(
        &self,
        state: &mut JobState,
        scope: HookScope,
        name: &str,
    ) -> Result<bool, HookError> {
        if self.config.hooks_path.as_os_str().is_empty() {
            return Ok(false);
        }
        let Some(path) = hook::find_hook(&self.config.hooks_path, name) else {
            return Ok(false);
        };
        let hook = Hook::new(name, path, scope);
        self.run_found_hook(state, &hook).await?;
        Ok(true)
    }

    async fn run_local_hook(&self, state: &mut JobState, name: &str) -> Result<(), HookError> {
        if self.local_hooks_disabled(state) {
            return Ok(());
        }
        let Some(dir) = self.local_hooks_dir(state) else {
            return Ok(());
        };
        let Some(path) = hook::find_hook(&dir, name) else {
            return Ok(());
        };
        let hook = Hook::new(name, path, HookScope::Local);
        self.run_found_hook(state, &hook).await
    }

    async fn run_plugin_hook(
        &self,
        state: &mut JobState,
        plugin: &CheckedOutPlugin,
        name: &str,
    ) -> Result<(), HookError> {
        let Some(path) = hook::find_hook(&plugin.hooks_dir, name) else {
            return Ok(());
        };
        let hook = Hook::new(name, path, HookScope::Plugin);
        self.run_found_hook(state, &hook).await
    }

    async fn run_all_plugin_hooks(&self, state: &mut JobState, name: &str) -> Result<(), HookError> {
        for plugin in state.plugins.clone() {
            self.run_plugin_hook(state, &plugin, name).await?;
        }
        Ok(())
    }

    /// First plugin that ships the hook runs it; reports whether one did.
    async fn run_one_plugin_hook(&self, state: &mut JobState, name: &str) -> Result<bool, HookError> {
        for plugin in state.plugins.clone() {
            if hook::find_hook(&plugin.hooks_dir, name).is_some() {
                self.run_plugin_hook(state, &plugin, name).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn run_found_hook(&self, state: &mut JobState, hook: &Hook) -> Result<(), HookError> {
        state.shell.writeln(&format!(
            "~~~ Running {} {} hook ({})",
            hook.scope, hook.name, hook.display
        ));
        hook::run_hook(&state.shell, hook, &hook.name).await
    }
}
