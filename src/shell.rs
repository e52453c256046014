//! The job's shell context.
//!
//! One `Shell` lives for the whole job. It owns the environment map and
//! working directory that hooks mutate, the redacted writer every child's
//! output flows through, and the interrupt ladder used on cancellation:
//! SIGINT, a grace period, SIGTERM, then a hard kill. Exactly one child
//! runs at any instant.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::cancel::CancelToken;
use crate::env::Environment;
use crate::redact::RedactorHandle;

/// Default time between the polite interrupt and the SIGTERM escalation.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// How a child process ended.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub code: i32,
    pub signaled: bool,
    /// Stdout, only when the run captured instead of streaming.
    pub captured: Option<String>,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.code == 0 && !self.signaled
    }
}

/// Options for one child run.
#[derive(Debug, Default)]
pub struct RunOpts {
    /// Extra variables layered over the shell env for this child only.
    pub extra_env: Vec<(String, String)>,
    /// Working directory override; defaults to the shell's.
    pub dir: Option<PathBuf>,
    /// Capture stdout instead of streaming it into the job log. Stderr is
    /// still streamed.
    pub capture: bool,
}

/// Cloneable: the Job API server holds a clone and mutates the same
/// environment the phase task reads.
#[derive(Clone)]
pub struct Shell {
    env: Arc<Mutex<Environment>>,
    wd: Arc<Mutex<PathBuf>>,
    sink: RedactorHandle,
    cancel: CancelToken,
    grace_period: Duration,
    current_pid: Arc<Mutex<Option<u32>>>,
}

impl Shell {
    pub fn new(
        env: Environment,
        wd: PathBuf,
        sink: RedactorHandle,
        cancel: CancelToken,
        grace_period: Duration,
    ) -> Self {
        Self {
            env: Arc::new(Mutex::new(env)),
            wd: Arc::new(Mutex::new(wd)),
            sink,
            cancel,
            grace_period,
            current_pid: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `f` with the environment locked. Keep it short; children are
    /// configured under the same lock.
    pub fn with_env<T>(&self, f: impl FnOnce(&mut Environment) -> T) -> T {
        f(&mut self.env.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn env_snapshot(&self) -> Environment {
        self.with_env(|env| env.clone())
    }

    pub fn env_get(&self, key: &str) -> Option<String> {
        self.with_env(|env| env.get(key).map(str::to_string))
    }

    pub fn env_set(&self, key: &str, value: &str) {
        self.with_env(|env| env.set(key, value));
    }

    pub fn apply_env(&self, diff: &crate::env::EnvDiff) {
        self.with_env(|env| env.apply(diff));
    }

    pub fn wd(&self) -> PathBuf {
        self.wd.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sink(&self) -> RedactorHandle {
        self.sink.clone()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Change the shell's working directory. The directory must exist:
    /// hooks report their post-run directory and a bogus one is a hook
    /// bug worth surfacing early.
    pub fn chdir(&self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            bail!("cannot change working directory to {}: not a directory", dir.display());
        }
        *self.wd.lock().unwrap_or_else(|e| e.into_inner()) = dir.to_path_buf();
        Ok(())
    }

    /// Write a line of executor commentary into the job log.
    pub fn writeln(&self, line: &str) {
        let mut sink = self.sink.clone();
        if let Err(e) = sink.write_all(line.as_bytes()).and_then(|_| sink.write_all(b"\n")) {
            tracing::warn!(error = %e, "failed to write to job log");
        }
    }

    /// Run a program argv-style. No shell is involved, so operator flag
    /// strings must be split with `split_flags` first.
    pub async fn run(&self, program: &str, args: &[String], opts: RunOpts) -> Result<ProcessOutcome> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.configure(&mut cmd, &opts);
        self.spawn_and_wait(cmd, program, opts.capture).await
    }

    /// Run a user command line through the host shell (`sh -c` on POSIX).
    pub async fn run_command_line(&self, line: &str, opts: RunOpts) -> Result<ProcessOutcome> {
        let (program, pre_args) = host_shell();
        let mut cmd = Command::new(program);
        cmd.args(pre_args).arg(line);
        self.configure(&mut cmd, &opts);
        self.spawn_and_wait(cmd, program, opts.capture).await
    }

    fn configure(&self, cmd: &mut Command, opts: &RunOpts) {
        cmd.env_clear();
        self.with_env(|env| {
            for (k, v) in env.iter() {
                cmd.env(k, v);
            }
        });
        for (k, v) in &opts.extra_env {
            cmd.env(k, v);
        }
        cmd.current_dir(opts.dir.clone().unwrap_or_else(|| self.wd()));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
    }

    async fn spawn_and_wait(
        &self,
        mut cmd: Command,
        program: &str,
        capture: bool,
    ) -> Result<ProcessOutcome> {
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;
        *self.current_pid.lock().unwrap_or_else(|e| e.into_inner()) = child.id();

        let stdout = child.stdout.take().context("child had no stdout")?;
        let stderr = child.stderr.take().context("child had no stderr")?;

        let captured = Arc::new(Mutex::new(String::new()));
        let out_task = if capture {
            let captured = Arc::clone(&captured);
            tokio::spawn(pump_captured(stdout, captured))
        } else {
            tokio::spawn(pump_streamed(stdout, self.sink.clone()))
        };
        let err_task = tokio::spawn(pump_streamed(stderr, self.sink.clone()));

        let (status, signaled) = self.wait_with_interrupt(&mut child).await?;
        let _ = out_task.await;
        let _ = err_task.await;
        *self.current_pid.lock().unwrap_or_else(|e| e.into_inner()) = None;

        let code = exit_code(&status);
        Ok(ProcessOutcome {
            code,
            signaled: signaled || status.code().is_none(),
            captured: capture.then(|| {
                std::mem::take(&mut *captured.lock().unwrap_or_else(|e| e.into_inner()))
            }),
        })
    }

    /// Wait for the child, escalating signals if the job is cancelled:
    /// interrupt, grace period, terminate, short wait, kill.
    async fn wait_with_interrupt(
        &self,
        child: &mut tokio::process::Child,
    ) -> Result<(std::process::ExitStatus, bool)> {
        tokio::select! {
            status = child.wait() => {
                return Ok((status.context("failed waiting for child")?, false));
            }
            _ = self.cancel.cancelled() => {}
        }

        tracing::info!("cancellation observed, interrupting current child");
        self.signal_current(InterruptKind::Interrupt);
        tokio::select! {
            status = child.wait() => {
                return Ok((status.context("failed waiting for child")?, true));
            }
            _ = tokio::time::sleep(self.grace_period) => {}
        }

        self.signal_current(InterruptKind::Terminate);
        tokio::select! {
            status = child.wait() => {
                return Ok((status.context("failed waiting for child")?, true));
            }
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }

        child.start_kill().context("failed to kill child")?;
        let status = child.wait().await.context("failed waiting for killed child")?;
        Ok((status, true))
    }

    /// Deliver an interrupt to the currently running child, if any. Also
    /// used by the cancellation watch task.
    pub fn signal_current(&self, kind: InterruptKind) {
        let pid = *self.current_pid.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pid) = pid {
            deliver_signal(pid, kind);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    Interrupt,
    Terminate,
}

#[cfg(unix)]
fn deliver_signal(pid: u32, kind: InterruptKind) {
    let sig = match kind {
        InterruptKind::Interrupt => libc::SIGINT,
        InterruptKind::Terminate => libc::SIGTERM,
    };
    // An ESRCH here just means the child already exited.
    unsafe {
        libc::kill(pid as libc::pid_t, sig);
    }
}

#[cfg(windows)]
fn deliver_signal(_pid: u32, _kind: InterruptKind) {
    // No POSIX signals; the caller escalates to start_kill after the
    // grace period.
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    -1
}

/// The host's command-line shell: program plus the flag that takes a
/// command string.
fn host_shell() -> (&'static str, &'static [&'static str]) {
    if cfg!(windows) {
        ("cmd.exe", &["/c"])
    } else {
        ("/bin/sh", &["-c"])
    }
}

/// True when the configured shell means CMD batch semantics.
pub fn is_cmd_shell(shell: &str) -> bool {
    Path::new(shell)
        .file_name()
        .map(|n| n.to_string_lossy().to_uppercase() == "CMD.EXE")
        .unwrap_or(false)
}

async fn pump_streamed(mut reader: impl tokio::io::AsyncRead + Unpin, mut sink: RedactorHandle) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = sink.write_all(&buf[..n]) {
                    tracing::warn!(error = %e, "dropping child output: sink write failed");
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "child output read failed");
                break;
            }
        }
    }
}

async fn pump_captured(
    mut reader: impl tokio::io::AsyncRead + Unpin,
    captured: Arc<Mutex<String>>,
) {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        tracing::warn!(error = %e, "captured output read failed");
    }
    captured
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push_str(&String::from_utf8_lossy(&buf));
}

/// Split an operator-supplied flag string into argv words, honoring
/// single quotes, double quotes, and backslash escapes. Flags are passed
/// to children argv-style, so quoting here cannot become shell injection.
pub fn split_flags(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    current.push(c);
                }
            }
            '"' => {
                in_word = true;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => {
                            if let Some(&next) = chars.peek() {
                                if next == '"' || next == '\\' {
                                    current.push(next);
                                    chars.next();
                                } else {
                                    current.push('\\');
                                }
                            }
                        }
                        _ => current.push(c),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::control::InMemoryControlPlane;
    use crate::logstream::LogStreamer;

    fn test_shell(sink: RedactorHandle) -> Shell {
        Shell::new(
            Environment::from_pairs([("PATH", std::env::var("PATH").unwrap_or_default().as_str())]),
            std::env::temp_dir(),
            sink,
            CancelToken::never(),
            Duration::from_millis(200),
        )
    }

    fn collecting_shell() -> (Shell, Arc<InMemoryControlPlane>, LogStreamer) {
        let control = Arc::new(InMemoryControlPlane::new());
        let streamer = LogStreamer::start(control.clone(), "job-1", 1024, 1);
        let sink = RedactorHandle::new(Box::new(streamer.sink()), Vec::<String>::new());
        (test_shell(sink), control, streamer)
    }

    #[test]
    fn split_flags_plain_words() {
        assert_eq!(split_flags("-ffxdq --exclude=target"), vec!["-ffxdq", "--exclude=target"]);
    }

    #[test]
    fn split_flags_quotes_and_escapes() {
        assert_eq!(
            split_flags(r#"--message "two words" -x 'single quoted' esc\ aped"#),
            vec!["--message", "two words", "-x", "single quoted", "esc aped"]
        );
    }

    #[test]
    fn split_flags_empty_and_whitespace() {
        assert!(split_flags("").is_empty());
        assert!(split_flags("   ").is_empty());
        assert_eq!(split_flags(r#""""#), vec![""]);
    }

    #[test]
    fn is_cmd_shell_matches_case_insensitively() {
        assert!(is_cmd_shell(r"C:\Windows\System32\cmd.exe"));
        assert!(is_cmd_shell("CMD.EXE"));
        assert!(!is_cmd_shell("/bin/bash"));
        assert!(!is_cmd_shell("powershell.exe"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_streams_output_through_the_sink() {
        let (shell, control, streamer) = collecting_shell();
        let outcome = shell
            .run_command_line("echo hello from the job", RunOpts::default())
            .await
            .unwrap();
        assert!(outcome.success());
        streamer.finish().await;
        assert!(control.log_string().contains("hello from the job"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_reports_nonzero_exit() {
        let (shell, _control, _streamer) = collecting_shell();
        let outcome = shell
            .run_command_line("exit 7", RunOpts::default())
            .await
            .unwrap();
        assert_eq!(outcome.code, 7);
        assert!(!outcome.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captured_run_returns_stdout_without_streaming_it() {
        let (shell, control, streamer) = collecting_shell();
        let outcome = shell
            .run_command_line(
                "echo captured-probe",
                RunOpts {
                    capture: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.captured.as_deref().map(str::trim), Some("captured-probe"));
        streamer.finish().await;
        assert!(!control.log_string().contains("captured-probe"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn extra_env_is_visible_to_the_child_only() {
        let (shell, _control, _streamer) = collecting_shell();
        let outcome = shell
            .run_command_line(
                "test \"$ONLY_HERE\" = yes",
                RunOpts {
                    extra_env: vec![("ONLY_HERE".to_string(), "yes".to_string())],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(outcome.success());
        assert!(shell.env_get("ONLY_HERE").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_interrupts_a_long_running_child() {
        let control = Arc::new(InMemoryControlPlane::new());
        let streamer = LogStreamer::start(control.clone(), "job-1", 1024, 1);
        let sink = RedactorHandle::new(Box::new(streamer.sink()), Vec::<String>::new());
        let (src, token) = cancel_pair();
        let shell = Shell::new(
            Environment::from_pairs([("PATH", std::env::var("PATH").unwrap_or_default().as_str())]),
            std::env::temp_dir(),
            sink,
            token,
            Duration::from_millis(200),
        );

        let start = std::time::Instant::now();
        let run = tokio::spawn(async move {
            shell.run_command_line("sleep 60", RunOpts::default()).await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        src.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("child must die well before its 60s sleep")
            .unwrap()
            .unwrap();
        assert!(outcome.signaled);
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn chdir_rejects_missing_directories() {
        let control = Arc::new(InMemoryControlPlane::new());
        let streamer = LogStreamer::start(control, "job-1", 1024, 1);
        let sink = RedactorHandle::new(Box::new(streamer.sink()), Vec::<String>::new());
        let shell = test_shell(sink);
        assert!(shell.chdir(Path::new("/definitely/not/here")).is_err());
        let tmp = std::env::temp_dir();
        shell.chdir(&tmp).unwrap();
        assert_eq!(shell.wd(), tmp.as_path());
    }
}
