//! The hook-wrapper protocol.
//!
//! Plain shell hooks are not executed, they are *sourced* by a generated
//! wrapper script that snapshots the environment before and after and
//! records the final working directory. The wrapper exits with the hook's
//! own status, so a failing hook still surfaces its exit code; the two
//! snapshot files are parsed afterwards and the diff is applied to the
//! job shell. A hook that calls `exit` terminates the wrapper before the
//! after-snapshot is written; that case degrades to an exit error with no
//! captured changes.

use std::path::Path;

use tempfile::TempDir;

use super::envdump;
use super::{Hook, HookKind, HOOK_EXIT_STATUS_KEY, HOOK_WORKING_DIR_KEY};
use crate::env::Environment;
use crate::errors::HookError;
use crate::shell::{RunOpts, Shell};

/// Run one hook against the job shell, applying any captured environment
/// and working-directory changes.
pub async fn run_hook(shell: &Shell, hook: &Hook, phase: &str) -> Result<(), HookError> {
    let kind = classify_for_host(hook)?;
    match kind {
        HookKind::ShebangScript | HookKind::Binary => run_direct(shell, hook, phase).await,
        HookKind::ShellScript | HookKind::Batch => run_wrapped(shell, hook, kind).await,
    }
}

fn classify_for_host(hook: &Hook) -> Result<HookKind, HookError> {
    let kind = super::classify(&hook.path).map_err(|source| HookError::Spawn {
        hook: hook.name.clone(),
        source,
    })?;
    if cfg!(windows)
        && kind == HookKind::ShebangScript
        && hook.path.extension().and_then(|e| e.to_str()) != Some("ps1")
    {
        return Err(HookError::ShebangOnWindows {
            path: hook.path.clone(),
        });
    }
    Ok(kind)
}

/// Binaries and interpreter scripts run as-is. They get the hook context
/// injected as variables; whatever they do to their own environment dies
/// with them.
async fn run_direct(shell: &Shell, hook: &Hook, phase: &str) -> Result<(), HookError> {
    let opts = RunOpts {
        extra_env: vec![
            ("HOOK_PHASE".to_string(), phase.to_string()),
            ("HOOK_PATH".to_string(), hook.path.to_string_lossy().into_owned()),
            ("HOOK_SCOPE".to_string(), hook.scope.to_string()),
        ],
        ..Default::default()
    };
    let program = hook.path.to_string_lossy().into_owned();
    let outcome = shell
        .run(&program, &[], opts)
        .await
        .map_err(|e| HookError::Spawn {
            hook: hook.name.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;
    if outcome.code != 0 {
        return Err(HookError::Exit {
            hook: hook.name.clone(),
            code: outcome.code,
        });
    }
    Ok(())
}

async fn run_wrapped(shell: &Shell, hook: &Hook, kind: HookKind) -> Result<(), HookError> {
    let scratch = TempDir::with_prefix("rigger-hook-").map_err(|source| HookError::WrapperWrite {
        path: std::env::temp_dir(),
        source,
    })?;
    let before_path = scratch.path().join("before.env");
    let after_path = scratch.path().join("after.env");
    let script_path = scratch
        .path()
        .join(if kind == HookKind::Batch { "wrapper.bat" } else { "wrapper.sh" });

    let script = match kind {
        HookKind::Batch => batch_wrapper(&hook.path, &before_path, &after_path),
        _ => posix_wrapper(&hook.path, &before_path, &after_path),
    };
    std::fs::write(&script_path, script).map_err(|source| HookError::WrapperWrite {
        path: script_path.clone(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).map_err(
            |source| HookError::Chmod {
                path: script_path.clone(),
                source,
            },
        )?;
    }

    let program = script_path.to_string_lossy().into_owned();
    let outcome = shell
        .run(&program, &[], RunOpts::default())
        .await
        .map_err(|e| HookError::Spawn {
            hook: hook.name.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;

    // A sourced `exit` skips the after-snapshot; without it there are no
    // changes to apply, only the status to report.
    if !after_path.is_file() {
        if outcome.code != 0 {
            return Err(HookError::Exit {
                hook: hook.name.clone(),
                code: outcome.code,
            });
        }
        return Err(HookError::EnvDumpRead {
            path: after_path,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no env dump written"),
        });
    }

    let before = read_dump(&before_path)?;
    let after = read_dump(&after_path)?;

    let new_wd = after.get(HOOK_WORKING_DIR_KEY).map(str::to_string);
    let mut diff = after.diff(&before);
    diff.discard(HOOK_EXIT_STATUS_KEY);
    diff.discard(HOOK_WORKING_DIR_KEY);

    if !diff.is_empty() {
        tracing::debug!(
            hook = %hook.name,
            added = diff.added.len(),
            changed = diff.changed.len(),
            removed = diff.removed.len(),
            "applying hook environment changes",
        );
    }
    shell.apply_env(&diff);

    if let Some(wd) = new_wd {
        let wd = Path::new(&wd);
        if wd != shell.wd() {
            shell.chdir(wd).map_err(|e| HookError::Apply {
                hook: hook.name.clone(),
                message: e.to_string(),
            })?;
        }
    }

    if outcome.code != 0 {
        return Err(HookError::Exit {
            hook: hook.name.clone(),
            code: outcome.code,
        });
    }
    Ok(())
}

fn read_dump(path: &Path) -> Result<Environment, HookError> {
    let raw = std::fs::read_to_string(path).map_err(|source| HookError::EnvDumpRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Environment::from_pairs(envdump::parse(&raw, cfg!(windows))))
}

/// Shell-safe single quoting for paths embedded in the wrapper.
fn sh_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

fn posix_wrapper(hook: &Path, before: &Path, after: &Path) -> String {
    format!(
        "#!/bin/sh\n\
         export -p > {before}\n\
         . {hook}\n\
         HOOK_EXIT_STATUS=$?\n\
         export HOOK_EXIT_STATUS\n\
         HOOK_WORKING_DIR=\"$PWD\"\n\
         export HOOK_WORKING_DIR\n\
         export -p > {after}\n\
         exit \"$HOOK_EXIT_STATUS\"\n",
        before = sh_quote(before),
        hook = sh_quote(hook),
        after = sh_quote(after),
    )
}

fn batch_wrapper(hook: &Path, before: &Path, after: &Path) -> String {
    format!(
        "@echo off\r\n\
         SET > \"{before}\"\r\n\
         CALL \"{hook}\"\r\n\
         SET HOOK_EXIT_STATUS=%ERRORLEVEL%\r\n\
         SET HOOK_WORKING_DIR=%CD%\r\n\
         SET > \"{after}\"\r\n\
         EXIT /B %HOOK_EXIT_STATUS%\r\n",
        before = before.display(),
        hook = hook.display(),
        after = after.display(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::control::InMemoryControlPlane;
    use crate::hook::HookScope;
    use crate::logstream::LogStreamer;
    use crate::redact::RedactorHandle;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn write_hook(dir: &Path, name: &str, content: &str) -> Hook {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        Hook::new(name, path, HookScope::Agent)
    }

    fn job_shell(wd: &Path) -> (Shell, Arc<InMemoryControlPlane>, LogStreamer) {
        let control = Arc::new(InMemoryControlPlane::new());
        let streamer = LogStreamer::start(control.clone(), "job-1", 4096, 1);
        let sink = RedactorHandle::new(Box::new(streamer.sink()), Vec::<String>::new());
        let shell = Shell::new(
            Environment::from_pairs([
                ("PATH", std::env::var("PATH").unwrap_or_default().as_str()),
                ("KEEP_ME", "original"),
            ]),
            wd.to_path_buf(),
            sink,
            CancelToken::never(),
            Duration::from_millis(200),
        );
        (shell, control, streamer)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn wrapped_hook_exports_are_applied() {
        let dir = tempdir().unwrap();
        let (shell, _control, _streamer) = job_shell(dir.path());
        let hook = write_hook(dir.path(), "environment", "export NEW_VAR=hello\nexport KEEP_ME=overridden\n");

        run_hook(&shell, &hook, "environment").await.unwrap();

        assert_eq!(shell.env_get("NEW_VAR").as_deref(), Some("hello"));
        assert_eq!(shell.env_get("KEEP_ME").as_deref(), Some("overridden"));
        // Wrapper bookkeeping never leaks into the job environment.
        assert!(shell.env_get(HOOK_EXIT_STATUS_KEY).is_none());
        assert!(shell.env_get(HOOK_WORKING_DIR_KEY).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn wrapped_hook_unset_removes_variable() {
        let dir = tempdir().unwrap();
        let (shell, _control, _streamer) = job_shell(dir.path());
        let hook = write_hook(dir.path(), "pre-command", "unset KEEP_ME\n");

        run_hook(&shell, &hook, "command").await.unwrap();
        assert_eq!(shell.env_get("KEEP_ME"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn wrapped_hook_directory_change_is_captured() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("subdir");
        std::fs::create_dir(&sub).unwrap();
        let (shell, _control, _streamer) = job_shell(dir.path());
        let hook = write_hook(dir.path(), "post-checkout", "cd subdir\n");

        run_hook(&shell, &hook, "checkout").await.unwrap();
        assert_eq!(shell.wd(), sub.canonicalize().unwrap_or(sub.clone()).as_path());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_hook_returns_exit_error_with_its_code() {
        let dir = tempdir().unwrap();
        let (shell, _control, _streamer) = job_shell(dir.path());
        let hook = write_hook(dir.path(), "pre-command", "export BEFORE_FAIL=set\nfalse\n");

        let err = run_hook(&shell, &hook, "command").await.unwrap_err();
        match err {
            HookError::Exit { code, .. } => assert_eq!(code, 1),
            other => panic!("expected Exit, got {other:?}"),
        }
        // Changes made before the failure were still captured.
        assert_eq!(shell.env_get("BEFORE_FAIL").as_deref(), Some("set"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sourced_exit_skips_the_dump_but_keeps_the_code() {
        let dir = tempdir().unwrap();
        let (shell, _control, _streamer) = job_shell(dir.path());
        let hook = write_hook(dir.path(), "command", "exit 3\n");

        let err = run_hook(&shell, &hook, "command").await.unwrap_err();
        match err {
            HookError::Exit { code, .. } => assert_eq!(code, 3),
            other => panic!("expected Exit, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shebang_hook_runs_directly_with_context_vars() {
        let dir = tempdir().unwrap();
        let probe = dir.path().join("probe.txt");
        let (shell, _control, _streamer) = job_shell(dir.path());
        let hook = write_hook(
            dir.path(),
            "pre-exit",
            &format!(
                "#!/bin/sh\nprintf '%s %s' \"$HOOK_PHASE\" \"$HOOK_SCOPE\" > {}\nexport NOT_CAPTURED=1\n",
                probe.display()
            ),
        );

        run_hook(&shell, &hook, "pre-exit").await.unwrap();

        assert_eq!(std::fs::read_to_string(&probe).unwrap(), "pre-exit agent");
        // Direct-exec hooks do not feed env changes back.
        assert!(shell.env_get("NOT_CAPTURED").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hook_output_lands_in_the_job_log() {
        let dir = tempdir().unwrap();
        let (shell, control, streamer) = job_shell(dir.path());
        let hook = write_hook(dir.path(), "environment", "echo hook-was-here\n");

        run_hook(&shell, &hook, "environment").await.unwrap();
        streamer.finish().await;
        assert!(control.log_string().contains("hook-was-here"));
    }

    #[test]
    fn posix_wrapper_quotes_paths() {
        let script = posix_wrapper(
            Path::new("/tmp/my hooks/environment"),
            Path::new("/tmp/b.env"),
            Path::new("/tmp/a.env"),
        );
        assert!(script.contains(". '/tmp/my hooks/environment'"));
        assert!(script.contains("export -p > '/tmp/b.env'"));
        assert!(script.contains("exit \"$HOOK_EXIT_STATUS\""));
    }
}
