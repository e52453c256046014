//! The source checkout engine.
//!
//! Fetches the repository and positions the working tree at the job's
//! commit. An optional local mirror (a `--mirror` clone shared by every
//! job on the host) serves as a clone reference; it is guarded by two
//! locks so concurrent executors can read while one updates. The whole
//! checkout runs under a wipe-and-retry policy: local corruption is
//! cheaper to heal with a fresh clone than to diagnose.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};

use crate::control::ControlPlane;
use crate::errors::{GitError, GitOp, PhaseError};
use crate::lock::LockFile;
use crate::retry::Retrier;
use crate::shell::{RunOpts, Shell};
use crate::sshkeyscan;
use crate::util::slugify;

const CHECKOUT_ATTEMPTS: u32 = 3;
const CHECKOUT_INTERVAL: Duration = Duration::from_secs(2);

/// Meta-data key guarding the one-time commit metadata send.
const COMMIT_METADATA_KEY: &str = "buildkite:git:commit";

#[derive(Debug, Clone)]
pub struct CheckoutOptions {
    pub repo: String,
    pub commit: String,
    pub branch: String,
    pub refspec: String,
    pub pull_request: Option<String>,
    pub pipeline_provider: String,
    pub checkout_path: PathBuf,
    pub mirror_path: Option<PathBuf>,
    pub clone_flags: Vec<String>,
    pub clean_flags: Vec<String>,
    pub fetch_flags: Vec<String>,
    pub submodules: bool,
    pub ssh_keyscan: bool,
    pub clean_checkout: bool,
    pub send_commit_metadata: bool,
    pub mirror_lock_timeout: Duration,
}

impl CheckoutOptions {
    fn is_github_pull_request(&self) -> bool {
        self.pipeline_provider == "github" && self.pull_request.is_some()
    }
}

/// Run the default checkout, retrying with a wiped directory when the
/// failure looks like local corruption (clone/clean subtypes). Fetch and
/// ref errors surface immediately: retrying cannot invent a missing
/// commit.
pub async fn run_default_checkout(
    shell: &Shell,
    control: &dyn ControlPlane,
    job_id: &str,
    opts: &CheckoutOptions,
) -> Result<(), PhaseError> {
    let cancel = shell.cancel_token();
    let retrier = Retrier::constant(CHECKOUT_ATTEMPTS, CHECKOUT_INTERVAL);

    retrier
        .run_with_break(
            &cancel,
            |e: &PhaseError| !matches!(e, PhaseError::Git(g) if g.op.is_recoverable()),
            |n| async move {
                if n > 1 {
                    shell.writeln("Checkout failed, removing the directory and trying again");
                    wipe_dir(&opts.checkout_path)?;
                }
                do_checkout(shell, opts).await
            },
        )
        .await?;

    if opts.send_commit_metadata {
        if let Err(e) = send_commit_metadata(shell, control, job_id, opts).await {
            // Metadata is a nicety; the checkout itself succeeded.
            tracing::warn!(error = %e, "failed to send commit metadata");
        }
    }
    Ok(())
}

fn wipe_dir(dir: &Path) -> Result<(), PhaseError> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)
            .with_context(|| format!("removing {}", dir.display()))
            .map_err(PhaseError::Other)?;
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("recreating {}", dir.display()))
        .map_err(PhaseError::Other)?;
    Ok(())
}

async fn do_checkout(shell: &Shell, opts: &CheckoutOptions) -> Result<(), PhaseError> {
    if opts.clean_checkout && opts.checkout_path.exists() {
        shell.writeln("Cleaning project checkout");
        wipe_dir(&opts.checkout_path)?;
    }
    std::fs::create_dir_all(&opts.checkout_path)
        .with_context(|| format!("creating {}", opts.checkout_path.display()))
        .map_err(PhaseError::Other)?;
    shell.chdir(&opts.checkout_path).map_err(PhaseError::Other)?;

    if opts.ssh_keyscan {
        if let Some(host) = sshkeyscan::host_from_repository(&opts.repo) {
            sshkeyscan::add_host(shell, &host).await;
        }
    }

    let mirror_dir = match &opts.mirror_path {
        Some(mirror_path) => Some(update_mirror(shell, opts, mirror_path).await?),
        None => None,
    };

    // Clone or repoint the existing checkout.
    if opts.checkout_path.join(".git").exists() {
        git(shell, opts, GitOp::Other, &["remote", "set-url", "origin", &opts.repo]).await?;
    } else {
        let mut args: Vec<String> = vec!["clone".into(), "-v".into()];
        args.extend(opts.clone_flags.iter().cloned());
        if let Some(mirror) = &mirror_dir {
            args.push("--reference".into());
            args.push(mirror.to_string_lossy().into_owned());
        }
        args.extend(["--".into(), opts.repo.clone(), ".".into()]);
        git_owned(shell, opts, GitOp::Clone, args).await?;
    }

    clean(shell, opts).await?;
    fetch_and_position(shell, opts).await?;
    if opts.submodules && opts.checkout_path.join(".gitmodules").exists() {
        update_submodules(shell, opts, mirror_dir.as_deref()).await?;
    }
    clean(shell, opts).await?;

    Ok(())
}

/// `git clean` the tree, submodules first so their droppings cannot mask
/// a dirty superproject.
async fn clean(shell: &Shell, opts: &CheckoutOptions) -> Result<(), PhaseError> {
    if opts.clean_flags.is_empty() {
        return Ok(());
    }
    if opts.submodules && opts.checkout_path.join(".gitmodules").exists() {
        let clean_line = std::iter::once("git clean".to_string())
            .chain(opts.clean_flags.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        git_owned(
            shell,
            opts,
            GitOp::CleanSubmodules,
            vec![
                "submodule".into(),
                "foreach".into(),
                "--recursive".into(),
                clean_line,
            ],
        )
        .await?;
    }
    let mut args: Vec<String> = vec!["clean".into()];
    args.extend(opts.clean_flags.iter().cloned());
    git_owned(shell, opts, GitOp::Clean, args).await?;
    Ok(())
}

/// First-match fetch strategy, then force-checkout the target.
async fn fetch_and_position(shell: &Shell, opts: &CheckoutOptions) -> Result<(), PhaseError> {
    let fetch = |refspec: Vec<String>| {
        let mut args: Vec<String> = vec!["fetch".into(), "-v".into()];
        args.extend(opts.fetch_flags.iter().cloned());
        args.push("origin".into());
        args.extend(refspec);
        git_owned(shell, opts, GitOp::Fetch, args)
    };

    if !opts.refspec.is_empty() {
        shell.writeln(&format!("Fetch and checkout custom refspec {}", opts.refspec));
        fetch(crate::shell::split_flags(&opts.refspec)).await?;
    } else if opts.is_github_pull_request() {
        let pr = opts.pull_request.as_deref().unwrap_or_default();
        shell.writeln(&format!("Fetch and checkout pull request head from GitHub (#{pr})"));
        fetch(vec![format!("refs/pull/{pr}/head")]).await?;
    } else if opts.commit == "HEAD" {
        shell.writeln(&format!("Fetch and checkout remote branch HEAD commit ({})", opts.branch));
        fetch(vec![opts.branch.clone()]).await?;
    } else {
        // Some servers refuse to serve a bare sha; fall back to fetching
        // everything (tags included) and hope the object arrives with it.
        shell.writeln(&format!("Fetch and checkout commit {}", opts.commit));
        if fetch(vec![opts.commit.clone()]).await.is_err() {
            shell.writeln("Commit fetch failed, trying to fetch all heads and tags");
            fetch(vec![
                "+refs/heads/*:refs/remotes/origin/*".into(),
                "+refs/tags/*:refs/tags/*".into(),
            ])
            .await?;
        }
    }

    let target = if opts.commit == "HEAD" { "FETCH_HEAD" } else { &opts.commit };
    git(shell, opts, GitOp::Checkout, &["checkout", "-f", target]).await?;
    Ok(())
}

async fn update_submodules(
    shell: &Shell,
    opts: &CheckoutOptions,
    _mirror_dir: Option<&Path>,
) -> Result<(), PhaseError> {
    shell.writeln("Updating submodules");
    git(shell, opts, GitOp::Other, &["submodule", "sync", "--recursive"]).await?;

    if opts.ssh_keyscan {
        for url in submodule_urls(&opts.checkout_path) {
            if let Some(host) = sshkeyscan::host_from_repository(&url) {
                sshkeyscan::add_host(shell, &host).await;
            }
        }
    }

    git(
        shell,
        opts,
        GitOp::Other,
        &["submodule", "update", "--init", "--recursive", "--force"],
    )
    .await?;
    git(
        shell,
        opts,
        GitOp::CleanSubmodules,
        &["submodule", "foreach", "--recursive", "git reset --hard"],
    )
    .await?;
    Ok(())
}

/// Pull submodule remote URLs out of `.gitmodules`. Line-oriented on
/// purpose; git config syntax beyond `url = ...` does not matter here.
fn submodule_urls(checkout: &Path) -> Vec<String> {
    let Ok(raw) = std::fs::read_to_string(checkout.join(".gitmodules")) else {
        return Vec::new();
    };
    raw.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            (key.trim() == "url").then(|| value.trim().to_string())
        })
        .collect()
}

/// Create or refresh the shared mirror, returning its directory.
///
/// Two locks: the clone lock is held only while establishing the mirror
/// (subsequent jobs release it straight after the existence check), the
/// update lock only while fetching. Readers referencing the mirror never
/// take either.
async fn update_mirror(
    shell: &Shell,
    opts: &CheckoutOptions,
    mirror_path: &Path,
) -> Result<PathBuf, PhaseError> {
    std::fs::create_dir_all(mirror_path)
        .with_context(|| format!("creating {}", mirror_path.display()))
        .map_err(PhaseError::Other)?;

    let slug = slugify(&opts.repo);
    let mirror_dir = mirror_path.join(&slug);
    let cancel = shell.cancel_token();

    {
        let _clone_lock = LockFile::acquire(
            &mirror_path.join(format!("{slug}.clonelock")),
            opts.mirror_lock_timeout,
            &cancel,
        )
        .await
        .map_err(|e| PhaseError::Other(anyhow!(e)))?;

        // A mirror clone is bare: its git dir is the directory itself.
        if !mirror_dir.join("HEAD").exists() {
            shell.writeln(&format!("Creating repository mirror for {}", opts.repo));
            let retrier = Retrier::constant(CHECKOUT_ATTEMPTS, CHECKOUT_INTERVAL);
            retrier
                .run(&cancel, |_| {
                    let args = vec![
                        "clone".to_string(),
                        "--mirror".to_string(),
                        "-v".to_string(),
                        "--".to_string(),
                        opts.repo.clone(),
                        mirror_dir.to_string_lossy().into_owned(),
                    ];
                    async move {
                        let outcome = shell
                            .run("git", &args, RunOpts::default())
                            .await
                            .map_err(|e| PhaseError::Git(GitError::new(GitOp::Clone, None, e.to_string())))?;
                        if !outcome.success() {
                            return Err(PhaseError::Git(GitError::new(
                                GitOp::Clone,
                                Some(outcome.code),
                                "mirror clone failed",
                            )));
                        }
                        Ok(())
                    }
                })
                .await?;
            return Ok(mirror_dir);
        }
    }

    // Fast path: the wanted commit is already mirrored, no fetch needed.
    if opts.commit != "HEAD" {
        let probe = shell
            .run(
                "git",
                &[
                    "rev-parse".into(),
                    "--verify".into(),
                    "--quiet".into(),
                    format!("{}^{{commit}}", opts.commit),
                ],
                RunOpts {
                    dir: Some(mirror_dir.clone()),
                    capture: true,
                    ..Default::default()
                },
            )
            .await;
        if matches!(probe, Ok(o) if o.success()) {
            return Ok(mirror_dir);
        }
    }

    let _update_lock = LockFile::acquire(
        &mirror_path.join(format!("{slug}.updatelock")),
        opts.mirror_lock_timeout,
        &cancel,
    )
    .await
    .map_err(|e| PhaseError::Other(anyhow!(e)))?;

    let in_mirror = |args: Vec<String>, op: GitOp| {
        run_git_in(shell, mirror_dir.clone(), args, op)
    };
    in_mirror(
        vec!["remote".into(), "set-url".into(), "origin".into(), opts.repo.clone()],
        GitOp::Other,
    )
    .await?;

    let refspec = if opts.is_github_pull_request() {
        format!("refs/pull/{}/head", opts.pull_request.as_deref().unwrap_or_default())
    } else {
        opts.branch.clone()
    };
    shell.writeln(&format!("Updating mirror of {} ({refspec})", opts.repo));
    in_mirror(
        vec!["fetch".into(), "-v".into(), "origin".into(), refspec],
        GitOp::Fetch,
    )
    .await?;

    Ok(mirror_dir)
}

async fn git(
    shell: &Shell,
    opts: &CheckoutOptions,
    op: GitOp,
    args: &[&str],
) -> Result<(), PhaseError> {
    git_owned(shell, opts, op, args.iter().map(|s| s.to_string()).collect()).await
}

async fn git_owned(
    shell: &Shell,
    opts: &CheckoutOptions,
    op: GitOp,
    args: Vec<String>,
) -> Result<(), PhaseError> {
    run_git_in(shell, opts.checkout_path.clone(), args, op).await
}

async fn run_git_in(
    shell: &Shell,
    dir: PathBuf,
    args: Vec<String>,
    op: GitOp,
) -> Result<(), PhaseError> {
    let display = args.join(" ");
    let outcome = shell
        .run(
            "git",
            &args,
            RunOpts {
                dir: Some(dir),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| PhaseError::Git(GitError::new(op, None, e.to_string())))?;
    if !outcome.success() {
        return Err(PhaseError::Git(GitError::new(
            op,
            Some(outcome.code),
            format!("git {display} failed"),
        )));
    }
    Ok(())
}

/// Report the checked-out commit's author and subject to the control
/// plane, once per build. A meta-data probe guards re-sends from rebuilt
/// jobs.
async fn send_commit_metadata(
    shell: &Shell,
    control: &dyn ControlPlane,
    job_id: &str,
    opts: &CheckoutOptions,
) -> anyhow::Result<()> {
    if control.meta_data_exists(job_id, COMMIT_METADATA_KEY).await? {
        return Ok(());
    }

    let repo = git2::Repository::open(&opts.checkout_path)
        .context("opening checkout for commit metadata")?;
    let head = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .context("resolving HEAD commit")?;
    let author = head.author();
    let summary = head.summary().unwrap_or_default().to_string();
    let value = format!(
        "commit {}\nAuthor: {} <{}>\n\n    {}",
        head.id(),
        author.name().unwrap_or_default(),
        author.email().unwrap_or_default(),
        summary,
    );
    drop(author);
    drop(head);
    drop(repo);

    shell.writeln("Sending Git commit information back to Buildkite");
    control
        .meta_data_set(job_id, COMMIT_METADATA_KEY, &value)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::control::InMemoryControlPlane;
    use crate::env::Environment;
    use crate::logstream::LogStreamer;
    use crate::redact::RedactorHandle;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn job_shell(wd: &Path) -> (Shell, Arc<InMemoryControlPlane>, LogStreamer) {
        let control = Arc::new(InMemoryControlPlane::new());
        let streamer = LogStreamer::start(control.clone(), "job-1", 8192, 1);
        let sink = RedactorHandle::new(Box::new(streamer.sink()), Vec::<String>::new());
        let shell = Shell::new(
            Environment::from_pairs([(
                "PATH",
                std::env::var("PATH").unwrap_or_default().as_str(),
            )]),
            wd.to_path_buf(),
            sink,
            CancelToken::never(),
            Duration::from_millis(200),
        );
        (shell, control, streamer)
    }

    struct Upstream {
        dir: PathBuf,
        branch: String,
        first_commit: String,
        head_commit: String,
    }

    /// A local repository standing in for the remote, with two commits.
    fn upstream_repo(base: &Path) -> Upstream {
        let dir = base.join("upstream");
        std::fs::create_dir_all(&dir).unwrap();
        let repo = git2::Repository::init(&dir).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);

        let commit = |msg: &str| {
            let mut index = repo.index().unwrap();
            index
                .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
                .unwrap();
            index.write().unwrap();
            let tree_id = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            let sig = git2::Signature::now("test", "test@test.com").unwrap();
            let parent = repo
                .head()
                .ok()
                .and_then(|h| h.peel_to_commit().ok());
            let parents: Vec<&git2::Commit> = parent.iter().collect();
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &parents)
                .unwrap()
                .to_string()
        };

        std::fs::write(dir.join("first.txt"), "one\n").unwrap();
        let first_commit = commit("first commit");
        std::fs::write(dir.join("second.txt"), "two\n").unwrap();
        let head_commit = commit("second commit");

        let branch = repo.head().unwrap().shorthand().unwrap().to_string();
        Upstream {
            dir,
            branch,
            first_commit,
            head_commit,
        }
    }

    fn options(upstream: &Upstream, checkout: &Path) -> CheckoutOptions {
        CheckoutOptions {
            repo: upstream.dir.to_string_lossy().into_owned(),
            commit: "HEAD".to_string(),
            branch: upstream.branch.clone(),
            refspec: String::new(),
            pull_request: None,
            pipeline_provider: "git".to_string(),
            checkout_path: checkout.to_path_buf(),
            mirror_path: None,
            clone_flags: vec![],
            clean_flags: vec!["-ffxdq".to_string()],
            fetch_flags: vec![],
            submodules: true,
            ssh_keyscan: false,
            clean_checkout: false,
            send_commit_metadata: false,
            mirror_lock_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn checks_out_branch_head() {
        let dir = tempdir().unwrap();
        let upstream = upstream_repo(dir.path());
        let checkout = dir.path().join("checkout");
        let (shell, control, _streamer) = job_shell(dir.path());

        let opts = options(&upstream, &checkout);
        run_default_checkout(&shell, control.as_ref(), "job-1", &opts)
            .await
            .unwrap();

        assert!(checkout.join("first.txt").exists());
        assert!(checkout.join("second.txt").exists());
        assert_eq!(shell.wd(), checkout.as_path());
    }

    #[tokio::test]
    async fn checks_out_specific_commit_via_fallback_fetch() {
        let dir = tempdir().unwrap();
        let upstream = upstream_repo(dir.path());
        let checkout = dir.path().join("checkout");
        let (shell, control, _streamer) = job_shell(dir.path());

        let mut opts = options(&upstream, &checkout);
        opts.commit = upstream.first_commit.clone();
        run_default_checkout(&shell, control.as_ref(), "job-1", &opts)
            .await
            .unwrap();

        assert!(checkout.join("first.txt").exists());
        // The tree is positioned before the second commit.
        assert!(!checkout.join("second.txt").exists());
    }

    #[tokio::test]
    async fn rerun_reuses_the_existing_clone() {
        let dir = tempdir().unwrap();
        let upstream = upstream_repo(dir.path());
        let checkout = dir.path().join("checkout");
        let (shell, control, _streamer) = job_shell(dir.path());

        let opts = options(&upstream, &checkout);
        run_default_checkout(&shell, control.as_ref(), "job-1", &opts)
            .await
            .unwrap();
        run_default_checkout(&shell, control.as_ref(), "job-1", &opts)
            .await
            .unwrap();
        assert!(checkout.join("second.txt").exists());
    }

    #[tokio::test]
    async fn clean_checkout_wipes_local_state() {
        let dir = tempdir().unwrap();
        let upstream = upstream_repo(dir.path());
        let checkout = dir.path().join("checkout");
        let (shell, control, _streamer) = job_shell(dir.path());

        let mut opts = options(&upstream, &checkout);
        run_default_checkout(&shell, control.as_ref(), "job-1", &opts)
            .await
            .unwrap();
        std::fs::write(checkout.join("junk.tmp"), "scratch").unwrap();

        opts.clean_checkout = true;
        run_default_checkout(&shell, control.as_ref(), "job-1", &opts)
            .await
            .unwrap();
        assert!(!checkout.join("junk.tmp").exists());
        assert!(checkout.join("second.txt").exists());
    }

    #[tokio::test]
    async fn git_clean_flags_with_quoting_do_not_inject() {
        let dir = tempdir().unwrap();
        let upstream = upstream_repo(dir.path());
        let checkout = dir.path().join("checkout");
        let (shell, control, _streamer) = job_shell(dir.path());

        let mut opts = options(&upstream, &checkout);
        // A hostile-looking exclude pattern must arrive as one argv word.
        opts.clean_flags = crate::shell::split_flags("-ffxdq --exclude='has space; rm -rf /'");
        run_default_checkout(&shell, control.as_ref(), "job-1", &opts)
            .await
            .unwrap();
        assert!(checkout.join("second.txt").exists());
    }

    #[tokio::test]
    async fn mirror_is_created_and_referenced() {
        let dir = tempdir().unwrap();
        let upstream = upstream_repo(dir.path());
        let checkout = dir.path().join("checkout");
        let mirror_path = dir.path().join("mirrors");
        let (shell, control, _streamer) = job_shell(dir.path());

        let mut opts = options(&upstream, &checkout);
        opts.mirror_path = Some(mirror_path.clone());
        run_default_checkout(&shell, control.as_ref(), "job-1", &opts)
            .await
            .unwrap();

        let mirror_dir = mirror_path.join(slugify(&opts.repo));
        assert!(mirror_dir.join("HEAD").exists(), "mirror should be a bare clone");
        assert!(checkout.join("second.txt").exists());

        // Second run hits the existence check and the rev-parse fast path.
        opts.commit = upstream.head_commit.clone();
        run_default_checkout(&shell, control.as_ref(), "job-1", &opts)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn commit_metadata_is_sent_once() {
        let dir = tempdir().unwrap();
        let upstream = upstream_repo(dir.path());
        let checkout = dir.path().join("checkout");
        let (shell, control, _streamer) = job_shell(dir.path());

        let mut opts = options(&upstream, &checkout);
        opts.send_commit_metadata = true;
        run_default_checkout(&shell, control.as_ref(), "job-1", &opts)
            .await
            .unwrap();

        let sent = control.with_state(|s| s.meta_data.get(COMMIT_METADATA_KEY).cloned());
        let sent = sent.expect("commit metadata should be sent");
        assert!(sent.contains("second commit"));
        assert!(sent.contains("test@test.com"));

        // A rebuilt job sees the guard and does not overwrite.
        let before = sent;
        run_default_checkout(&shell, control.as_ref(), "job-1", &opts)
            .await
            .unwrap();
        let after = control.with_state(|s| s.meta_data.get(COMMIT_METADATA_KEY).cloned());
        assert_eq!(after.as_deref(), Some(before.as_str()));
    }

    #[tokio::test]
    async fn missing_commit_is_not_retried_as_corruption() {
        let dir = tempdir().unwrap();
        let upstream = upstream_repo(dir.path());
        let checkout = dir.path().join("checkout");
        let (shell, control, _streamer) = job_shell(dir.path());

        let mut opts = options(&upstream, &checkout);
        opts.commit = "0000000000000000000000000000000000000000".to_string();

        let start = std::time::Instant::now();
        let err = run_default_checkout(&shell, control.as_ref(), "job-1", &opts)
            .await
            .unwrap_err();
        match &err {
            PhaseError::Git(g) => assert!(!g.op.is_recoverable(), "{g:?}"),
            other => panic!("expected a git error, got {other:?}"),
        }
        // Checkout subtype breaks the retrier early; no 2x2s of backoff.
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn submodule_urls_parse_gitmodules() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(".gitmodules"),
            "[submodule \"libs/a\"]\n\tpath = libs/a\n\turl = git@github.com:org/a.git\n\
             [submodule \"libs/b\"]\n\tpath = libs/b\n\turl = https://github.com/org/b.git\n",
        )
        .unwrap();
        let urls = submodule_urls(dir.path());
        assert_eq!(urls, vec!["git@github.com:org/a.git", "https://github.com/org/b.git"]);
    }
}
