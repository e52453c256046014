//! Materializing plugin descriptors into checkouts.
//!
//! Each non-vendored plugin is cloned once into
//! `<plugins_path>/<identifier>`, guarded by an advisory lock file kept
//! *outside* the plugin directory so git can clone into an empty target.
//! Clones land in a staging directory first and are renamed into place
//! atomically, so a half-populated directory can never be mistaken for a
//! finished checkout. Once a checkout exists it is immutable; only the
//! `always_clone_fresh` flag wipes and re-clones it.
//!
//! Vendored plugins skip git entirely: their directory inside the source
//! checkout is used as-is, after confirming it cannot escape it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};

use super::definition::{self, PluginDefinition};
use super::PluginDescriptor;
use crate::errors::PluginError;
use crate::lock::{LockError, LockFile};
use crate::retry::Retrier;
use crate::shell::{RunOpts, Shell};
use crate::sshkeyscan;

/// Default bound on waiting for another process's clone of the same
/// plugin.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const CLONE_ATTEMPTS: u32 = 3;
const CLONE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PluginCheckoutOptions {
    pub plugins_path: PathBuf,
    /// The source checkout directory; vendored locations resolve under
    /// it.
    pub checkout_path: PathBuf,
    pub always_clone_fresh: bool,
    pub validate: bool,
    pub ssh_keyscan: bool,
    pub git_submodules: bool,
    pub lock_timeout: Duration,
}

impl PluginCheckoutOptions {
    pub fn new(plugins_path: PathBuf, checkout_path: PathBuf) -> Self {
        Self {
            plugins_path,
            checkout_path,
            always_clone_fresh: false,
            validate: false,
            ssh_keyscan: false,
            git_submodules: true,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// A plugin ready for hook lookup.
#[derive(Debug, Clone)]
pub struct CheckedOutPlugin {
    pub descriptor: PluginDescriptor,
    pub checkout_dir: PathBuf,
    pub hooks_dir: PathBuf,
    pub definition: Option<PluginDefinition>,
}

/// Materialize every descriptor, in order.
pub async fn checkout_plugins(
    shell: &Shell,
    descriptors: &[PluginDescriptor],
    opts: &PluginCheckoutOptions,
) -> Result<Vec<CheckedOutPlugin>, PluginError> {
    let mut checkouts = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        checkouts.push(checkout_one(shell, descriptor, opts).await?);
    }
    Ok(checkouts)
}

async fn checkout_one(
    shell: &Shell,
    descriptor: &PluginDescriptor,
    opts: &PluginCheckoutOptions,
) -> Result<CheckedOutPlugin, PluginError> {
    let checkout_dir = if descriptor.vendored {
        vendored_dir(descriptor, &opts.checkout_path)?
    } else {
        cloned_dir(shell, descriptor, opts).await?
    };

    let mut plugin_root = checkout_dir.clone();
    let subdir = descriptor.repository_subdirectory();
    if !subdir.is_empty() {
        plugin_root = plugin_root.join(subdir);
    }
    let hooks_dir = plugin_root.join("hooks");

    let definition = if opts.validate {
        let definition = definition::load_definition(&plugin_root)?;
        if let Some(def) = &definition {
            let problems = definition::validate_plugin(descriptor, def);
            if !problems.is_empty() {
                return Err(PluginError::Validation {
                    plugin: descriptor.name(),
                    errors: problems,
                });
            }
        }
        definition
    } else {
        None
    };

    Ok(CheckedOutPlugin {
        descriptor: descriptor.clone(),
        checkout_dir,
        hooks_dir,
        definition,
    })
}

/// Resolve a vendored location and refuse anything that escapes the
/// source checkout.
fn vendored_dir(
    descriptor: &PluginDescriptor,
    checkout_path: &Path,
) -> Result<PathBuf, PluginError> {
    let joined = checkout_path.join(&descriptor.location);
    let resolved = joined.canonicalize().map_err(|e| {
        PluginError::Other(anyhow!(
            "vendored plugin {:?} not found at {}: {e}",
            descriptor.location,
            joined.display()
        ))
    })?;
    let root = checkout_path
        .canonicalize()
        .map_err(|e| PluginError::Other(anyhow!("cannot resolve checkout dir: {e}")))?;
    if !resolved.starts_with(&root) {
        return Err(PluginError::OutsideCheckout {
            location: descriptor.location.clone(),
        });
    }
    Ok(resolved)
}

async fn cloned_dir(
    shell: &Shell,
    descriptor: &PluginDescriptor,
    opts: &PluginCheckoutOptions,
) -> Result<PathBuf, PluginError> {
    std::fs::create_dir_all(&opts.plugins_path)
        .with_context(|| format!("creating plugins dir {}", opts.plugins_path.display()))
        .map_err(PluginError::Other)?;

    let id = descriptor.identifier();
    let target = opts.plugins_path.join(&id);
    let lock_path = opts.plugins_path.join(format!("{id}.lock"));

    let _lock = LockFile::acquire(&lock_path, opts.lock_timeout, &shell.cancel_token())
        .await
        .map_err(|e| match e {
            LockError::Timeout { path, .. } => PluginError::LockTimeout { path },
            other => PluginError::Other(anyhow!(other)),
        })?;

    if opts.always_clone_fresh && target.exists() {
        shell.writeln(&format!("Removing existing plugin checkout {}", target.display()));
        std::fs::remove_dir_all(&target)
            .with_context(|| format!("removing {}", target.display()))
            .map_err(PluginError::Other)?;
    }

    if target.join(".git").exists() {
        let short = resolved_commit(shell, &target).await;
        shell.writeln(&format!(
            "Plugin {} already checked out ({})",
            descriptor.name(),
            short.as_deref().unwrap_or("unknown commit"),
        ));
        return Ok(target);
    }

    let repo = descriptor.clone_source();
    if opts.ssh_keyscan {
        if let Some(host) = sshkeyscan::host_from_repository(&repo) {
            sshkeyscan::add_host(shell, &host).await;
        }
    }

    // Clone into a staging dir next to the target so the final rename is
    // a same-filesystem atomic move.
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(&opts.plugins_path)
        .context("creating plugin staging dir")
        .map_err(PluginError::Other)?;

    shell.writeln(&format!("Cloning plugin {} from {}", descriptor.name(), repo));
    let mut args: Vec<String> = vec!["clone".into(), "-v".into()];
    if opts.git_submodules {
        args.push("--recursive".into());
    }
    args.extend(["--".into(), repo.clone(), ".".into()]);

    let retrier = Retrier::constant(CLONE_ATTEMPTS, CLONE_INTERVAL);
    let staging_path = staging.path().to_path_buf();
    retrier
        .run(&shell.cancel_token(), |attempt| {
            let args = args.clone();
            let staging_path = staging_path.clone();
            let repo = repo.clone();
            async move {
                if attempt > 1 {
                    shell.writeln(&format!("Retrying plugin clone (attempt {attempt})"));
                }
                let outcome = shell
                    .run(
                        "git",
                        &args,
                        RunOpts {
                            dir: Some(staging_path),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(PluginError::Other)?;
                if !outcome.success() {
                    return Err(PluginError::Other(anyhow!(
                        "git clone of {repo} exited with {}",
                        outcome.code
                    )));
                }
                Ok(())
            }
        })
        .await?;

    if !descriptor.version.is_empty() {
        let outcome = shell
            .run(
                "git",
                &["checkout".into(), "-f".into(), descriptor.version.clone()],
                RunOpts {
                    dir: Some(staging_path.clone()),
                    ..Default::default()
                },
            )
            .await
            .map_err(PluginError::Other)?;
        if !outcome.success() {
            return Err(PluginError::Other(anyhow!(
                "git checkout of plugin version {:?} exited with {}",
                descriptor.version,
                outcome.code
            )));
        }
    }

    // Keep the staging dir out of TempDir's cleanup and move it into
    // place in one step.
    let staging_path = staging.keep();
    std::fs::rename(&staging_path, &target)
        .with_context(|| {
            format!(
                "moving plugin checkout {} -> {}",
                staging_path.display(),
                target.display()
            )
        })
        .map_err(PluginError::Other)?;

    Ok(target)
}

async fn resolved_commit(shell: &Shell, dir: &Path) -> Option<String> {
    let outcome = shell
        .run(
            "git",
            &["rev-parse".into(), "--short".into(), "HEAD".into()],
            RunOpts {
                dir: Some(dir.to_path_buf()),
                capture: true,
                ..Default::default()
            },
        )
        .await
        .ok()?;
    if !outcome.success() {
        return None;
    }
    outcome.captured.map(|s| s.trim().to_string())
}

impl PluginDescriptor {
    /// What to hand `git clone`: local paths verbatim, everything else
    /// through the reconstructed repository URL.
    pub fn clone_source(&self) -> String {
        if Path::new(&self.location).is_absolute() || self.location.starts_with('.') {
            self.location.clone()
        } else {
            self.repository_url()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::control::InMemoryControlPlane;
    use crate::env::Environment;
    use crate::logstream::LogStreamer;
    use crate::redact::RedactorHandle;
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn job_shell(wd: &Path) -> (Shell, Arc<InMemoryControlPlane>, LogStreamer) {
        let control = Arc::new(InMemoryControlPlane::new());
        let streamer = LogStreamer::start(control.clone(), "job-1", 4096, 1);
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

    /// A local git repo that stands in for a remote plugin repository.
    fn plugin_repo(dir: &Path) -> PathBuf {
        let repo_dir = dir.join("plugin-src");
        std::fs::create_dir_all(repo_dir.join("hooks")).unwrap();
        std::fs::write(
            repo_dir.join("hooks/environment"),
            "export PLUGIN_HOOK_RAN=1\n",
        )
        .unwrap();
        std::fs::write(repo_dir.join("marker.txt"), "v1\n").unwrap();

        let repo = git2::Repository::init(&repo_dir).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@test.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "plugin v1", &tree, &[])
            .unwrap();
        repo_dir
    }

    fn descriptor_for(repo_dir: &Path) -> PluginDescriptor {
        PluginDescriptor::parse(&repo_dir.to_string_lossy(), Value::Null).unwrap()
    }

    #[tokio::test]
    async fn clones_into_identifier_directory() {
        let dir = tempdir().unwrap();
        let repo_dir = plugin_repo(dir.path());
        let (shell, _control, _streamer) = job_shell(dir.path());

        let descriptor = descriptor_for(&repo_dir);
        let opts = PluginCheckoutOptions::new(dir.path().join("plugins"), dir.path().to_path_buf());

        let checkouts = checkout_plugins(&shell, &[descriptor.clone()], &opts)
            .await
            .unwrap();

        assert_eq!(checkouts.len(), 1);
        let checkout = &checkouts[0];
        assert_eq!(
            checkout.checkout_dir,
            dir.path().join("plugins").join(descriptor.identifier())
        );
        assert!(checkout.checkout_dir.join(".git").exists());
        assert!(checkout.hooks_dir.join("environment").exists());
        // No staging leftovers.
        let strays: Vec<_> = std::fs::read_dir(dir.path().join("plugins"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging-"))
            .collect();
        assert!(strays.is_empty());
    }

    #[tokio::test]
    async fn second_run_reuses_the_existing_checkout() {
        let dir = tempdir().unwrap();
        let repo_dir = plugin_repo(dir.path());
        let (shell, _control, _streamer) = job_shell(dir.path());

        let descriptor = descriptor_for(&repo_dir);
        let opts = PluginCheckoutOptions::new(dir.path().join("plugins"), dir.path().to_path_buf());

        let first = checkout_plugins(&shell, &[descriptor.clone()], &opts)
            .await
            .unwrap();
        // Scar the checkout; a re-clone would heal it, reuse must not.
        std::fs::remove_file(first[0].checkout_dir.join("marker.txt")).unwrap();

        let second = checkout_plugins(&shell, &[descriptor], &opts).await.unwrap();
        assert_eq!(first[0].checkout_dir, second[0].checkout_dir);
        assert!(!second[0].checkout_dir.join("marker.txt").exists());
    }

    #[tokio::test]
    async fn always_clone_fresh_wipes_and_reclones() {
        let dir = tempdir().unwrap();
        let repo_dir = plugin_repo(dir.path());
        let (shell, _control, _streamer) = job_shell(dir.path());

        let descriptor = descriptor_for(&repo_dir);
        let mut opts =
            PluginCheckoutOptions::new(dir.path().join("plugins"), dir.path().to_path_buf());

        let first = checkout_plugins(&shell, &[descriptor.clone()], &opts)
            .await
            .unwrap();
        std::fs::remove_file(first[0].checkout_dir.join("marker.txt")).unwrap();

        opts.always_clone_fresh = true;
        let second = checkout_plugins(&shell, &[descriptor], &opts).await.unwrap();
        assert!(second[0].checkout_dir.join("marker.txt").exists());
    }

    #[tokio::test]
    async fn vendored_plugin_resolves_under_the_checkout() {
        let dir = tempdir().unwrap();
        let checkout = dir.path().join("checkout");
        std::fs::create_dir_all(checkout.join(".buildkite/plugins/deploy/hooks")).unwrap();
        let (shell, _control, _streamer) = job_shell(dir.path());

        let descriptor =
            PluginDescriptor::parse("./.buildkite/plugins/deploy", Value::Null).unwrap();
        let opts = PluginCheckoutOptions::new(dir.path().join("plugins"), checkout.clone());

        let checkouts = checkout_plugins(&shell, &[descriptor], &opts).await.unwrap();
        assert_eq!(
            checkouts[0].checkout_dir,
            checkout
                .join(".buildkite/plugins/deploy")
                .canonicalize()
                .unwrap()
        );
        assert!(checkouts[0].hooks_dir.ends_with("hooks"));
    }

    #[tokio::test]
    async fn vendored_plugin_escaping_the_checkout_is_rejected() {
        let dir = tempdir().unwrap();
        let checkout = dir.path().join("checkout");
        std::fs::create_dir_all(&checkout).unwrap();
        // A real directory outside the checkout that traversal can reach.
        std::fs::create_dir_all(dir.path().join("outside")).unwrap();
        let (shell, _control, _streamer) = job_shell(dir.path());

        let descriptor = PluginDescriptor::parse("./../outside", Value::Null).unwrap();
        let opts = PluginCheckoutOptions::new(dir.path().join("plugins"), checkout);

        let err = checkout_plugins(&shell, &[descriptor], &opts).await.unwrap_err();
        assert!(matches!(err, PluginError::OutsideCheckout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn concurrent_checkouts_share_one_clone() {
        let dir = tempdir().unwrap();
        let repo_dir = plugin_repo(dir.path());
        let descriptor = descriptor_for(&repo_dir);
        let opts = Arc::new(PluginCheckoutOptions::new(
            dir.path().join("plugins"),
            dir.path().to_path_buf(),
        ));

        let mut tasks = Vec::new();
        for _ in 0..2 {
            let descriptor = descriptor.clone();
            let opts = Arc::clone(&opts);
            let wd = dir.path().to_path_buf();
            tasks.push(tokio::spawn(async move {
                let (shell, _control, _streamer) = job_shell(&wd);
                checkout_plugins(&shell, &[descriptor], &opts).await
            }));
        }
        for task in tasks {
            let result = task.await.unwrap();
            assert!(result.is_ok(), "{result:?}");
        }
        assert!(dir
            .path()
            .join("plugins")
            .join(descriptor.identifier())
            .join(".git")
            .exists());
    }
}
