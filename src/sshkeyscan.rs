//! Best-effort SSH known-hosts maintenance.
//!
//! Before cloning over SSH the executor can add the repository host's
//! keys to `~/.ssh/known_hosts` so git does not stall on an interactive
//! fingerprint prompt. Failures here are logged and ignored: a host that
//! is already known, or an operator-managed known_hosts, must not break
//! the job.

use std::io::Write;
use std::path::PathBuf;

use crate::shell::{RunOpts, Shell};

/// Extract the host from a repository reference, in any of the forms git
/// accepts. Local paths have no host.
pub fn host_from_repository(repo: &str) -> Option<String> {
    if repo.starts_with('/') || repo.starts_with('.') {
        return None;
    }

    // URL form: scheme://[user[:pass]@]host[:port]/path
    if let Some((_scheme, rest)) = repo.split_once("://") {
        let authority = rest.split('/').next()?;
        let host = authority.rsplit('@').next()?;
        let host = host.split(':').next()?;
        return non_empty(host);
    }

    // SCP form: user@host:path
    if let Some((user_host, _path)) = repo.split_once(':') {
        if let Some((_user, host)) = user_host.split_once('@') {
            return non_empty(host);
        }
    }

    // Bare location: first path segment is the host.
    non_empty(repo.split('/').next()?)
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn known_hosts_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

/// Scan `host` and append its keys to known_hosts unless already there.
pub async fn add_host(shell: &Shell, host: &str) {
    let Some(path) = known_hosts_path() else {
        tracing::warn!("no home directory, skipping ssh-keyscan");
        return;
    };

    if let Ok(existing) = std::fs::read_to_string(&path) {
        let already_known = existing
            .lines()
            .any(|line| line.split_whitespace().next().is_some_and(|h| h.split(',').any(|h| h == host)));
        if already_known {
            return;
        }
    }

    shell.writeln(&format!("Scanning SSH keys for {host}"));
    let outcome = shell
        .run(
            "ssh-keyscan",
            &[host.to_string()],
            RunOpts {
                capture: true,
                ..Default::default()
            },
        )
        .await;

    let keys = match outcome {
        Ok(o) if o.success() => o.captured.unwrap_or_default(),
        Ok(o) => {
            tracing::warn!(host, code = o.code, "ssh-keyscan failed");
            return;
        }
        Err(e) => {
            tracing::warn!(host, error = %e, "could not run ssh-keyscan");
            return;
        }
    };
    if keys.trim().is_empty() {
        tracing::warn!(host, "ssh-keyscan returned no keys");
        return;
    }

    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(error = %e, "could not create ~/.ssh");
            return;
        }
    }
    let appended = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| f.write_all(keys.as_bytes()));
    if let Err(e) = appended {
        tracing::warn!(error = %e, path = %path.display(), "could not append to known_hosts");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_from_https_url() {
        assert_eq!(
            host_from_repository("https://github.com/org/repo.git"),
            Some("github.com".to_string())
        );
    }

    #[test]
    fn host_from_ssh_url_with_user_and_port() {
        assert_eq!(
            host_from_repository("ssh://git@git.example.com:2222/org/repo"),
            Some("git.example.com".to_string())
        );
    }

    #[test]
    fn host_from_scp_form() {
        assert_eq!(
            host_from_repository("git@github.com:org/repo.git"),
            Some("github.com".to_string())
        );
    }

    #[test]
    fn host_from_bare_location() {
        assert_eq!(
            host_from_repository("bitbucket.org/team/thing"),
            Some("bitbucket.org".to_string())
        );
    }

    #[test]
    fn local_paths_have_no_host() {
        assert_eq!(host_from_repository("/srv/git/repo"), None);
        assert_eq!(host_from_repository("./vendored/plugin"), None);
    }
}
