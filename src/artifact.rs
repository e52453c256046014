//! Artifact collection and registration.
//!
//! After the command phase the executor collects files matching the
//! job's artifact patterns, fingerprints them, and registers the batch
//! with the control plane. Storage transfer is the destination's
//! concern; the executor reports each artifact's final state.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::control::ControlPlane;
use crate::shell::Shell;

/// One file headed for artifact storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    /// Path relative to the search root, as shown in the UI.
    pub path: String,
    pub absolute_path: String,
    pub file_size: u64,
    pub sha256: String,
    pub content_type: String,
}

/// Collect, register, and finalize artifacts for the job. `patterns` is
/// the raw `ARTIFACT_PATHS` value: glob patterns separated by `;` or
/// newlines, resolved against the shell's working directory.
pub async fn upload_artifacts(
    shell: &Shell,
    control: &dyn ControlPlane,
    job_id: &str,
    patterns: &str,
    destination: &str,
) -> Result<usize> {
    let root = shell.wd();
    let files = collect_files(&root, patterns)?;
    if files.is_empty() {
        shell.writeln(&format!("No artifacts found for {patterns:?}"));
        return Ok(0);
    }

    let mut batch = Vec::with_capacity(files.len());
    for file in &files {
        batch.push(describe(&root, file)?);
    }

    if destination.is_empty() {
        shell.writeln(&format!("Uploading {} artifacts", batch.len()));
    } else {
        shell.writeln(&format!("Uploading {} artifacts to {destination}", batch.len()));
    }
    control
        .create_artifacts(job_id, &batch)
        .await
        .context("registering artifact batch")?;

    let states: Vec<(String, String)> = batch
        .iter()
        .map(|a| (a.id.clone(), "finished".to_string()))
        .collect();
    control
        .update_artifacts(job_id, &states)
        .await
        .context("finalizing artifact states")?;

    Ok(batch.len())
}

/// Resolve the patterns to a sorted, de-duplicated set of files. A
/// pattern that matches a directory pulls in everything beneath it.
fn collect_files(root: &Path, patterns: &str) -> Result<Vec<PathBuf>> {
    let mut files = BTreeSet::new();
    for pattern in patterns
        .split(|c| c == ';' || c == '\n')
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        let absolute = root.join(pattern);
        let matches = glob::glob(&absolute.to_string_lossy())
            .with_context(|| format!("bad artifact pattern {pattern:?}"))?;
        for entry in matches {
            let path = entry.with_context(|| format!("resolving artifact pattern {pattern:?}"))?;
            if path.is_dir() {
                for entry in walkdir::WalkDir::new(&path) {
                    let entry = entry.context("walking artifact directory")?;
                    if entry.file_type().is_file() {
                        files.insert(entry.into_path());
                    }
                }
            } else if path.is_file() {
                files.insert(path);
            }
        }
    }
    Ok(files.into_iter().collect())
}

fn describe(root: &Path, file: &Path) -> Result<Artifact> {
    let metadata = std::fs::metadata(file)
        .with_context(|| format!("reading metadata for {}", file.display()))?;
    let relative = file
        .strip_prefix(root)
        .unwrap_or(file)
        .to_string_lossy()
        .into_owned();
    Ok(Artifact {
        id: uuid::Uuid::new_v4().to_string(),
        path: relative,
        absolute_path: file.to_string_lossy().into_owned(),
        file_size: metadata.len(),
        sha256: sha256_of(file)?,
        content_type: mime_guess::from_path(file)
            .first_or_octet_stream()
            .to_string(),
    })
}

fn sha256_of(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("opening {} for checksum", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).context("reading artifact")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}
