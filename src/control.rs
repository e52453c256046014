//! The control-plane capability.
//!
//! The executor never speaks a wire protocol directly; everything it
//! needs from the outside world is behind `ControlPlane`. Production uses
//! `HttpControlPlane`; tests and `--dry-run` use `InMemoryControlPlane`,
//! which records every call for later inspection.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::cancel::CancelToken;
use crate::errors::SignalReason;
use crate::logstream::Chunk;
use crate::retry::Retrier;

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn start_job(&self, job_id: &str) -> Result<()>;

    async fn finish_job(
        &self,
        job_id: &str,
        exit_status: i32,
        signal_reason: SignalReason,
        failed_chunk_count: usize,
    ) -> Result<()>;

    async fn upload_chunk(&self, job_id: &str, chunk: &Chunk) -> Result<()>;

    async fn create_artifacts(&self, job_id: &str, batch: &[Artifact]) -> Result<()>;

    async fn update_artifacts(&self, job_id: &str, states: &[(String, String)]) -> Result<()>;

    async fn meta_data_exists(&self, job_id: &str, key: &str) -> Result<bool>;

    async fn meta_data_set(&self, job_id: &str, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct FinishPayload<'a> {
    exit_status: i32,
    signal_reason: &'a str,
    chunks_failed_count: usize,
    finished_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
struct MetaDataKey<'a> {
    key: &'a str,
}

#[derive(Debug, Deserialize)]
struct MetaDataExists {
    exists: bool,
}

#[derive(Debug, Serialize)]
struct MetaDataSet<'a> {
    key: &'a str,
    value: &'a str,
}

/// HTTP client for the control plane. Every call carries the job access
/// token and runs under a small exponential retry; the transport owns
/// serialization and nothing else.
pub struct HttpControlPlane {
    base_url: String,
    token: String,
    client: reqwest::Client,
    retrier: Retrier,
}

impl HttpControlPlane {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build control plane HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
            retrier: Retrier::exponential(5, Duration::from_secs(1), Duration::from_secs(30)),
        })
    }

    fn url(&self, job_id: &str, tail: &str) -> String {
        format!("{}/jobs/{}/{}", self.base_url, job_id, tail)
    }

    async fn send(&self, build: impl Fn() -> reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.retrier
            .run(&CancelToken::never(), |attempt| {
                let req = build().bearer_auth(&self.token);
                async move {
                    let resp = req.send().await.with_context(|| {
                        format!("control plane request failed (attempt {attempt})")
                    })?;
                    resp.error_for_status()
                        .context("control plane returned an error status")
                }
            })
            .await
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn start_job(&self, job_id: &str) -> Result<()> {
        let url = self.url(job_id, "start");
        self.send(|| self.client.post(&url)).await?;
        Ok(())
    }

    async fn finish_job(
        &self,
        job_id: &str,
        exit_status: i32,
        signal_reason: SignalReason,
        failed_chunk_count: usize,
    ) -> Result<()> {
        let url = self.url(job_id, "finish");
        let payload = FinishPayload {
            exit_status,
            signal_reason: signal_reason.as_str(),
            chunks_failed_count: failed_chunk_count,
            finished_at: chrono::Utc::now(),
        };
        self.send(|| self.client.put(&url).json(&payload)).await?;
        Ok(())
    }

    async fn upload_chunk(&self, job_id: &str, chunk: &Chunk) -> Result<()> {
        let url = format!(
            "{}?sequence={}&offset={}&size={}",
            self.url(job_id, "chunks"),
            chunk.sequence,
            chunk.offset,
            chunk.size,
        );
        self.send(|| {
            self.client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(chunk.data.clone())
        })
        .await?;
        Ok(())
    }

    async fn create_artifacts(&self, job_id: &str, batch: &[Artifact]) -> Result<()> {
        let url = self.url(job_id, "artifacts");
        self.send(|| self.client.post(&url).json(&batch)).await?;
        Ok(())
    }

    async fn update_artifacts(&self, job_id: &str, states: &[(String, String)]) -> Result<()> {
        let url = self.url(job_id, "artifacts");
        let body: HashMap<&str, &str> = states
            .iter()
            .map(|(id, state)| (id.as_str(), state.as_str()))
            .collect();
        self.send(|| self.client.put(&url).json(&body)).await?;
        Ok(())
    }

    async fn meta_data_exists(&self, job_id: &str, key: &str) -> Result<bool> {
        let url = self.url(job_id, "data/exists");
        let resp = self
            .send(|| self.client.post(&url).json(&MetaDataKey { key }))
            .await?;
        let body: MetaDataExists = resp
            .json()
            .await
            .context("malformed meta-data exists response")?;
        Ok(body.exists)
    }

    async fn meta_data_set(&self, job_id: &str, key: &str, value: &str) -> Result<()> {
        let url = self.url(job_id, "data/set");
        self.send(|| self.client.post(&url).json(&MetaDataSet { key, value }))
            .await?;
        Ok(())
    }
}

/// Everything `InMemoryControlPlane` has been told, for assertions and
/// dry-run summaries.
#[derive(Debug, Default)]
pub struct RecordedJob {
    pub started: bool,
    pub finished: Option<(i32, String, usize)>,
    pub chunks: Vec<Chunk>,
    pub artifacts: Vec<Artifact>,
    pub artifact_states: Vec<(String, String)>,
    pub meta_data: HashMap<String, String>,
}

/// A control plane that records calls instead of making them. Backs the
/// test suite and `--dry-run`.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    state: Mutex<RecordedJob>,
    /// When set, this many chunk uploads fail before uploads start
    /// succeeding again. Lets tests exercise the failed-chunk counter.
    fail_next_chunks: Mutex<usize>,
    /// When set, artifact registration fails. Lets tests exercise the
    /// artifact error-suppression rules.
    fail_artifacts: Mutex<bool>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_chunks(&self, n: usize) {
        *self.fail_next_chunks.lock().unwrap() = n;
    }

    pub fn fail_artifacts(&self, fail: bool) {
        *self.fail_artifacts.lock().unwrap() = fail;
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&RecordedJob) -> T) -> T {
        f(&self.state.lock().unwrap())
    }

    /// The uploaded log reassembled in sequence order.
    pub fn log_bytes(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let mut chunks: Vec<&Chunk> = state.chunks.iter().collect();
        chunks.sort_by_key(|c| c.sequence);
        chunks.iter().flat_map(|c| c.data.iter().copied()).collect()
    }

    pub fn log_string(&self) -> String {
        String::from_utf8_lossy(&self.log_bytes()).into_owned()
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn start_job(&self, _job_id: &str) -> Result<()> {
        self.state.lock().unwrap().started = true;
        Ok(())
    }

    async fn finish_job(
        &self,
        _job_id: &str,
        exit_status: i32,
        signal_reason: SignalReason,
        failed_chunk_count: usize,
    ) -> Result<()> {
        self.state.lock().unwrap().finished = Some((
            exit_status,
            signal_reason.as_str().to_string(),
            failed_chunk_count,
        ));
        Ok(())
    }

    async fn upload_chunk(&self, _job_id: &str, chunk: &Chunk) -> Result<()> {
        {
            let mut failures = self.fail_next_chunks.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("injected chunk upload failure");
            }
        }
        self.state.lock().unwrap().chunks.push(chunk.clone());
        Ok(())
    }

    async fn create_artifacts(&self, _job_id: &str, batch: &[Artifact]) -> Result<()> {
        if *self.fail_artifacts.lock().unwrap() {
            anyhow::bail!("injected artifact registration failure");
        }
        self.state.lock().unwrap().artifacts.extend_from_slice(batch);
        Ok(())
    }

    async fn update_artifacts(&self, _job_id: &str, states: &[(String, String)]) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .artifact_states
            .extend_from_slice(states);
        Ok(())
    }

    async fn meta_data_exists(&self, _job_id: &str, key: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().meta_data.contains_key(key))
    }

    async fn meta_data_set(&self, _job_id: &str, key: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .meta_data
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
