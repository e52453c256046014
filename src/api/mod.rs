//! The local Job API.
//!
//! A per-job HTTP server on a Unix domain socket that the running
//! command can call to read and mutate its own environment and to
//! register new secrets with the redactor mid-run. The socket lives in a
//! 0700 directory, the path is validated against the platform's socket
//! address limit before listening, and every request must carry the
//! job's bearer token. Handlers serialize through one mutex: the
//! environment they mutate is the same one the phase task reads.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::redact::RedactorHandle;
use crate::shell::Shell;

/// Env var telling the job where the socket is.
pub const ENV_SOCKET: &str = "BUILDKITE_AGENT_JOB_API_SOCKET";
/// Env var carrying the bearer token.
pub const ENV_TOKEN: &str = "BUILDKITE_AGENT_JOB_API_TOKEN";

/// `sockaddr_un.sun_path` is 104 bytes on Darwin/BSD, 108 on Linux.
#[cfg(target_os = "macos")]
const MAX_SOCKET_PATH: usize = 104;
#[cfg(not(target_os = "macos"))]
const MAX_SOCKET_PATH: usize = 108;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

struct ApiState {
    token: String,
    shell: Shell,
    redactor: RedactorHandle,
    protected: HashSet<String>,
    /// Serializes every handler; the env and redactor are shared with
    /// the phase task.
    guard: Mutex<()>,
}

/// The running server. Stop it during teardown, after pre-exit hooks.
pub struct JobApiServer {
    socket_path: PathBuf,
    token: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl JobApiServer {
    /// Bind and serve. The caller exports `ENV_SOCKET`/`ENV_TOKEN` to the
    /// job environment.
    #[cfg(unix)]
    pub async fn start(
        sockets_path: &Path,
        shell: Shell,
        redactor: RedactorHandle,
        protected: HashSet<String>,
    ) -> Result<Self> {
        let socket_path = socket_path_for(sockets_path)?;
        let socket_dir = socket_path.parent().context("socket path has no parent")?;
        create_private_dir(socket_dir)?;

        let token = generate_token();
        let state = Arc::new(ApiState {
            token: token.clone(),
            shell,
            redactor,
            protected,
            guard: Mutex::new(()),
        });

        let listener = tokio::net::UnixListener::bind(&socket_path)
            .with_context(|| format!("binding job api socket at {}", socket_path.display()))?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = build_router(state);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::warn!(error = %e, "job api server error");
            }
        });

        tracing::debug!(socket = %socket_path.display(), "job api listening");
        Ok(Self {
            socket_path,
            token,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Graceful shutdown with a bounded deadline; pending requests finish
    /// or are cut.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(SHUTDOWN_DEADLINE, handle).await.is_err() {
                tracing::warn!("job api did not stop within deadline");
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Random, unguessable socket name under `<sockets_path>/job-api`,
/// length-checked against the platform limit before any bind.
fn socket_path_for(sockets_path: &Path) -> Result<PathBuf> {
    let path = sockets_path.join("job-api").join(format!(
        "{}-{}.sock",
        std::process::id(),
        uuid::Uuid::new_v4().simple(),
    ));
    let len = path.as_os_str().len();
    if len > MAX_SOCKET_PATH {
        bail!(
            "job api socket path {} is {len} bytes, over the platform limit of {MAX_SOCKET_PATH}; \
             use a shorter sockets directory",
            path.display(),
        );
    }
    Ok(path)
}

fn create_private_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .with_context(|| format!("creating socket dir {}", dir.display()))?;
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating socket dir {}", dir.display()))?;
    }
    Ok(())
}

/// 32 bytes of randomness, hex-encoded (URL- and header-safe).
fn generate_token() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route(
            "/api/current-job/v0/env",
            get(get_env).patch(patch_env).delete(delete_env),
        )
        .route("/api/current-job/v0/redactions", post(post_redaction))
        .layer(middleware::from_fn_with_state(state.clone(), require_bearer))
        .with_state(state)
}

async fn require_bearer(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|candidate| candidate == state.token);
    if !authorized {
        return error_response(StatusCode::UNAUTHORIZED, "invalid or missing bearer token");
    }
    next.run(request).await
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct EnvResponse {
    env: BTreeMap<String, String>,
}

async fn get_env(State(state): State<Arc<ApiState>>) -> Response {
    let _guard = state.guard.lock().await;
    let env = state.shell.with_env(|env| {
        env.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>()
    });
    Json(EnvResponse { env }).into_response()
}

#[derive(Debug, Deserialize)]
struct PatchEnvRequest {
    env: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Serialize)]
struct PatchEnvResponse {
    added: Vec<String>,
    updated: Vec<String>,
}

async fn patch_env(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<PatchEnvRequest>,
) -> Response {
    let _guard = state.guard.lock().await;

    let nulls: Vec<&String> = request
        .env
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(k, _)| k)
        .collect();
    if !nulls.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("removing variables is not supported by PATCH (use DELETE): {nulls:?}"),
        );
    }
    if let Some(protected) = first_protected(&state, request.env.keys()) {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("{protected} is protected and cannot be modified"),
        );
    }

    let mut added = Vec::new();
    let mut updated = Vec::new();
    state.shell.with_env(|env| {
        for (key, value) in &request.env {
            let value = value.as_deref().unwrap_or_default();
            if env.contains(key) {
                updated.push(key.clone());
            } else {
                added.push(key.clone());
            }
            env.set(key, value);
        }
    });
    added.sort();
    updated.sort();
    Json(PatchEnvResponse { added, updated }).into_response()
}

#[derive(Debug, Deserialize)]
struct DeleteEnvRequest {
    keys: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DeleteEnvResponse {
    deleted: Vec<String>,
}

async fn delete_env(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<DeleteEnvRequest>,
) -> Response {
    let _guard = state.guard.lock().await;

    if let Some(protected) = first_protected(&state, request.keys.iter()) {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("{protected} is protected and cannot be deleted"),
        );
    }

    let mut deleted = Vec::new();
    state.shell.with_env(|env| {
        for key in &request.keys {
            if env.remove(key).is_some() {
                deleted.push(key.clone());
            }
        }
    });
    deleted.sort();
    Json(DeleteEnvResponse { deleted }).into_response()
}

#[derive(Debug, Deserialize)]
struct RedactionRequest {
    redact: String,
}

#[derive(Debug, Serialize)]
struct RedactionResponse {
    redacted: String,
}

async fn post_redaction(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<RedactionRequest>,
) -> Response {
    let _guard = state.guard.lock().await;
    if let Err(e) = state.redactor.add_secret(&request.redact) {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to register redaction: {e}"),
        );
    }
    Json(RedactionResponse {
        redacted: request.redact,
    })
    .into_response()
}

fn first_protected<'a>(
    state: &ApiState,
    keys: impl Iterator<Item = &'a String>,
) -> Option<String> {
    for key in keys {
        if state.protected.contains(key.as_str()) {
            return Some(key.clone());
        }
    }
    None
}
