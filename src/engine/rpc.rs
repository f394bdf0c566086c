//! JSON-RPC client for an aria2-compatible download engine.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{EngineClient, EngineError, EngineLauncher, JobHandle, JobState, JobStatus};

const RPC_TIMEOUT: Duration = Duration::from_secs(30);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const STARTUP_PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// JSON-RPC request envelope.
#[derive(Debug, serde::Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    params: Vec<Value>,
}

/// JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcFailure>,
}

#[derive(Debug, Deserialize)]
struct RpcFailure {
    code: i64,
    message: String,
}

/// Job status as it crosses the wire: the engine reports its counters as
/// decimal strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJobStatus {
    status: String,
    #[serde(default)]
    completed_length: Option<String>,
    #[serde(default)]
    total_length: Option<String>,
    #[serde(default)]
    download_speed: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

fn parse_counter(value: Option<&String>) -> u64 {
    value.and_then(|s| s.parse().ok()).unwrap_or(0)
}

/// Client for an aria2-compatible JSON-RPC download engine.
///
/// Optionally manages the engine as a side process: when constructed with an
/// [`EngineLauncher`], `ensure_started` spawns the daemon if the RPC
/// endpoint is unreachable and waits until it answers.
#[derive(Debug)]
pub struct RpcEngineClient {
    http: reqwest::Client,
    rpc_url: String,
    launcher: Option<EngineLauncher>,
    process: Mutex<Option<Child>>,
    request_seq: AtomicU64,
}

impl RpcEngineClient {
    /// Creates a client for an externally managed engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transport`] if the HTTP client cannot be
    /// constructed.
    pub fn new(rpc_url: &str) -> Result<Self, EngineError> {
        Self::build(rpc_url, None)
    }

    /// Creates a client that may start the engine itself.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transport`] if the HTTP client cannot be
    /// constructed.
    pub fn with_launcher(rpc_url: &str, launcher: EngineLauncher) -> Result<Self, EngineError> {
        Self::build(rpc_url, Some(launcher))
    }

    fn build(rpc_url: &str, launcher: Option<EngineLauncher>) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder().timeout(RPC_TIMEOUT).build()?;
        Ok(Self {
            http,
            rpc_url: rpc_url.to_string(),
            launcher,
            process: Mutex::new(None),
            request_seq: AtomicU64::new(0),
        })
    }

    /// Returns the RPC endpoint this client talks to.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, EngineError> {
        let seq = self.request_seq.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: format!("sharefetch-{seq}"),
            method,
            params,
        };

        let response = self.http.post(&self.rpc_url).json(&request).send().await?;
        let envelope: RpcResponse<T> = response.json().await?;

        if let Some(failure) = envelope.error {
            return Err(EngineError::Rpc {
                code: failure.code,
                message: failure.message,
            });
        }

        envelope
            .result
            .ok_or_else(|| EngineError::invalid_response("missing result payload"))
    }

    /// Probes whether the engine's RPC endpoint is answering.
    pub async fn is_running(&self) -> bool {
        self.get_version().await.is_ok()
    }

    /// Queries the engine's version banner; doubles as the liveness probe.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the endpoint is unreachable.
    pub async fn get_version(&self) -> Result<Value, EngineError> {
        self.call("aria2.getVersion", Vec::new()).await
    }

    /// Pauses a submitted job.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the RPC call fails.
    pub async fn pause(&self, handle: &JobHandle) -> Result<(), EngineError> {
        let _gid: String = self.call("aria2.pause", vec![json!(handle.as_str())]).await?;
        Ok(())
    }

    /// Resumes a paused job.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the RPC call fails.
    pub async fn resume(&self, handle: &JobHandle) -> Result<(), EngineError> {
        let _gid: String = self
            .call("aria2.unpause", vec![json!(handle.as_str())])
            .await?;
        Ok(())
    }

    /// Stops an engine daemon this client manages.
    ///
    /// Kills the spawned child when there is one, then issues a best-effort
    /// RPC shutdown for anything still listening on the endpoint.
    pub async fn stop(&self) {
        if let Some(mut child) = self.process.lock().await.take() {
            if let Err(error) = child.start_kill() {
                warn!(error = %error, "failed to kill engine process");
            }
            let _ = child.wait().await;
        }

        let _ = self.shutdown_engine().await;
    }

    async fn shutdown_engine(&self) -> Result<(), EngineError> {
        let _ack: String = self.call("aria2.shutdown", Vec::new()).await?;
        Ok(())
    }
}

#[async_trait]
impl EngineClient for RpcEngineClient {
    #[tracing::instrument(skip(self), fields(rpc_url = %self.rpc_url))]
    async fn ensure_started(&self) -> Result<(), EngineError> {
        if self.is_running().await {
            return Ok(());
        }

        let Some(launcher) = &self.launcher else {
            return Err(EngineError::not_running(&self.rpc_url));
        };

        // Serialize starters; whoever got here second just re-probes.
        let mut process = self.process.lock().await;
        if self.is_running().await {
            return Ok(());
        }

        info!(binary = %launcher.binary.display(), "starting download engine");
        *process = Some(launcher.spawn()?);

        let started = Instant::now();
        while started.elapsed() < STARTUP_TIMEOUT {
            tokio::time::sleep(STARTUP_PROBE_INTERVAL).await;
            if self.is_running().await {
                info!("download engine is ready");
                return Ok(());
            }
        }

        Err(EngineError::StartTimeout {
            timeout_secs: STARTUP_TIMEOUT.as_secs(),
        })
    }

    #[tracing::instrument(skip(self, url, dir, filename))]
    async fn submit(
        &self,
        url: &str,
        dir: Option<&Path>,
        filename: Option<&str>,
    ) -> Result<JobHandle, EngineError> {
        let mut options = serde_json::Map::new();
        if let Some(dir) = dir {
            options.insert("dir".to_string(), json!(dir.display().to_string()));
        }
        if let Some(filename) = filename {
            options.insert("out".to_string(), json!(filename));
        }

        let gid: String = self
            .call("aria2.addUri", vec![json!([url]), Value::Object(options)])
            .await?;
        debug!(gid = %gid, "engine accepted download");
        Ok(JobHandle::new(gid))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, EngineError> {
        let raw: RawJobStatus = self
            .call("aria2.tellStatus", vec![json!(handle.as_str())])
            .await?;

        let state: JobState = raw.status.parse().map_err(|_| {
            EngineError::invalid_response(&format!("unknown job state '{}'", raw.status))
        })?;

        Ok(JobStatus {
            state,
            bytes_downloaded: parse_counter(raw.completed_length.as_ref()),
            bytes_total: parse_counter(raw.total_length.as_ref()),
            speed_bps: parse_counter(raw.download_speed.as_ref()),
            error_message: raw.error_message,
        })
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), EngineError> {
        let _gid: String = self
            .call("aria2.forceRemove", vec![json!(handle.as_str())])
            .await?;
        debug!(gid = %handle, "engine cancelled download");
        Ok(())
    }
}
