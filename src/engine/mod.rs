//! Download engine client interface and job status types.
//!
//! The engine itself is an external side process; this module only defines
//! how the queue talks to it. The queue depends on the object-safe
//! [`EngineClient`] trait; the production implementation is
//! [`RpcEngineClient`], which drives an aria2-compatible JSON-RPC endpoint.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod daemon;
mod rpc;

pub use daemon::EngineLauncher;
pub use rpc::RpcEngineClient;

/// Opaque reference to a job submitted to the download engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    /// Wraps an engine-issued job identifier.
    #[must_use]
    pub fn new(gid: impl Into<String>) -> Self {
        Self(gid.into())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine-side state of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Transfer in progress.
    Active,
    /// Queued engine-side, not yet transferring.
    Waiting,
    /// Paused engine-side.
    Paused,
    /// Transfer finished successfully.
    Complete,
    /// Transfer failed.
    Error,
    /// Job was removed engine-side (e.g. cancelled externally).
    Removed,
}

impl JobState {
    /// Returns the wire string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Waiting => "waiting",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Removed => "removed",
        }
    }

    /// Returns true for states the engine never leaves.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Removed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "waiting" => Ok(Self::Waiting),
            "paused" => Ok(Self::Paused),
            "complete" => Ok(Self::Complete),
            "error" => Ok(Self::Error),
            "removed" => Ok(Self::Removed),
            _ => Err(format!("invalid job state: {s}")),
        }
    }
}

/// Snapshot of one job as reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    /// Engine-side state.
    pub state: JobState,
    /// Bytes transferred so far.
    pub bytes_downloaded: u64,
    /// Total transfer size when known, 0 otherwise.
    pub bytes_total: u64,
    /// Current transfer speed in bytes per second.
    pub speed_bps: u64,
    /// Engine-provided failure description, when any.
    pub error_message: Option<String>,
}

impl JobStatus {
    /// Returns the completed share of the transfer, 0-100.
    ///
    /// Unknown totals report 0 rather than dividing by zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_percent(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_downloaded as f64 / self.bytes_total as f64) * 100.0
    }
}

/// Errors that can occur while talking to the download engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport-level RPC failure (connection refused, timeout, bad JSON).
    #[error("engine RPC transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The engine answered with an RPC-level error object.
    #[error("engine rejected the request: {message} (code {code})")]
    Rpc {
        /// RPC error code.
        code: i64,
        /// RPC error message.
        message: String,
    },

    /// The engine answered but the payload was not usable.
    #[error("unexpected engine response: {reason}")]
    InvalidResponse {
        /// What was wrong with the payload.
        reason: String,
    },

    /// No engine is reachable and no binary is configured to start one.
    #[error("download engine is not running at {rpc_url}")]
    NotRunning {
        /// The RPC endpoint that was probed.
        rpc_url: String,
    },

    /// A spawned engine process never opened its RPC endpoint.
    #[error("download engine did not become ready within {timeout_secs}s")]
    StartTimeout {
        /// Seconds waited before giving up.
        timeout_secs: u64,
    },

    /// The engine binary could not be spawned.
    #[error("failed to start download engine process: {source}")]
    Spawn {
        /// Underlying process-spawn failure.
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Creates an `InvalidResponse` error.
    #[must_use]
    pub fn invalid_response(reason: &str) -> Self {
        Self::InvalidResponse {
            reason: reason.to_string(),
        }
    }

    /// Creates a `NotRunning` error.
    #[must_use]
    pub fn not_running(rpc_url: &str) -> Self {
        Self::NotRunning {
            rpc_url: rpc_url.to_string(),
        }
    }
}

/// Client surface of the external download engine.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Makes sure the engine's RPC endpoint is answering, starting the side
    /// process when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotRunning`] when the engine is unreachable
    /// and cannot be started, and [`EngineError::StartTimeout`] /
    /// [`EngineError::Spawn`] when starting it fails.
    async fn ensure_started(&self) -> Result<(), EngineError>;

    /// Submits one URL for download and returns the engine's job handle.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the RPC call fails.
    async fn submit(
        &self,
        url: &str,
        dir: Option<&Path>,
        filename: Option<&str>,
    ) -> Result<JobHandle, EngineError>;

    /// Queries the current status of a submitted job.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the RPC call fails or the status
    /// payload is unusable.
    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, EngineError>;

    /// Cancels a submitted job.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the RPC call fails; callers treat
    /// cancellation as best-effort.
    async fn cancel(&self, handle: &JobHandle) -> Result<(), EngineError>;
}
