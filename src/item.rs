//! Queue item model and share-listing input types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::JobHandle;

/// Status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting in the backlog for a free slot.
    Pending,
    /// Admitted; a download link is being resolved.
    Resolving,
    /// Submitted to the download engine (or about to be).
    Active,
    /// The engine reported the transfer finished.
    Completed,
    /// Resolution or the transfer failed.
    Failed,
    /// The job was cancelled, locally or engine-side.
    Cancelled,
}

impl ItemStatus {
    /// Returns the wire/display string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true for states that never transition again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true for states that occupy a concurrency slot.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Resolving | Self::Active)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolving" => Ok(Self::Resolving),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid item status: {s}")),
        }
    }
}

/// One file selected from a shared listing.
///
/// The descriptor is immutable once the file enters the queue; progress is
/// tracked on the [`QueueItem`], never here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFile {
    /// Source-side file identifier; doubles as the queue item id.
    pub id: String,
    /// Display name, also used as the saved filename.
    pub name: String,
    /// Declared size in bytes as reported by the listing.
    #[serde(default)]
    pub size: u64,
    /// Listing-provided category (video, archive, ...), when present.
    #[serde(default)]
    pub category: Option<String>,
}

/// Which kind of download link to request from the share API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMode {
    /// Plain direct-download link.
    #[default]
    Direct,
    /// Streaming-optimized link.
    Streaming,
}

impl ResolveMode {
    /// Returns the wire string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Streaming => "streaming",
        }
    }
}

/// Share-level resolution inputs common to every file of one listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionTemplate {
    /// Identifier of the shared listing.
    pub share_id: String,
    /// Signing data issued with the listing.
    pub sign: String,
    /// Timestamp the signature was issued for.
    pub timestamp: u64,
    /// Requested link kind.
    #[serde(default)]
    pub mode: ResolveMode,
}

impl ResolutionTemplate {
    /// Combines the share-level inputs with one file id into the full
    /// parameter set the resolver needs.
    #[must_use]
    pub fn params_for(&self, file_id: &str) -> ResolutionParams {
        ResolutionParams {
            share_id: self.share_id.clone(),
            file_id: file_id.to_string(),
            sign: self.sign.clone(),
            timestamp: self.timestamp,
            mode: self.mode,
        }
    }
}

/// Everything needed to resolve a download link for a single file.
///
/// Immutable once attached to a queue item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionParams {
    /// Identifier of the shared listing.
    pub share_id: String,
    /// File to resolve within the listing.
    pub file_id: String,
    /// Signing data issued with the listing.
    pub sign: String,
    /// Timestamp the signature was issued for.
    pub timestamp: u64,
    /// Requested link kind.
    pub mode: ResolveMode,
}

/// A single item tracked by the download queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    /// Unique identifier, equal to the source file id.
    pub id: String,
    /// Immutable descriptor of the target file.
    pub file: SharedFile,
    /// Current lifecycle state.
    pub status: ItemStatus,
    /// Engine job handle, present once submission succeeded.
    pub engine_handle: Option<JobHandle>,
    /// Completed share of the transfer, 0-100.
    pub progress_percent: f64,
    /// Bytes transferred so far, as reported by the engine.
    pub bytes_downloaded: u64,
    /// Total transfer size; starts at the declared size, overwritten by the
    /// engine once known.
    pub bytes_total: u64,
    /// Current transfer speed in bytes per second.
    pub speed_bps: u64,
    /// Failure description, set when entering a failed or cancelled state.
    pub last_error: Option<String>,
    /// Inputs for resolving this item's download link.
    pub params: ResolutionParams,
    /// Per-item directory override; queue default applies when absent.
    pub target_dir: Option<PathBuf>,
}

impl QueueItem {
    /// Creates a pending item for one selected file.
    #[must_use]
    pub fn new(file: SharedFile, params: ResolutionParams, target_dir: Option<PathBuf>) -> Self {
        let declared_size = file.size;
        Self {
            id: file.id.clone(),
            file,
            status: ItemStatus::Pending,
            engine_handle: None,
            progress_percent: 0.0,
            bytes_downloaded: 0,
            bytes_total: declared_size,
            speed_bps: 0,
            last_error: None,
            params,
            target_dir,
        }
    }
}

impl fmt::Display for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueItem {{ id: {}, name: {}, status: {} }}",
            self.id, self.file.name, self.status
        )
    }
}

/// A saved selection from a shared listing, as consumed by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareManifest {
    /// Identifier of the shared listing.
    pub share_id: String,
    /// Signing data issued with the listing.
    pub sign: String,
    /// Timestamp the signature was issued for.
    pub timestamp: u64,
    /// Requested link kind for every file.
    #[serde(default)]
    pub mode: ResolveMode,
    /// The selected files.
    pub files: Vec<SharedFile>,
}

impl ShareManifest {
    /// Returns the share-level resolution template for this manifest.
    #[must_use]
    pub fn template(&self) -> ResolutionTemplate {
        ResolutionTemplate {
            share_id: self.share_id.clone(),
            sign: self.sign.clone(),
            timestamp: self.timestamp,
            mode: self.mode,
        }
    }
}
