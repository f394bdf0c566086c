//! Application settings shared by the queue, resolver, and engine clients.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::DEFAULT_CONCURRENCY;

/// Default engine status poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default engine JSON-RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "http://localhost:6800/jsonrpc";

/// Runtime configuration for a download session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory completed downloads are written to.
    pub download_dir: PathBuf,
    /// Maximum number of in-flight queue items.
    pub concurrency: usize,
    /// Engine status poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Download engine JSON-RPC endpoint.
    pub rpc_url: String,
    /// Share API base URL used to resolve download links.
    pub api_base: Option<String>,
    /// Engine binary to spawn when the RPC endpoint is unreachable.
    pub engine_binary: Option<PathBuf>,
    /// Overall bandwidth cap in KB/s passed to the engine (0 = unlimited).
    pub max_overall_download_limit_kb_per_sec: u64,
    /// Per-download bandwidth cap in KB/s passed to the engine (0 = unlimited).
    pub max_download_limit_kb_per_sec: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            rpc_url: DEFAULT_RPC_URL.to_string(),
            api_base: None,
            engine_binary: None,
            max_overall_download_limit_kb_per_sec: 0,
            max_download_limit_kb_per_sec: 0,
        }
    }
}

impl Settings {
    /// Returns the poll interval as a [`Duration`], clamped to at least 1 ms.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Formats a KB/s bandwidth value for display.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn format_bandwidth(kb_per_sec: u64) -> String {
        if kb_per_sec == 0 {
            "Unlimited".to_string()
        } else if kb_per_sec >= 1024 {
            format!("{:.2} MB/s", kb_per_sec as f64 / 1024.0)
        } else {
            format!("{kb_per_sec} KB/s")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.download_dir, PathBuf::from("downloads"));
        assert_eq!(settings.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(settings.poll_interval_ms, 1000);
        assert_eq!(settings.rpc_url, DEFAULT_RPC_URL);
        assert!(settings.api_base.is_none());
        assert!(settings.engine_binary.is_none());
        assert_eq!(settings.max_overall_download_limit_kb_per_sec, 0);
    }

    #[test]
    fn test_poll_interval_clamps_zero() {
        let settings = Settings {
            poll_interval_ms: 0,
            ..Settings::default()
        };
        assert_eq!(settings.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_settings_deserialize_fills_missing_fields() {
        let settings: Settings = serde_json::from_str(r#"{ "concurrency": 7 }"#).unwrap();
        assert_eq!(settings.concurrency, 7);
        assert_eq!(settings.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(settings.rpc_url, DEFAULT_RPC_URL);
    }

    #[test]
    fn test_format_bandwidth_zero_is_unlimited() {
        assert_eq!(Settings::format_bandwidth(0), "Unlimited");
    }

    #[test]
    fn test_format_bandwidth_kb_and_mb() {
        assert_eq!(Settings::format_bandwidth(512), "512 KB/s");
        assert_eq!(Settings::format_bandwidth(1024), "1.00 MB/s");
        assert_eq!(Settings::format_bandwidth(2560), "2.50 MB/s");
    }
}
