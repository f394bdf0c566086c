//! Side-process management for the download engine daemon.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};

use super::EngineError;

const DEFAULT_RPC_PORT: u16 = 6800;

/// Configuration for spawning the download engine as a side process.
///
/// The launch arguments mirror an aria2-style engine: RPC enabled on the
/// loopback interface, multi-connection splitting, and the configured
/// bandwidth caps.
#[derive(Debug, Clone)]
pub struct EngineLauncher {
    /// Engine executable to spawn.
    pub binary: PathBuf,
    /// RPC port the engine listens on.
    pub rpc_port: u16,
    /// Overall bandwidth cap in KB/s (0 = unlimited).
    pub max_overall_limit_kb_per_sec: u64,
    /// Per-download bandwidth cap in KB/s (0 = unlimited).
    pub max_download_limit_kb_per_sec: u64,
}

impl EngineLauncher {
    /// Creates a launcher for the given binary with default tuning.
    #[must_use]
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            rpc_port: DEFAULT_RPC_PORT,
            max_overall_limit_kb_per_sec: 0,
            max_download_limit_kb_per_sec: 0,
        }
    }

    /// Returns the full argument list the engine is spawned with.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        vec![
            "--enable-rpc".to_string(),
            "--rpc-listen-all=false".to_string(),
            format!("--rpc-listen-port={}", self.rpc_port),
            "--max-concurrent-downloads=5".to_string(),
            "--max-connection-per-server=16".to_string(),
            "--split=16".to_string(),
            "--min-split-size=1M".to_string(),
            format!(
                "--max-overall-download-limit={}K",
                self.max_overall_limit_kb_per_sec
            ),
            format!("--max-download-limit={}K", self.max_download_limit_kb_per_sec),
            "--file-allocation=none".to_string(),
            "--continue=true".to_string(),
            "--auto-file-renaming=true".to_string(),
            "--allow-overwrite=false".to_string(),
        ]
    }

    /// Spawns the engine process detached from our stdio.
    ///
    /// The child is killed when its handle is dropped, so a crashing client
    /// does not leave engine processes behind.
    pub(crate) fn spawn(&self) -> Result<Child, EngineError> {
        Command::new(&self.binary)
            .args(self.args())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn { source })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_launcher_defaults() {
        let launcher = EngineLauncher::new(PathBuf::from("aria2c"));
        assert_eq!(launcher.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(launcher.max_overall_limit_kb_per_sec, 0);
        assert_eq!(launcher.max_download_limit_kb_per_sec, 0);
    }

    #[test]
    fn test_args_enable_rpc_on_configured_port() {
        let launcher = EngineLauncher {
            rpc_port: 7700,
            ..EngineLauncher::new(PathBuf::from("aria2c"))
        };
        let args = launcher.args();
        assert!(args.contains(&"--enable-rpc".to_string()));
        assert!(args.contains(&"--rpc-listen-all=false".to_string()));
        assert!(args.contains(&"--rpc-listen-port=7700".to_string()));
    }

    #[test]
    fn test_args_carry_bandwidth_limits() {
        let launcher = EngineLauncher {
            max_overall_limit_kb_per_sec: 2048,
            max_download_limit_kb_per_sec: 512,
            ..EngineLauncher::new(PathBuf::from("aria2c"))
        };
        let args = launcher.args();
        assert!(args.contains(&"--max-overall-download-limit=2048K".to_string()));
        assert!(args.contains(&"--max-download-limit=512K".to_string()));
    }

    #[test]
    fn test_args_unlimited_is_zero_k() {
        let args = EngineLauncher::new(PathBuf::from("aria2c")).args();
        assert!(args.contains(&"--max-overall-download-limit=0K".to_string()));
        assert!(args.contains(&"--max-download-limit=0K".to_string()));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_is_spawn_error() {
        let launcher = EngineLauncher::new(PathBuf::from("/nonexistent/engine-binary"));
        let result = launcher.spawn();
        assert!(matches!(result, Err(EngineError::Spawn { .. })));
    }
}
