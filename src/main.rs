//! CLI entry point for sharefetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressStyle};
use tracing::{debug, info};

use sharefetch::{
    DownloadQueue, EngineLauncher, ItemStatus, RpcEngineClient, Settings, ShareApiResolver,
    ShareManifest,
};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let manifest_text = tokio::fs::read_to_string(&args.manifest)
        .await
        .with_context(|| format!("failed to read manifest {}", args.manifest.display()))?;
    let manifest: ShareManifest =
        serde_json::from_str(&manifest_text).context("manifest is not valid JSON")?;

    if manifest.files.is_empty() {
        info!("manifest contains no files");
        return Ok(());
    }

    info!(
        share_id = %manifest.share_id,
        files = manifest.files.len(),
        overall_limit = %Settings::format_bandwidth(args.max_overall_limit),
        per_download_limit = %Settings::format_bandwidth(args.max_download_limit),
        "loaded manifest"
    );

    let settings = Settings {
        download_dir: args.dir.clone(),
        concurrency: usize::from(args.concurrency),
        poll_interval_ms: args.poll_interval,
        rpc_url: args.rpc_url.clone(),
        api_base: Some(args.api_base.clone()),
        engine_binary: args.engine.clone(),
        max_overall_download_limit_kb_per_sec: args.max_overall_limit,
        max_download_limit_kb_per_sec: args.max_download_limit,
    };

    let resolver = Arc::new(ShareApiResolver::new(&args.api_base)?);
    let engine = match &settings.engine_binary {
        Some(binary) => {
            let launcher = EngineLauncher {
                max_overall_limit_kb_per_sec: settings.max_overall_download_limit_kb_per_sec,
                max_download_limit_kb_per_sec: settings.max_download_limit_kb_per_sec,
                ..EngineLauncher::new(binary.clone())
            };
            Arc::new(RpcEngineClient::with_launcher(&settings.rpc_url, launcher)?)
        }
        None => Arc::new(RpcEngineClient::new(&settings.rpc_url)?),
    };

    let queue = DownloadQueue::new(resolver, engine.clone(), &settings);
    queue.enqueue(&manifest.files, &manifest.template(), None);
    queue.start();

    let runner = tokio::spawn({
        let queue = queue.clone();
        async move { queue.run().await }
    });

    watch_queue(&queue, args.quiet).await?;

    queue.shutdown();
    runner.await?;

    // Only tear the engine down when we may have started it ourselves.
    if settings.engine_binary.is_some() {
        engine.stop().await;
    }

    let items = queue.items();
    let count = |status: ItemStatus| items.iter().filter(|item| item.status == status).count();
    info!(
        completed = count(ItemStatus::Completed),
        failed = count(ItemStatus::Failed),
        cancelled = count(ItemStatus::Cancelled),
        total = items.len(),
        "downloads finished"
    );

    Ok(())
}

/// Renders per-item progress until every queue item is terminal.
async fn watch_queue(queue: &DownloadQueue, quiet: bool) -> Result<()> {
    let progress = MultiProgress::new();
    let style = ProgressStyle::with_template("{msg:40!} [{bar:30}] {pos:>3}%")
        .context("invalid progress template")?;
    let mut bars: HashMap<String, ProgressBar> = HashMap::new();

    loop {
        let items = queue.items();

        if !quiet {
            for item in &items {
                let bar = bars.entry(item.id.clone()).or_insert_with(|| {
                    let bar = progress.add(ProgressBar::new(100));
                    bar.set_style(style.clone());
                    bar.set_message(item.file.name.clone());
                    bar
                });
                bar.set_position(item.progress_percent.round() as u64);
                match item.status {
                    ItemStatus::Active => {
                        bar.set_message(format!(
                            "{} ({}/s)",
                            item.file.name,
                            HumanBytes(item.speed_bps)
                        ));
                    }
                    ItemStatus::Completed if !bar.is_finished() => {
                        bar.finish_with_message(item.file.name.clone());
                    }
                    ItemStatus::Failed if !bar.is_finished() => {
                        let reason = item.last_error.clone().unwrap_or_default();
                        bar.abandon_with_message(format!("{}: {reason}", item.file.name));
                    }
                    ItemStatus::Cancelled if !bar.is_finished() => {
                        bar.abandon_with_message(format!("{}: cancelled", item.file.name));
                    }
                    _ => {}
                }
            }
        }

        if !items.is_empty() && items.iter().all(|item| item.status.is_terminal()) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
