//! winnyd — the operational entry point around the `winny-net` servent.
//!
//! This binary is the external collaborator the core specification
//! deliberately leaves unspecified beyond its interfaces: it owns the
//! node-reference file on disk, wires the servent's public API to it,
//! and otherwise gets out of the way. The core never touches the
//! filesystem itself.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use winny_core::config::Config;
use winny_net::Servent;

const NODE_FILE_REWRITE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let node_file = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("nodes.txt"));

    let cfg = Config::load(config_path.as_deref())?;
    info!(port = cfg.servent.port, speed = cfg.servent.speed, "winnyd starting");

    let servent = Servent::bind(cfg).await?;

    load_node_file(&servent, &node_file).await;

    let rewrite_servent = servent.clone();
    let rewrite_path = node_file.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(NODE_FILE_REWRITE_INTERVAL);
        loop {
            tick.tick().await;
            rewrite_node_file(&rewrite_servent, &rewrite_path).await;
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    rewrite_node_file(&servent, &node_file).await;
    Ok(())
}

/// Reads one `@hex` token per line from `path` and enqueues each with the
/// servent. Missing file is not an error — a fresh node with no peers
/// yet is a normal first run.
async fn load_node_file(servent: &Servent, path: &PathBuf) {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no existing node file, starting empty");
            return;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read node file");
            return;
        }
    };

    let mut count = 0;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        servent.add_node(line.to_string()).await;
        count += 1;
    }
    info!(path = %path.display(), count, "loaded node file");
}

/// Snapshots the known-peer set and rewrites `path`, one `@hex` token per
/// line. Best-effort: a write failure is logged and the next tick tries
/// again.
async fn rewrite_node_file(servent: &Servent, path: &PathBuf) {
    let tokens = servent.node_list().await;
    let mut contents = String::with_capacity(tokens.len() * 32);
    for token in &tokens {
        contents.push_str(token);
        contents.push('\n');
    }

    match tokio::fs::File::create(path).await {
        Ok(mut file) => {
            if let Err(e) = file.write_all(contents.as_bytes()).await {
                warn!(path = %path.display(), error = %e, "failed to write node file");
            } else {
                info!(path = %path.display(), count = tokens.len(), "rewrote node file");
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to create node file");
        }
    }
}
