//! Wires the library crates into the `serve` and `upload` commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chunkdrop_client::{UploadEvent, UploadOptions, UploadSession, WsClient};
use chunkdrop_server::{ServerConfig, StoreHandler, UploadServer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Runs the upload server until Ctrl-C.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let server_config = ServerConfig {
        bind_addr: config.bind_addr()?,
    };
    let store_config = config.store_config();
    std::fs::create_dir_all(&store_config.root).with_context(|| {
        format!("creating storage root {}", store_config.root.display())
    })?;
    tracing::info!(root = %store_config.root.display(), "storage ready");

    let server = UploadServer::new(server_config, StoreHandler::new(&store_config));
    let listener = server.bind().await?;

    let server_run = Arc::clone(&server);
    let mut serve_task = tokio::spawn(async move { server_run.serve(listener).await });

    tokio::select! {
        result = &mut serve_task => {
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
    }

    server.shutdown();
    serve_task.await??;
    Ok(())
}

/// Uploads `files` one after another over a single connection.
pub async fn upload(url: &str, files: &[PathBuf], options: UploadOptions) -> anyhow::Result<()> {
    let client = WsClient::connect(url)
        .await
        .with_context(|| format!("connecting to {url}"))?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("SIGINT received, cancelling upload");
                cancel.cancel();
            }
        });
    }

    let session = UploadSession::new(&client, options, cancel);
    let result = upload_all(&session, files).await;
    client.close().await;
    result
}

async fn upload_all(session: &UploadSession<'_>, files: &[PathBuf]) -> anyhow::Result<()> {
    for file in files {
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let name = file.display().to_string();
        let reporter = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                log_event(&name, &event);
            }
        });

        let result = session.upload(file, &events_tx).await;
        drop(events_tx);
        let _ = reporter.await;

        match result {
            Ok(outcome) => {
                tracing::info!(
                    file = %file.display(),
                    fingerprint = %outcome.fingerprint,
                    path = %outcome.path,
                    chunks_sent = outcome.chunks_sent,
                    instant = outcome.instant,
                    "uploaded"
                );
            }
            Err(e) => {
                tracing::error!(file = %file.display(), phase = %e.phase(), "upload failed: {e}");
                if e.is_retryable() {
                    tracing::info!("re-run the upload to resume from the chunks already stored");
                }
                return Err(e).with_context(|| format!("uploading {}", file.display()));
            }
        }
    }
    Ok(())
}

fn log_event(file: &str, event: &UploadEvent) {
    match event {
        UploadEvent::Hashing {
            bytes_hashed,
            total_bytes,
        } => {
            tracing::trace!(file, bytes_hashed, total_bytes, "hashing");
        }
        UploadEvent::Hashed { fingerprint } => {
            tracing::debug!(file, fingerprint = %fingerprint, "fingerprint computed");
        }
        UploadEvent::Planned {
            total_chunks,
            to_send,
            skip,
        } => {
            tracing::info!(file, total_chunks, to_send, skip, "upload planned");
        }
        UploadEvent::ChunkSent {
            index,
            bytes_done,
            total_bytes,
            bytes_per_second,
            eta,
        } => {
            tracing::info!(
                file,
                index,
                progress = %format_progress(*bytes_done, *total_bytes),
                rate = %format_rate(*bytes_per_second),
                eta_secs = eta.map(|d| d.as_secs()),
                "chunk sent"
            );
        }
        UploadEvent::Merging => tracing::info!(file, "merging"),
        UploadEvent::Completed { path, instant } => {
            tracing::debug!(file, path = %path, instant, "completed");
        }
    }
}

fn format_progress(done: u64, total: u64) -> String {
    if total == 0 {
        return "100.0%".into();
    }
    format!("{:.1}%", done as f64 * 100.0 / total as f64)
}

fn format_rate(bytes_per_second: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_second;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
