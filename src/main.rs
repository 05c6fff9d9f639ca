use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use folderbound::config;
use folderbound::state::Services;
use folderbound::types::EngineEvent;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging (stdout + daily rotated file under ./logs)
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let file_appender = tracing_appender::rolling::daily("logs", "folderbound.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // keep the guards so the non-blocking writers flush on exit
    let _log_guards = (stdout_guard, file_guard);

    // Load configuration (embedded defaults -> folderbound.toml -> env/.env)
    let app_cfg = config::load()?;
    info!("Companies folder: {}", app_cfg.companies_folder().display());
    info!("Projects folder: {}", app_cfg.projects_folder().display());

    // First passes scan the disk; keep them off the async workers
    let services = tokio::task::spawn_blocking(move || Services::open(app_cfg)).await??;

    for mut rx in services.subscribe() {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Event log lagged, {} events skipped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    let handles = services.start_watching()?;
    info!("folderbound running; press Ctrl-C to stop");

    shutdown_signal().await;

    for handle in handles {
        handle.shutdown().await;
    }
    let drain = services.clone();
    let drained = tokio::task::spawn_blocking(move || drain.wait_idle(DRAIN_TIMEOUT)).await?;
    if !drained {
        tracing::warn!("Sidecar writes still pending after {:?}", DRAIN_TIMEOUT);
    }

    let snapshot = services.metrics.get_snapshot();
    info!("Metrics: {}", serde_json::to_string(&snapshot)?);
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::Changed { kind, path, op } => {
            tracing::debug!("{} change {:?} at {}", kind, op, path.display());
        }
        EngineEvent::Reconciled { kind, generation, entities, skipped } => {
            info!("{} index generation {}: {} entities, {} skipped", kind, generation, entities, skipped);
        }
        EngineEvent::Upserted { kind, previous_id, id } => {
            info!("{} {} updated as {}", kind, previous_id, id);
        }
        EngineEvent::SidecarSaveFailed { kind, path, message } => {
            tracing::warn!("{} sidecar {} not saved: {}", kind, path.display(), message);
        }
        EngineEvent::WatchError { kind, message } => {
            tracing::warn!("{} watcher error: {}", kind, message);
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping watchers...");
}
