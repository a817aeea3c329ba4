use std::sync::Arc;
use std::time::Duration;

use bokmerke::config::{Cli, Config, default_config_dir, default_config_path};
use bokmerke::db::Database;
use bokmerke::feed::ChangeFeed;
use bokmerke::handler::{AppState, router};
use bokmerke::session::{SessionEvent, SessionHub};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio::{signal, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Cli::parse();

    // Determine config path and data directory
    // If --config is provided, use its parent directory for data (database, etc.)
    // Otherwise use ~/.bokmerke/ for both
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => {
            let dir = default_config_dir();
            (default_config_path(), dir)
        }
    };

    // Ensure data directory exists
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt().json().init();
    tracing::info!("bokmerke.svc starting");

    let cfg = Config::new(config_path.to_str().unwrap()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let db = Arc::new(Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    }));
    let sessions = Arc::new(SessionHub::new(cfg.auth.allowed_providers.clone()));
    let feed = Arc::new(ChangeFeed::new(cfg.auth.feed_buffer));

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let cancellation_token = CancellationToken::new();
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

    // Session lifecycle log, fed from the hub's change broadcast
    let mut session_changes = sessions.subscribe();
    let log_token = cancellation_token.clone();
    let log_done = shutdown_complete_tx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = log_token.cancelled() => break,
                change = session_changes.recv() => match change {
                    Ok(SessionEvent::SignedIn { user_id }) => {
                        tracing::info!(user = %user_id, "session opened");
                    }
                    Ok(SessionEvent::SignedOut { user_id }) => {
                        tracing::info!(user = %user_id, "session closed");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "session log fell behind");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        drop(log_done);
    });

    // Background task to expire stale sessions every 5 minutes
    let sweep_sessions = sessions.clone();
    let sweep_token = cancellation_token.clone();
    let sweep_done = shutdown_complete_tx.clone();
    let session_ttl = Duration::from_secs(cfg.auth.session_ttl_seconds);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let expired = sweep_sessions.sweep_expired(session_ttl).await;
                    if expired > 0 {
                        tracing::info!(expired, "expired stale sessions");
                    }
                }
                _ = sweep_token.cancelled() => {
                    tracing::info!("session sweeper shutting down");
                    break;
                }
            }
        }
        drop(sweep_done);
    });

    let app = router(AppState {
        db: db.clone(),
        sessions,
        feed,
    });

    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("bokmerke.svc running on {}", &address);
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "server exited with error");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
            cancellation_token.cancel();
        }
    }

    // Flush the synced replica, if any, before going down
    if let Err(e) = db.sync().await {
        tracing::warn!(error = %e, "final database sync failed");
    }

    drop(shutdown_complete_tx);
    shutdown_complete_rx.recv().await;
    tracing::info!("bokmerke.svc going off, graceful shutdown complete");
}
