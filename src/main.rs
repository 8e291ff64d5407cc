//! Presence client - Entry Point
//!
//! Signs in, keeps the presence connection alive and logs status changes
//! until interrupted.

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use presence::auth::{self, Credentials, IdentityProvider};
use presence::config::{AuthMode, LogConfig};
use presence::{Config, ConnectOutcome, ConnectionManager, PresenceMonitor, PresenceMonitorHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    init_tracing(&config.log);
    info!("Starting presence client");

    // Sign in with the identity provider
    let identity = auth::create_provider(&config.auth);
    if config.auth.mode == AuthMode::Local {
        let user = identity
            .sign_in(Credentials {
                username: config.auth.username.clone(),
                password: config.auth.password.clone(),
            })
            .await?;
        info!("Signed in as {}", user.username);
    }

    let manager = ConnectionManager::with_websocket(config.connection.clone(), identity.clone());

    // Start presence monitor
    let monitor = PresenceMonitor::new(manager.clone(), config.presence.clone());
    let mut snapshots = monitor.subscribe();
    let (monitor_handle, monitor_shutdown) = PresenceMonitorHandle::new();
    let monitor_task = tokio::spawn(async move {
        monitor.run(monitor_shutdown).await;
    });

    // Initial connection
    match manager.connect().await {
        ConnectOutcome::Opened(handle) => info!(socket_id = %handle.id(), "Presence connected"),
        ConnectOutcome::Failed(e) if e.is_credential_error() => {
            warn!("Presence connection not started: {}", e)
        }
        ConnectOutcome::Failed(e) => warn!("Presence connection failed, will retry: {}", e),
        ConnectOutcome::AlreadyOpen(_) | ConnectOutcome::InFlight | ConnectOutcome::Superseded => {}
    }

    let status_task = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = *snapshots.borrow_and_update();
            info!(
                connected = snapshot.connected,
                online_count = snapshot.online_count,
                "{}",
                snapshot
            );
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    // Clean close: no automatic retry
    manager.disconnect().await;
    monitor_handle.shutdown();
    if let Err(e) = monitor_task.await {
        error!("Presence monitor task failed: {}", e);
    }
    status_task.abort();

    if let Err(e) = identity.sign_out().await {
        warn!("Sign-out failed: {}", e);
    }

    info!("Presence client stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("presence={}", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
