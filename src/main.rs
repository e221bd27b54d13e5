use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use campsite::clock::SystemClock;
use campsite::compactor;
use campsite::config::{Config, LockMode};
use campsite::engine::Engine;
use campsite::lock::{
    DateLockCoordinator, FsDateLocks, GlobalCoordinator, InMemoryDateLocks, PerDateCoordinator,
};
use campsite::server;
use campsite::store::WalReservationStore;

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable ({e}), waiting for ctrl-c only");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

fn lock_coordinator(config: &Config) -> std::io::Result<Arc<dyn DateLockCoordinator>> {
    let coordinator: Arc<dyn DateLockCoordinator> = match (config.lock_mode, &config.lock_dir) {
        (LockMode::Global, _) => Arc::new(GlobalCoordinator::new()),
        (LockMode::PerDate, Some(dir)) => Arc::new(PerDateCoordinator::new(FsDateLocks::open(dir)?)),
        (LockMode::PerDate, None) => Arc::new(PerDateCoordinator::new(InMemoryDateLocks::new())),
    };
    Ok(coordinator)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    campsite::observability::init(config.metrics_port);

    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(WalReservationStore::open(&config.wal_path())?);
    let engine = Engine::new(store.clone(), lock_coordinator(&config)?, Arc::new(SystemClock));

    let compactor_store = store.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        compactor::run_compactor(compactor_store, threshold).await;
    });

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("campsite listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  lock_mode: {}", config.lock_mode);
    if let Some(dir) = &config.lock_dir {
        info!("  lock_dir: {}", dir.display());
    }
    info!("  max_connections: {max_connections}");
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(campsite::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(campsite::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(campsite::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = server::process_connection(socket, engine).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(campsite::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("campsite stopped");
    Ok(())
}
