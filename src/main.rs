use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use viewslot::auth::{AuthSource, SharedSecretAuth};
use viewslot::catalog::InMemoryCatalog;
use viewslot::clock::SystemClock;
use viewslot::config::Config;
use viewslot::engine::Engine;
use viewslot::notify::NotifyHub;
use viewslot::seed::Seed;
use viewslot::service::BookingService;
use viewslot::verification::{InMemoryVerificationStore, VerificationGate};
use viewslot::{reaper, wire};

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    viewslot::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let catalog = Arc::new(InMemoryCatalog::new());
    let verifications = Arc::new(InMemoryVerificationStore::new());
    if let Some(path) = &config.seed_file {
        Seed::load(path)?.apply(&catalog, &verifications);
        info!(
            "seeded {} listings from {}",
            catalog.len(),
            path.display()
        );
    }

    let engine = Arc::new(Engine::new(
        config.wal_path(),
        VerificationGate::new(verifications),
        Arc::new(SystemClock),
    )?);
    info!("recovered {} bookings", engine.booking_count());

    let hub = Arc::new(NotifyHub::new());
    let service = BookingService::new(engine.clone(), catalog, hub.clone(), config.default_duration_ms);
    let auth: Arc<dyn AuthSource> = Arc::new(SharedSecretAuth::new(config.password.clone()));

    tokio::spawn(reaper::run_reaper(
        service.clone(),
        Duration::from_secs(config.sweep_interval_secs),
    ));
    tokio::spawn(reaper::run_compactor(engine.clone(), config.compact_threshold));

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("viewslot listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
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
                        metrics::counter!(viewslot::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(viewslot::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(viewslot::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let service = service.clone();
                let hub = hub.clone();
                let auth = auth.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, service, hub, auth).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(viewslot::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::error!("signal handler failed: {e}");
                }
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
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
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("viewslot stopped");
    Ok(())
}
