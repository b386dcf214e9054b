use std::path::PathBuf;
use std::sync::Arc;

use chrono_tz::Tz;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use varaus::compactor;
use varaus::ledger::{BookingConfig, Ledger};
use varaus::limits::MAX_HORIZON_STEPS;
use varaus::wire;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = env_parse("VARAUS_METRICS_PORT");
    varaus::observability::init(metrics_port);

    let port = std::env::var("VARAUS_PORT").unwrap_or_else(|_| "5888".into());
    let bind = std::env::var("VARAUS_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("VARAUS_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let password = std::env::var("VARAUS_PASSWORD").unwrap_or_else(|_| "varaus".into());
    let max_connections: usize = env_parse("VARAUS_MAX_CONNECTIONS").unwrap_or(256);
    let compact_threshold: u64 = env_parse("VARAUS_COMPACT_THRESHOLD").unwrap_or(1000);

    let timezone: Tz = std::env::var("VARAUS_TIMEZONE")
        .unwrap_or_else(|_| "Europe/Helsinki".into())
        .parse()
        .map_err(|e| format!("invalid VARAUS_TIMEZONE: {e}"))?;
    let horizon_steps: u32 = env_parse::<u32>("VARAUS_HORIZON_STEPS")
        .unwrap_or(96)
        .min(MAX_HORIZON_STEPS);
    let step_minutes: u32 = env_parse::<u32>("VARAUS_STEP_MINUTES").unwrap_or(15).max(1);
    let config = BookingConfig { timezone, horizon_steps, step_minutes };

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("appointments.wal");
    let ledger = Arc::new(Ledger::open(wal_path, config)?);
    tokio::spawn(compactor::run_compactor(ledger.clone(), compact_threshold));

    let semaphore = Arc::new(Semaphore::new(max_connections));
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("varaus listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  timezone: {timezone}, horizon: {horizon_steps} x {step_minutes}min");
    info!("  max_connections: {max_connections}");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
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
                        metrics::counter!(varaus::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(varaus::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(varaus::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let ledger = ledger.clone();
                let pw = password.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, ledger, pw).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(varaus::observability::CONNECTIONS_ACTIVE).decrement(1.0);
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

    info!("varaus stopped");
    Ok(())
}
