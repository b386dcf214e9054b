use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "varaus_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "varaus_command_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "varaus_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "varaus_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "varaus_connections_rejected_total";

/// Counter: rejected hello frames.
pub const AUTH_FAILURES_TOTAL: &str = "varaus_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "varaus_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "varaus_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Request variant to a short label for metrics.
pub fn command_label(req: &Request) -> &'static str {
    match req {
        Request::CreateSlot { .. } => "create_slot",
        Request::UpdateSlot { .. } => "update_slot",
        Request::SetSlotActive { .. } => "set_slot_active",
        Request::ListSlots { .. } => "list_slots",
        Request::Book { .. } => "book",
        Request::Check { .. } => "check",
        Request::NextAvailable { .. } => "next_available",
        Request::Appointments { .. } => "appointments",
        Request::UserAppointments { .. } => "user_appointments",
        Request::SetStatus { .. } => "set_status",
        Request::Cancel { .. } => "cancel",
    }
}
