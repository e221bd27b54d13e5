use std::net::SocketAddr;

use crate::protocol::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total protocol commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "campsite_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "campsite_command_duration_seconds";

// ── Booking engine ──────────────────────────────────────────────

/// Counter: reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "campsite_reservations_created_total";

/// Counter: reservations whose window was moved.
pub const RESERVATIONS_UPDATED_TOTAL: &str = "campsite_reservations_updated_total";

/// Counter: reservations deleted.
pub const RESERVATIONS_DELETED_TOTAL: &str = "campsite_reservations_deleted_total";

/// Counter: create/update attempts refused for unavailable dates. Labels: reason.
pub const BOOKING_CONFLICTS_TOTAL: &str = "campsite_booking_conflicts_total";

/// Histogram: time spent acquiring date locks, in seconds.
pub const LOCK_ACQUIRE_DURATION_SECONDS: &str = "campsite_lock_acquire_duration_seconds";

/// Counter: date lock releases that failed and were skipped.
pub const LOCK_RELEASE_FAILURES_TOTAL: &str = "campsite_lock_release_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "campsite_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "campsite_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "campsite_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "campsite_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "campsite_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Ping => "ping",
        Command::Availability { .. } => "availability",
        Command::List => "list",
        Command::Get { .. } => "get",
        Command::Reserve { .. } => "reserve",
        Command::Update { .. } => "update",
        Command::Cancel { .. } => "cancel",
    }
}
