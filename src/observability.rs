use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "creneau_queries_total";

/// Histogram: command latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "creneau_query_duration_seconds";

/// Counter: bookings rejected with a slot conflict.
pub const BOOKING_CONFLICTS_TOTAL: &str = "creneau_booking_conflicts_total";

/// Counter: availability cache hits.
pub const AVAILABILITY_CACHE_HITS_TOTAL: &str = "creneau_availability_cache_hits_total";

/// Counter: availability cache misses.
pub const AVAILABILITY_CACHE_MISSES_TOTAL: &str = "creneau_availability_cache_misses_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "creneau_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "creneau_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "creneau_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "creneau_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "creneau_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "creneau_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::PublishSchedule { .. } => "publish_schedule",
        Command::InsertBlock { .. } => "insert_block",
        Command::DeleteBlock { .. } => "delete_block",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::Reschedule { .. } => "reschedule",
        Command::Transition { .. } => "transition",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectAvailableDates { .. } => "select_available_dates",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectHistory { .. } => "select_history",
        Command::Listen { .. } => "listen",
    }
}
