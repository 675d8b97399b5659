use std::net::SocketAddr;

use crate::protocol::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: command, status.
pub const REQUESTS_TOTAL: &str = "hallbook_requests_total";

/// Histogram: request latency in seconds. Labels: command.
pub const REQUEST_DURATION_SECONDS: &str = "hallbook_request_duration_seconds";

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: state transitions applied. Labels: transition.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "hallbook_booking_transitions_total";

/// Counter: final approvals that lost their slot to a concurrent confirmation.
pub const CONFIRMATION_CONFLICTS_TOTAL: &str = "hallbook_confirmation_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "hallbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "hallbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "hallbook_connections_rejected_total";

/// Gauge: number of loaded organizations.
pub const TENANTS_ACTIVE: &str = "hallbook_tenants_active";

/// Counter: hello frames refused.
pub const AUTH_FAILURES_TOTAL: &str = "hallbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "hallbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "hallbook_wal_flush_batch_size";

/// Counter: WAL compactions run by the background compactor.
pub const WAL_COMPACTIONS_TOTAL: &str = "hallbook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a request to a short label for metrics.
pub fn command_label(req: &Request) -> &'static str {
    match req {
        Request::Hello { .. } => "hello",
        Request::RegisterHall { .. } => "register_hall",
        Request::ListHalls => "list_halls",
        Request::Submit { .. } => "submit",
        Request::Amend { .. } => "amend",
        Request::Approve { .. } => "approve",
        Request::Reject { .. } => "reject",
        Request::Get { .. } => "get",
        Request::List => "list",
        Request::Queue => "queue",
        Request::History => "history",
        Request::Schedule { .. } => "schedule",
        Request::Watch { .. } => "watch",
        Request::Unwatch { .. } => "unwatch",
    }
}
