use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking operations executed. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "viewslot_requests_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "viewslot_request_duration_seconds";

/// Counter: reservation attempts rejected because the slot was taken.
pub const SLOT_CONFLICTS_TOTAL: &str = "viewslot_slot_conflicts_total";

/// Counter: pending bookings auto-cancelled by the past-due sweep.
pub const EXPIRED_TOTAL: &str = "viewslot_expired_total";

/// Counter: notifications nobody was listening for.
pub const NOTIFICATIONS_DROPPED_TOTAL: &str = "viewslot_notifications_dropped_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: bookings currently holding a slot.
pub const BOOKINGS_ACTIVE: &str = "viewslot_bookings_active";

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "viewslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "viewslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "viewslot_connections_rejected_total";

/// Counter: handshake failures.
pub const AUTH_FAILURES_TOTAL: &str = "viewslot_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "viewslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "viewslot_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Label for the outcome of an operation.
pub fn status_label<T>(result: &Result<T, crate::engine::EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    }
}
