use std::net::SocketAddr;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: reservation operations. Labels: op, outcome.
pub const OPERATIONS_TOTAL: &str = "banya_operations_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "banya_operation_duration_seconds";

/// Counter: lock waits that ran into the lock timeout.
pub const LOCK_TIMEOUTS_TOTAL: &str = "banya_lock_timeouts_total";

// ── Store metrics ───────────────────────────────────────────────

/// Gauge: reservations currently stored.
pub const RESERVATIONS_LIVE: &str = "banya_reservations_live";

/// Histogram: WAL group-commit sync duration in seconds.
pub const WAL_SYNC_SECONDS: &str = "banya_wal_sync_seconds";

/// Histogram: records per WAL group commit.
pub const WAL_BATCH_SIZE: &str = "banya_wal_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Record the outcome and latency of one service operation.
pub fn record(op: &'static str, outcome: &'static str, started: std::time::Instant) {
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}
