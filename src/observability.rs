use std::net::SocketAddr;

// ── RED metrics (operation-driven) ──────────────────────────────

/// Counter: engine operations. Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "tutorsched_operations_total";

/// Histogram: operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "tutorsched_operation_duration_seconds";

/// Counter: business-rule rejections. Labels: reason.
pub const CONFLICTS_TOTAL: &str = "tutorsched_conflicts_total";

/// Counter: notifications handed to the hub. Labels: kind.
pub const NOTIFICATIONS_TOTAL: &str = "tutorsched_notifications_total";

// ── USE metrics (storage) ───────────────────────────────────────

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "tutorsched_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (commits per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "tutorsched_journal_flush_batch_size";

/// Counter: journal compactions performed.
pub const JOURNAL_COMPACTIONS_TOTAL: &str = "tutorsched_journal_compactions_total";

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
