use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total console queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "innkeeper_queries_total";

/// Histogram: console query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "innkeeper_query_duration_seconds";

/// Counter: HTTP requests answered. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "innkeeper_http_requests_total";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: bookings accepted.
pub const BOOKINGS_CREATED_TOTAL: &str = "innkeeper_bookings_created_total";

/// Counter: booking attempts refused because the room was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "innkeeper_booking_conflicts_total";

/// Counter: booking status transitions. Labels: status.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "innkeeper_booking_transitions_total";

/// Counter: stays completed by the checkout sweep.
pub const AUTO_CHECKOUTS_TOTAL: &str = "innkeeper_auto_checkouts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active console connections.
pub const CONNECTIONS_ACTIVE: &str = "innkeeper_connections_active";

/// Counter: total console connections accepted.
pub const CONNECTIONS_TOTAL: &str = "innkeeper_connections_total";

/// Counter: console connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "innkeeper_connections_rejected_total";

/// Gauge: rooms with at least one live event stream.
pub const ROOMS_WATCHED: &str = "innkeeper_rooms_watched";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeeper_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeeper_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::InsertUser { .. } => "insert_user",
        Command::InsertBooking { .. } => "insert_booking",
        Command::InsertPayment { .. } => "insert_payment",
        Command::InsertRefund { .. } => "insert_refund",
        Command::InsertReview { .. } => "insert_review",
        Command::UpdateRoom { .. } => "update_room",
        Command::SetRoomStatus { .. } => "set_room_status",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::SetPaymentStatus { .. } => "set_payment_status",
        Command::SetRefundStatus { .. } => "set_refund_status",
        Command::DeleteRoom { .. } => "delete_room",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectRooms(_) => "select_rooms",
        Command::SelectBookings(_) => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectFreeWindows { .. } => "select_free_windows",
    }
}
