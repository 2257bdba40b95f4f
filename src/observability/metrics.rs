//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sockd_connections_total` (counter): connections accepted
//! - `sockd_open_connections` (gauge): connections currently open
//! - `sockd_connection_states_total` (counter): state transitions by state
//! - `sockd_connection_errors_total` (counter): reported errors by kind
//! - `sockd_server_events_total` (counter): lifecycle messages

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::net::state::ConnState;
use crate::server::ServerError;

/// Start the Prometheus exporter on `addr`. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_metrics();
            tracing::info!(address = %addr, "Metrics endpoint listening");
        }
        Err(error) => {
            tracing::error!(address = %addr, error = %error, "Failed to start metrics exporter");
        }
    }
}

fn describe_metrics() {
    describe_counter!("sockd_connections_total", "Connections accepted");
    describe_gauge!("sockd_open_connections", "Connections currently open");
    describe_counter!("sockd_connection_states_total", "Connection state transitions");
    describe_counter!("sockd_connection_errors_total", "Errors reported by the server");
    describe_counter!("sockd_server_events_total", "Server lifecycle events");
}

pub fn record_connection_state(state: ConnState) {
    counter!("sockd_connection_states_total", "state" => state.code()).increment(1);
    match state {
        ConnState::New => {
            counter!("sockd_connections_total").increment(1);
            gauge!("sockd_open_connections").increment(1.0);
        }
        ConnState::Close => gauge!("sockd_open_connections").decrement(1.0),
        _ => {}
    }
}

pub fn record_error(error: &ServerError) {
    counter!("sockd_connection_errors_total", "kind" => error.kind()).increment(1);
}

pub fn record_server_event() {
    counter!("sockd_server_events_total").increment(1);
}
