//! Default callback wiring for the daemon.

use crate::observability::metrics;
use crate::server::Server;

/// Route the server's callbacks into tracing and, if enabled, metrics.
pub fn install_hooks(server: &Server, with_metrics: bool) {
    server.register_error(move |error| {
        if error.is_connection_level() {
            tracing::warn!(kind = error.kind(), error = %error, "Connection error");
        } else {
            tracing::error!(kind = error.kind(), error = %error, "Server error");
        }
        if with_metrics {
            metrics::record_error(error);
        }
    });

    server.register_info(move |local, remote, state| {
        tracing::trace!(local = %local, remote = %remote, state = %state, "Connection state changed");
        if with_metrics {
            metrics::record_connection_state(state);
        }
    });

    server.register_server_info(move |message| {
        tracing::info!(message, "Server event");
        if with_metrics {
            metrics::record_server_event();
        }
    });
}
