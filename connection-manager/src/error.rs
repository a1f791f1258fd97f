use brokerchannel::route::{RouteId, ValidationError};
use thiserror::Error;

/// Errors surfaced by the connection manager to route-lifecycle callers.
///
/// Per-message delivery failures are not part of this taxonomy; they are
/// reported as [`brokerchannel::UndeliveredEvent`] on the connection status.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Route rejected before any connection attempt
    #[error("invalid route {route}: {source}")]
    InvalidRoute {
        route: RouteId,
        #[source]
        source: ValidationError,
    },

    /// Dial, handshake or CONNACK failure
    #[error("failed to connect to broker {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// SUBSCRIBE could not be sent or the broker rejected it
    #[error("failed to subscribe to topic '{topic}': {reason}")]
    Subscribe { topic: String, reason: String },

    /// One or more connections did not acknowledge close in time
    #[error(
        "shutdown incomplete: {} connection(s) did not acknowledge close: {}",
        .routes.len(),
        join_ids(.routes)
    )]
    ShutdownIncomplete { routes: Vec<RouteId> },

    /// The manager task has exited and accepts no more lifecycle events
    #[error("connection manager has stopped")]
    ManagerStopped,
}

fn join_ids(routes: &[RouteId]) -> String {
    routes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for connection manager operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_incomplete_lists_routes() {
        let err = BridgeError::ShutdownIncomplete {
            routes: vec![RouteId::new("a", "one"), RouteId::new("b", "two")],
        };
        assert_eq!(
            err.to_string(),
            "shutdown incomplete: 2 connection(s) did not acknowledge close: a/one, b/two"
        );
    }

    #[test]
    fn test_connect_error_message() {
        let err = BridgeError::Connect {
            endpoint: "mqtt.local:1883".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to broker mqtt.local:1883: connection refused"
        );
    }
}
