use serde::{Deserialize, Serialize};
use std::fmt;

mod validation;

pub use validation::{validate, ValidationError};

/// Default MQTT port used when a route omits `broker_port`.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Namespace applied to routes declared without one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Stable identity of a route (namespace + name).
///
/// Used as the key of the connection map; at most one connection exists
/// per identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteId {
    pub namespace: String,
    pub name: String,
}

impl RouteId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Route maps one broker subscription to one CloudEvents sink.
///
/// `sink_url` may change across updates without a new broker connection;
/// a change of `broker_address` or `broker_port` requires one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub name: String,

    /// Broker host name or IP address
    pub broker_address: String,

    #[serde(default = "default_broker_port")]
    pub broker_port: u16,

    /// Subscription filter (MQTT topic filter, wildcards allowed)
    pub topic: String,

    /// Destination for translated events
    pub sink_url: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_broker_port() -> u16 {
    DEFAULT_BROKER_PORT
}

impl Route {
    pub fn id(&self) -> RouteId {
        RouteId::new(self.namespace.clone(), self.name.clone())
    }

    /// `host:port` of the broker this route subscribes to.
    pub fn broker_endpoint(&self) -> String {
        format!("{}:{}", self.broker_address, self.broker_port)
    }

    /// True when `other` points at the same broker, so an existing session
    /// can keep serving it.
    pub fn same_broker(&self, other: &Route) -> bool {
        self.broker_address == other.broker_address && self.broker_port == other.broker_port
    }

    /// Fills defaults left blank by the producer, then validates.
    pub fn prepare(&mut self) -> Result<(), ValidationError> {
        if self.namespace.is_empty() {
            self.namespace = default_namespace();
        }
        if self.broker_port == 0 {
            self.broker_port = DEFAULT_BROKER_PORT;
        }
        validation::validate(self)
    }
}

/// Route-lifecycle notification consumed by the connection manager.
#[derive(Clone, Debug, PartialEq)]
pub enum RouteEvent {
    Added(Route),
    Updated(Route),
    Deleted(RouteId),
}

impl RouteEvent {
    pub fn id(&self) -> RouteId {
        match self {
            RouteEvent::Added(route) | RouteEvent::Updated(route) => route.id(),
            RouteEvent::Deleted(id) => id.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RouteEvent::Added(_) => "added",
            RouteEvent::Updated(_) => "updated",
            RouteEvent::Deleted(_) => "deleted",
        }
    }
}
