use super::Route;
use reqwest::Url;
use std::fmt;

/// Validation errors for Route
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingNamespace,
    MissingName,
    MissingBrokerAddress,
    InvalidBrokerPort,
    MissingTopic,
    MissingSink,
    InvalidSink(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingNamespace => write!(f, "namespace is required"),
            ValidationError::MissingName => write!(f, "name is required"),
            ValidationError::MissingBrokerAddress => write!(f, "broker_address is required"),
            ValidationError::InvalidBrokerPort => write!(f, "broker_port must be non-zero"),
            ValidationError::MissingTopic => write!(f, "topic is required"),
            ValidationError::MissingSink => write!(f, "sink_url is required"),
            ValidationError::InvalidSink(url) => {
                write!(f, "invalid sink_url '{}': must be an absolute http(s) URL", url)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates a route before any connection attempt.
///
/// Validation rules:
/// - Required fields: namespace, name, broker_address, topic, sink_url
/// - broker_port: non-zero
/// - sink_url: absolute URL with an http or https scheme
pub fn validate(route: &Route) -> Result<(), ValidationError> {
    if route.namespace.trim().is_empty() {
        return Err(ValidationError::MissingNamespace);
    }
    if route.name.trim().is_empty() {
        return Err(ValidationError::MissingName);
    }
    if route.broker_address.trim().is_empty() {
        return Err(ValidationError::MissingBrokerAddress);
    }
    if route.broker_port == 0 {
        return Err(ValidationError::InvalidBrokerPort);
    }
    if route.topic.is_empty() {
        return Err(ValidationError::MissingTopic);
    }
    if route.sink_url.trim().is_empty() {
        return Err(ValidationError::MissingSink);
    }

    if !is_valid_sink(&route.sink_url) {
        return Err(ValidationError::InvalidSink(route.sink_url.clone()));
    }

    Ok(())
}

fn is_valid_sink(sink: &str) -> bool {
    match Url::parse(sink) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    #[test]
    fn test_valid_sinks() {
        assert!(is_valid_sink("http://localhost:8080"));
        assert!(is_valid_sink("https://events.example.com/ingest"));
        assert!(is_valid_sink("http://default-broker.knative-eventing.svc.cluster.local/"));
    }

    #[test]
    fn test_invalid_sinks() {
        assert!(!is_valid_sink(""));
        assert!(!is_valid_sink("localhost:8080"));
        assert!(!is_valid_sink("ftp://example.com"));
        assert!(!is_valid_sink("/relative/path"));
        assert!(!is_valid_sink("http://"));
    }
}
