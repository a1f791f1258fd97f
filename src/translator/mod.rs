//! Broker message → CloudEvent translation.
//!
//! A [`TranslatedEvent`] is built from the routing hints carried in the MQTT
//! user properties of one publish and delivered by [`EventTranslator`] in
//! CloudEvents HTTP binary content mode.

use std::collections::HashMap;

mod client;

pub use client::{Delivered, DeliveryResult, EventTranslator, UndeliveredEvent};

/// Content type stamped on every translated event. Payload bytes are
/// forwarded unchanged.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// CloudEvents specification version emitted in `ce-specversion`.
pub const SPEC_VERSION: &str = "1.0";

/// One publication received from the broker.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// User-defined key/value properties (routing hints)
    pub properties: HashMap<String, String>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    fn hint(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Structured event produced for one inbound message. Never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct TranslatedEvent {
    pub source: String,
    pub event_type: String,
    pub id: String,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl TranslatedEvent {
    /// Maps routing hints to CloudEvent attributes.
    ///
    /// Missing hints become empty strings. `ID` is accepted when `id` is
    /// absent, for producers written against the older key.
    pub fn from_message(message: &InboundMessage) -> Self {
        let id = message
            .hint("id")
            .or_else(|| message.hint("ID"))
            .unwrap_or_default();

        Self {
            source: message.hint("source").unwrap_or_default().to_string(),
            event_type: message.hint("type").unwrap_or_default().to_string(),
            id: id.to_string(),
            content_type: JSON_CONTENT_TYPE,
            body: message.payload.clone(),
        }
    }
}
