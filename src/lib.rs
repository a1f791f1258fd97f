// Route model, defaulting and validation
pub mod route;

// Broker message to CloudEvent translation and HTTP delivery
pub mod translator;

// TOML configuration
pub mod config;

pub use route::{Route, RouteEvent, RouteId};
pub use translator::{DeliveryResult, EventTranslator, InboundMessage, TranslatedEvent, UndeliveredEvent};
