//! MQTT → CloudEvents bridge - connection manager.
//!
//! Keeps exactly one live MQTT session per active route and forwards every
//! message received on it to the route's sink as a CloudEvent.
//!
//! # Architecture
//!
//! ```text
//!   config [[routes]]      PUT/DELETE /api/routes
//!          ↓                        ↓
//!      ┌────────── RouteHandle (mpsc) ──────────┐
//!                           ↓
//! ┌─────────────────────────────────────────────┐
//! │       ConnectionManager (single task)       │
//! │  - route identity → Connection map          │
//! │  - add / update / delete / shutdown         │
//! └─────────────────────────────────────────────┘
//!          ↓ one per route
//! ┌─────────────────────────────────────────────┐
//! │  Connection                                 │
//! │  - MQTT session (rumqttc)                   │
//! │  - message worker → EventTranslator → sink  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Core Types
//!
//! - [`ConnectionManager`] - applies route-lifecycle events
//! - [`RouteHandle`] - cloneable producer side of the event stream
//! - [`Session`] / [`SessionFactory`] - transport seam, implemented by
//!   [`MqttSessionFactory`]
//! - [`BridgeError`] - failures reported to lifecycle callers

pub mod api;
pub mod connection;
pub mod error;
pub mod manager;
pub mod mqtt;
pub mod session;

pub use connection::{DeliveryStatus, SharedStatus};
pub use error::{BridgeError, Result};
pub use manager::{wait_for_shutdown, ConnectionManager, RouteCommand, RouteHandle, RouteSnapshot};
pub use mqtt::MqttSessionFactory;
pub use session::{Session, SessionFactory};
