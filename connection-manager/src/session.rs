//! Transport session interface.
//!
//! A [`Session`] is one live broker connection plus its subscription state.
//! Inbound publications are pushed into a per-session channel that the
//! owning connection drains on its own task.

use crate::error::Result;
use async_trait::async_trait;
use brokerchannel::InboundMessage;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

#[cfg(test)]
pub(crate) mod fake;

/// One network connection to a broker.
///
/// Exclusively owned by a single connection; nothing else may read from or
/// close it.
#[async_trait]
pub trait Session: Send {
    /// Unique id of this session, stable for its lifetime.
    fn id(&self) -> Uuid;

    /// Registers interest in `topic` at QoS 0.
    ///
    /// May be called repeatedly on the same session; re-subscribing to the
    /// same filter is idempotent at the broker.
    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Drops interest in `topic`. Best-effort.
    async fn unsubscribe(&mut self, topic: &str);

    /// Hands out the inbound message channel.
    ///
    /// Only one consumer may exist per session: the first call returns the
    /// receiver, later calls return `None`.
    fn take_messages(&mut self) -> Option<mpsc::Receiver<InboundMessage>>;

    /// Counter of publishes discarded because the consumer fell behind.
    fn dropped(&self) -> Arc<AtomicU64>;

    /// False once the network connection has ended, whether closed locally
    /// or lost. A dead session never recovers.
    fn is_alive(&self) -> bool;

    /// Sends a clean disconnect and releases the network connection.
    ///
    /// Idempotent. No messages are delivered after this returns.
    async fn close(&mut self, reason: &str);
}

/// Opens sessions to brokers.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Dials `address:port` and completes the broker handshake.
    async fn open(&self, address: &str, port: u16) -> Result<Box<dyn Session>>;
}
