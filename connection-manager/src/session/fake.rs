//! In-memory session factory for tests.

use super::{Session, SessionFactory};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use brokerchannel::InboundMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Shared record of everything the fake sessions did.
#[derive(Default)]
pub(crate) struct FakeBroker {
    pub opened: AtomicUsize,
    pub closed: Mutex<Vec<Uuid>>,
    pub subscriptions: Mutex<Vec<(Uuid, String)>>,
    pub unsubscriptions: Mutex<Vec<(Uuid, String)>>,
    pub endpoints: Mutex<Vec<String>>,
    /// Sessions whose network connection went away without a close
    pub lost: Mutex<Vec<Uuid>>,
    pub fail_connect: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub hang_on_close: AtomicBool,
    publishers: Mutex<HashMap<Uuid, mpsc::Sender<InboundMessage>>>,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn closed_count(&self) -> usize {
        self.closed.lock().unwrap().len()
    }

    pub fn was_closed(&self, session_id: Uuid) -> bool {
        self.closed.lock().unwrap().contains(&session_id)
    }

    pub fn subscriptions_for(&self, session_id: Uuid) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == session_id)
            .map(|(_, topic)| topic.clone())
            .collect()
    }

    /// Simulates the broker dropping the connection under `session_id`.
    pub fn lose_connection(&self, session_id: Uuid) {
        self.lost.lock().unwrap().push(session_id);
        self.publishers.lock().unwrap().remove(&session_id);
    }

    /// Pushes a publish into the session's channel.
    pub async fn publish(&self, session_id: Uuid, message: InboundMessage) {
        let tx = self
            .publishers
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .expect("unknown session");
        tx.send(message).await.expect("session channel closed");
    }
}

pub(crate) struct FakeFactory {
    broker: Arc<FakeBroker>,
}

impl FakeFactory {
    pub fn new(broker: Arc<FakeBroker>) -> Arc<Self> {
        Arc::new(Self { broker })
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self, address: &str, port: u16) -> Result<Box<dyn Session>> {
        let endpoint = format!("{}:{}", address, port);
        if self.broker.fail_connect.load(Ordering::SeqCst) {
            return Err(BridgeError::Connect {
                endpoint,
                reason: "connection refused".to_string(),
            });
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(16);
        self.broker.publishers.lock().unwrap().insert(id, tx);
        self.broker.endpoints.lock().unwrap().push(endpoint);
        self.broker.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeSession {
            id,
            broker: Arc::clone(&self.broker),
            messages: Some(rx),
            dropped: Arc::default(),
            closed: false,
        }))
    }
}

struct FakeSession {
    id: Uuid,
    broker: Arc<FakeBroker>,
    messages: Option<mpsc::Receiver<InboundMessage>>,
    dropped: Arc<AtomicU64>,
    closed: bool,
}

#[async_trait]
impl Session for FakeSession {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        if !self.is_alive() {
            return Err(BridgeError::Subscribe {
                topic: topic.to_string(),
                reason: "connection lost".to_string(),
            });
        }
        if self.broker.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BridgeError::Subscribe {
                topic: topic.to_string(),
                reason: "not authorized".to_string(),
            });
        }
        self.broker
            .subscriptions
            .lock()
            .unwrap()
            .push((self.id, topic.to_string()));
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) {
        self.broker
            .unsubscriptions
            .lock()
            .unwrap()
            .push((self.id, topic.to_string()));
    }

    fn take_messages(&mut self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.messages.take()
    }

    fn dropped(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    fn is_alive(&self) -> bool {
        !self.closed && !self.broker.lost.lock().unwrap().contains(&self.id)
    }

    async fn close(&mut self, _reason: &str) {
        if self.closed {
            return;
        }
        if self.broker.hang_on_close.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.closed = true;
        self.broker.publishers.lock().unwrap().remove(&self.id);
        self.broker.closed.lock().unwrap().push(self.id);
    }
}
