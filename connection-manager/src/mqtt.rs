//! MQTT v5 transport session backed by rumqttc.
//!
//! `open` drives the event loop until CONNACK, then hands the loop to a pump
//! task that forwards publishes to the session channel and SUBACKs to the
//! pending `subscribe` call.

use crate::error::{BridgeError, Result};
use crate::session::{Session, SessionFactory};
use async_trait::async_trait;
use brokerchannel::config::MqttConfig;
use brokerchannel::InboundMessage;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, Publish, SubscribeReasonCode};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions};
use rumqttc::Outgoing;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the rumqttc request queue (client → event loop).
const REQUEST_CAPACITY: usize = 16;

/// How long `close` waits for the DISCONNECT to be flushed.
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// Opens MQTT v5 sessions with clean start and a fixed keep-alive.
pub struct MqttSessionFactory {
    config: MqttConfig,
}

impl MqttSessionFactory {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for MqttSessionFactory {
    async fn open(&self, address: &str, port: u16) -> Result<Box<dyn Session>> {
        let session = MqttSession::open(address, port, &self.config).await?;
        Ok(Box::new(session))
    }
}

/// One MQTT v5 connection and its network pump.
pub struct MqttSession {
    id: Uuid,
    endpoint: String,
    client: AsyncClient,
    subscribe_timeout: Duration,
    messages: Option<mpsc::Receiver<InboundMessage>>,
    dropped: Arc<AtomicU64>,
    subacks: mpsc::UnboundedReceiver<Vec<SubscribeReasonCode>>,
    closing: watch::Sender<bool>,
    pump: Option<JoinHandle<()>>,
}

impl MqttSession {
    /// Dials the broker and waits for a successful CONNACK.
    pub async fn open(address: &str, port: u16, config: &MqttConfig) -> Result<Self> {
        let endpoint = format!("{}:{}", address, port);
        let id = Uuid::new_v4();
        let client_id = format!("{}-{}", config.client_id_prefix, id);

        info!(endpoint = %endpoint, client_id = %client_id, "Creating broker connection");

        let mut options = MqttOptions::new(client_id, address, port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_start(true);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        match timeout(config.connect_timeout(), wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                return Err(BridgeError::Connect { endpoint, reason });
            }
            Err(_) => {
                return Err(BridgeError::Connect {
                    endpoint,
                    reason: format!(
                        "no CONNACK within {}s",
                        config.connect_timeout().as_secs()
                    ),
                });
            }
        }

        let (messages_tx, messages_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (subacks_tx, subacks_rx) = mpsc::unbounded_channel();
        let (closing_tx, closing_rx) = watch::channel(false);
        let dropped = Arc::new(AtomicU64::new(0));

        let pump = tokio::spawn(run_pump(
            eventloop,
            endpoint.clone(),
            messages_tx,
            Arc::clone(&dropped),
            subacks_tx,
            closing_rx,
        ));

        info!(endpoint = %endpoint, session_id = %id, "Broker connection established");

        Ok(Self {
            id,
            endpoint,
            client,
            subscribe_timeout: config.subscribe_timeout(),
            messages: Some(messages_rx),
            dropped,
            subacks: subacks_rx,
            closing: closing_tx,
            pump: Some(pump),
        })
    }

    fn is_closed(&self) -> bool {
        *self.closing.borrow()
    }
}

#[async_trait]
impl Session for MqttSession {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        let subscribe_error = |reason: String| BridgeError::Subscribe {
            topic: topic.to_string(),
            reason,
        };

        if !self.is_alive() {
            return Err(subscribe_error("session is not connected".to_string()));
        }

        // Acks left over from an earlier timed-out request
        while self.subacks.try_recv().is_ok() {}

        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| subscribe_error(e.to_string()))?;

        let codes = timeout(self.subscribe_timeout, self.subacks.recv())
            .await
            .map_err(|_| {
                subscribe_error(format!(
                    "no SUBACK within {}s",
                    self.subscribe_timeout.as_secs()
                ))
            })?
            .ok_or_else(|| subscribe_error("connection lost before SUBACK".to_string()))?;

        if let Some(code) = codes
            .iter()
            .find(|code| !matches!(code, SubscribeReasonCode::Success(_)))
        {
            return Err(subscribe_error(format!("broker returned {:?}", code)));
        }

        info!(endpoint = %self.endpoint, topic = %topic, "Subscribed to topic");
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.client.unsubscribe(topic).await {
            warn!(endpoint = %self.endpoint, topic = %topic, error = %e, "Failed to unsubscribe");
        }
    }

    fn take_messages(&mut self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.messages.take()
    }

    fn dropped(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    fn is_alive(&self) -> bool {
        self.pump.as_ref().is_some_and(|pump| !pump.is_finished())
    }

    async fn close(&mut self, reason: &str) {
        let Some(mut pump) = self.pump.take() else {
            return;
        };

        // Stop forwarding before the DISCONNECT goes out
        self.closing.send_replace(true);

        if let Err(e) = self.client.disconnect().await {
            debug!(endpoint = %self.endpoint, error = %e, "Disconnect request not queued");
        }

        if timeout(DISCONNECT_GRACE, &mut pump).await.is_err() {
            warn!(endpoint = %self.endpoint, "Network pump did not stop in time, aborting");
            pump.abort();
        }

        info!(endpoint = %self.endpoint, session_id = %self.id, reason = %reason, "Disconnected");
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Polls until the handshake completes. Errors carry the reason for
/// diagnostics.
async fn wait_for_connack(eventloop: &mut EventLoop) -> std::result::Result<(), String> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    let reason = ack
                        .properties
                        .and_then(|p| p.reason_string)
                        .unwrap_or_default();
                    return Err(format!("CONNACK {:?} {}", ack.code, reason).trim().to_string());
                }
                return Ok(());
            }
            Ok(_) => continue,
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(format!("connection refused by broker: {:?}", code));
            }
            Err(e) => return Err(e.to_string()),
        }
    }
}

/// Drives the event loop for one session.
///
/// Never waits on the message consumer: when the channel is full the publish
/// is dropped and counted, so SUBACKs and keep-alives keep flowing.
///
/// Exits after the outgoing DISCONNECT is flushed, or on the first
/// connection error. Does not reconnect: clean-start sessions would come
/// back without their subscriptions.
async fn run_pump(
    mut eventloop: EventLoop,
    endpoint: String,
    messages: mpsc::Sender<InboundMessage>,
    dropped: Arc<AtomicU64>,
    subacks: mpsc::UnboundedSender<Vec<SubscribeReasonCode>>,
    closing: watch::Receiver<bool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if *closing.borrow() {
                    continue;
                }
                match messages.try_send(to_inbound(publish)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(message)) => {
                        let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        // First drop and every hundredth after it
                        if total % 100 == 1 {
                            warn!(
                                endpoint = %endpoint,
                                topic = %message.topic,
                                dropped = total,
                                "Message consumer behind, dropping publish"
                            );
                        }
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(endpoint = %endpoint, "Message consumer gone, dropping publish");
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let _ = subacks.send(ack.return_codes);
            }
            Ok(Event::Incoming(Packet::Disconnect(disconnect))) => {
                warn!(
                    endpoint = %endpoint,
                    reason = ?disconnect.reason_code,
                    "Broker closed the session"
                );
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                if !*closing.borrow() {
                    warn!(endpoint = %endpoint, error = %e, "Broker connection lost");
                }
                break;
            }
        }
    }
    debug!(endpoint = %endpoint, "Network pump stopped");
}

fn to_inbound(publish: Publish) -> InboundMessage {
    let properties = publish
        .properties
        .map(|p| p.user_properties.into_iter().collect())
        .unwrap_or_default();

    InboundMessage {
        topic: String::from_utf8_lossy(&publish.topic).into_owned(),
        payload: publish.payload.to_vec(),
        properties,
    }
}
