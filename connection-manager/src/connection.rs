//! Per-route connection: one owned session plus its message worker.
//!
//! The worker drains the session channel and hands every message to the
//! translator. It reads the sink URL from a `watch` channel on each message
//! so an update published by the manager task is seen without a lock.

use crate::error::Result;
use crate::session::Session;
use brokerchannel::{EventTranslator, InboundMessage, Route, RouteId};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Delivery status for one connection.
#[derive(Clone, Debug, Default)]
pub struct DeliveryStatus {
    /// Last successful delivery timestamp
    pub last_delivery: Option<DateTime<Utc>>,
    /// Last delivery error message (if any)
    pub last_error: Option<String>,
    /// Total number of delivered events
    pub delivered_count: u64,
    /// Total number of undelivered events
    pub undelivered_count: u64,
}

pub type SharedStatus = Arc<Mutex<DeliveryStatus>>;

/// Active connection for one route.
pub struct Connection {
    route: Route,
    session: Box<dyn Session>,
    sink: watch::Sender<String>,
    stop: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    status: SharedStatus,
    dropped: Arc<AtomicU64>,
}

impl Connection {
    /// Binds a subscribed session to `route` and starts the message worker.
    pub fn start(route: Route, mut session: Box<dyn Session>, translator: EventTranslator) -> Self {
        let (sink_tx, sink_rx) = watch::channel(route.sink_url.clone());
        let (stop_tx, stop_rx) = oneshot::channel();
        let status: SharedStatus = Arc::new(Mutex::new(DeliveryStatus::default()));

        let worker = session.take_messages().map(|messages| {
            tokio::spawn(run_worker(
                route.id(),
                messages,
                sink_rx,
                translator,
                Arc::clone(&status),
                stop_rx,
            ))
        });

        if worker.is_none() {
            warn!(route = %route.id(), "Session has no message channel, nothing will be delivered");
        }

        let dropped = session.dropped();

        Self {
            route,
            session,
            sink: sink_tx,
            stop: Some(stop_tx),
            worker,
            status,
            dropped,
        }
    }

    pub fn id(&self) -> RouteId {
        self.route.id()
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }

    /// Sink URL currently used by the worker.
    pub fn sink_url(&self) -> String {
        self.sink.borrow().clone()
    }

    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    /// Publishes dropped by the session because the worker fell behind.
    pub fn dropped(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// False once the underlying session has lost its network connection.
    pub fn is_alive(&self) -> bool {
        self.session.is_alive()
    }

    /// Applies an update for the same broker.
    ///
    /// The new sink is published first; the topic is then re-subscribed. On
    /// a subscribe failure the previous sink is restored and the previous
    /// topic stays in effect, so the connection is left as it was.
    pub async fn update(&mut self, route: Route) -> Result<()> {
        let previous_sink = self.sink.send_replace(route.sink_url.clone());

        if let Err(e) = self.session.subscribe(&route.topic).await {
            self.sink.send_replace(previous_sink);
            return Err(e);
        }

        if route.topic != self.route.topic {
            self.session.unsubscribe(&self.route.topic).await;
        }

        self.route = route;
        Ok(())
    }

    /// Closes the session, stops the worker and waits for it to finish.
    ///
    /// Returns `false` when the worker did not acknowledge within `window`;
    /// it is aborted in that case.
    pub async fn close(mut self, reason: &str, window: Duration) -> bool {
        let id = self.route.id();
        let mut worker = self.worker.take();
        let stop = self.stop.take();
        let session = &mut self.session;

        let acknowledged = timeout(window, async {
            session.close(reason).await;
            if let Some(stop) = stop {
                let _ = stop.send(());
            }
            if let Some(worker) = worker.as_mut() {
                let _ = worker.await;
            }
        })
        .await
        .is_ok();

        if acknowledged {
            info!(route = %id, reason = %reason, "Connection closed");
        } else if let Some(worker) = worker {
            worker.abort();
        }

        acknowledged
    }
}

/// Consumes one session's messages until stopped or the session ends.
///
/// Delivery failures are recorded and logged; they never end the loop.
async fn run_worker(
    id: RouteId,
    mut messages: mpsc::Receiver<InboundMessage>,
    sink: watch::Receiver<String>,
    translator: EventTranslator,
    status: SharedStatus,
    mut stop: oneshot::Receiver<()>,
) {
    debug!(route = %id, "Message worker started");

    loop {
        let message = tokio::select! {
            biased;
            _ = &mut stop => break,
            message = messages.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let sink_url = sink.borrow().clone();

        match translator.translate(&message, &sink_url).await {
            Ok(_) => {
                let mut status = status.lock().await;
                status.last_delivery = Some(Utc::now());
                status.delivered_count += 1;
            }
            Err(e) => {
                warn!(
                    route = %id,
                    topic = %message.topic,
                    sink = %sink_url,
                    error = %e,
                    "Event undelivered"
                );
                let mut status = status.lock().await;
                status.last_error = Some(e.to_string());
                status.undelivered_count += 1;
            }
        }
    }

    debug!(route = %id, "Message worker stopped");
}
