//! Connection manager - keeps live broker connections in line with routes.
//!
//! One task owns the identity → connection map and applies route-lifecycle
//! events to it one at a time. Message delivery runs on per-connection
//! workers and never blocks this task.

use crate::connection::{Connection, SharedStatus};
use crate::error::{BridgeError, Result};
use crate::session::SessionFactory;
use brokerchannel::{EventTranslator, Route, RouteEvent, RouteId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;


/// Point-in-time view of one active route, published after every change.
#[derive(Clone, Debug)]
pub struct RouteSnapshot {
    pub route: Route,
    pub session_id: Uuid,
    pub status: SharedStatus,
    pub dropped: Arc<AtomicU64>,
}

/// One lifecycle event plus an optional reply slot for its outcome.
pub struct RouteCommand {
    pub event: RouteEvent,
    pub respond_to: Option<oneshot::Sender<Result<()>>>,
}

/// Cloneable sender side of the manager's event stream.
#[derive(Clone)]
pub struct RouteHandle {
    commands: mpsc::Sender<RouteCommand>,
}

impl RouteHandle {
    pub fn new(commands: mpsc::Sender<RouteCommand>) -> Self {
        Self { commands }
    }

    /// Queues `event` and waits until the manager has applied it.
    pub async fn submit(&self, event: RouteEvent) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(RouteCommand {
                event,
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| BridgeError::ManagerStopped)?;
        rx.await.map_err(|_| BridgeError::ManagerStopped)?
    }

    /// Queues `event` without waiting; failures are only logged.
    pub async fn notify(&self, event: RouteEvent) -> Result<()> {
        self.commands
            .send(RouteCommand {
                event,
                respond_to: None,
            })
            .await
            .map_err(|_| BridgeError::ManagerStopped)
    }
}

/// Resolves once `true` has been broadcast on the shutdown channel, or the
/// sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Connection manager - owns every live broker connection.
///
/// # Responsibilities
/// - Open and subscribe a session for each added route
/// - Swap sink URL and resubscribe on update, without reconnecting
/// - Close the session explicitly on delete
/// - Close everything on shutdown and wait for every acknowledgement
pub struct ConnectionManager {
    factory: Arc<dyn SessionFactory>,
    translator: EventTranslator,
    /// Per-connection close acknowledgement window
    shutdown_window: Duration,
    connections: HashMap<RouteId, Connection>,
    snapshots: watch::Sender<Vec<RouteSnapshot>>,
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        translator: EventTranslator,
        shutdown_window: Duration,
    ) -> Self {
        let (snapshots, _) = watch::channel(Vec::new());
        Self {
            factory,
            translator,
            shutdown_window,
            connections: HashMap::new(),
            snapshots,
        }
    }

    /// Receiver for the active-route view, updated after every change.
    pub fn snapshots(&self) -> watch::Receiver<Vec<RouteSnapshot>> {
        self.snapshots.subscribe()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, id: &RouteId) -> bool {
        self.connections.contains_key(id)
    }

    /// Id of the session currently serving `id`.
    pub fn session_id(&self, id: &RouteId) -> Option<Uuid> {
        self.connections.get(id).map(Connection::session_id)
    }

    pub fn sink_url(&self, id: &RouteId) -> Option<String> {
        self.connections.get(id).map(Connection::sink_url)
    }

    pub fn status(&self, id: &RouteId) -> Option<SharedStatus> {
        self.connections.get(id).map(Connection::status)
    }

    /// Applies one lifecycle event.
    ///
    /// Errors are scoped to the event's route; the manager and every other
    /// connection are unaffected.
    pub async fn apply(&mut self, event: RouteEvent) -> Result<()> {
        let result = match event {
            RouteEvent::Added(route) => self.add(route).await,
            RouteEvent::Updated(route) => self.update(route).await,
            RouteEvent::Deleted(id) => self.delete(&id).await,
        };
        self.publish_snapshot();
        result
    }

    async fn add(&mut self, mut route: Route) -> Result<()> {
        prepare(&mut route)?;
        self.evict_dead(&route.id()).await;

        if self.connections.contains_key(&route.id()) {
            info!(route = %route.id(), "Route already active, applying as update");
            return self.update(route).await;
        }
        self.connect(route).await
    }

    async fn update(&mut self, mut route: Route) -> Result<()> {
        prepare(&mut route)?;
        let id = route.id();
        self.evict_dead(&id).await;

        let same_broker = match self.connections.get(&id) {
            Some(connection) => connection.route().same_broker(&route),
            None => return self.connect(route).await,
        };

        if !same_broker {
            info!(
                route = %id,
                endpoint = %route.broker_endpoint(),
                "Broker changed, reconnecting"
            );
            // Reconnect even when the old close is not acknowledged
            let closed = self.delete(&id).await;
            self.connect(route).await?;
            return closed;
        }

        self.reconfigure(route).await
    }

    /// Removes the entry for `id` if its session has lost the broker, so the
    /// next transition treats the identity as absent.
    async fn evict_dead(&mut self, id: &RouteId) {
        let dead = matches!(self.connections.get(id), Some(connection) if !connection.is_alive());
        if !dead {
            return;
        }
        let Some(connection) = self.connections.remove(id) else {
            return;
        };

        warn!(route = %id, session_id = %connection.session_id(), "Session lost, reconnecting");
        if !connection.close("session lost", self.shutdown_window).await {
            warn!(route = %id, "Lost session did not acknowledge close");
        }
    }

    /// Opens and subscribes a new session for an absent identity.
    async fn connect(&mut self, route: Route) -> Result<()> {
        let id = route.id();

        let mut session = self
            .factory
            .open(&route.broker_address, route.broker_port)
            .await?;

        if let Err(e) = session.subscribe(&route.topic).await {
            session.close("subscribe failed").await;
            return Err(e);
        }

        let connection = Connection::start(route, session, self.translator.clone());
        info!(
            route = %id,
            session_id = %connection.session_id(),
            sink = %connection.sink_url(),
            "Route active"
        );
        self.connections.insert(id, connection);
        Ok(())
    }

    /// Updates sink and topic of a present identity on its existing session.
    async fn reconfigure(&mut self, route: Route) -> Result<()> {
        let id = route.id();
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.update(route).await?;
            info!(route = %id, sink = %connection.sink_url(), "Route updated");
        }
        Ok(())
    }

    async fn delete(&mut self, id: &RouteId) -> Result<()> {
        let Some(connection) = self.connections.remove(id) else {
            return Ok(());
        };

        if connection.close("route deleted", self.shutdown_window).await {
            info!(route = %id, "Route removed");
            Ok(())
        } else {
            Err(BridgeError::ShutdownIncomplete {
                routes: vec![id.clone()],
            })
        }
    }

    /// Closes every connection and waits for all acknowledgements.
    ///
    /// Connections are closed concurrently. Every entry is removed even when
    /// its close is not acknowledged; those identities are reported in
    /// [`BridgeError::ShutdownIncomplete`].
    pub async fn shutdown(&mut self) -> Result<()> {
        let count = self.connections.len();
        info!(connection_count = count, "Shutting down connection manager");

        let window = self.shutdown_window;
        let mut pending: HashSet<RouteId> = self.connections.keys().cloned().collect();
        let mut closing = JoinSet::new();
        for (id, connection) in self.connections.drain() {
            closing.spawn(async move { (id, connection.close("shutdown", window).await) });
        }

        while let Some(joined) = closing.join_next().await {
            match joined {
                Ok((id, true)) => {
                    pending.remove(&id);
                }
                Ok((_, false)) => {}
                Err(e) => error!(error = %e, "Close task failed"),
            }
        }
        self.publish_snapshot();

        if !pending.is_empty() {
            let mut routes: Vec<RouteId> = pending.into_iter().collect();
            routes.sort();
            error!(
                unacknowledged = routes.len(),
                "Connections did not acknowledge close"
            );
            return Err(BridgeError::ShutdownIncomplete { routes });
        }

        info!(connection_count = count, "All connections closed");
        Ok(())
    }

    /// Consumes lifecycle events until the shutdown signal, then shuts down.
    ///
    /// If the event source ends first, existing connections keep running
    /// until the signal arrives.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<RouteCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("Connection manager started");

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                command = commands.recv() => match command {
                    Some(RouteCommand { event, respond_to }) => {
                        let id = event.id();
                        let kind = event.kind();
                        let result = self.apply(event).await;
                        if let Err(e) = &result {
                            warn!(route = %id, event = kind, error = %e, "Route event failed");
                        }
                        if let Some(tx) = respond_to {
                            let _ = tx.send(result);
                        }
                    }
                    None => {
                        info!("Route event source closed, waiting for shutdown signal");
                        wait_for_shutdown(&mut shutdown).await;
                        break;
                    }
                },
            }
        }

        self.shutdown().await
    }

    fn publish_snapshot(&self) {
        let mut snapshot: Vec<RouteSnapshot> = self
            .connections
            .values()
            .map(|connection| RouteSnapshot {
                route: connection.route().clone(),
                session_id: connection.session_id(),
                status: connection.status(),
                dropped: connection.dropped(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.route.id().cmp(&b.route.id()));
        self.snapshots.send_replace(snapshot);
    }
}

fn prepare(route: &mut Route) -> Result<()> {
    route.prepare().map_err(|source| BridgeError::InvalidRoute {
        route: route.id(),
        source,
    })
}
