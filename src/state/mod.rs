/// Name, chat and movement admission rules.
pub mod admission;
/// Bounded chat and system log.
pub mod event_log;
/// Shared map layout.
pub mod map;
/// Joined sessions.
pub mod registry;
/// Tagged role state machine.
pub mod role;
/// Serialized container tying the state components together.
pub mod world;

use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes};
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, watch};

use crate::config::AppConfig;

use self::{registry::SessionId, world::World};

/// Handle shared by every task.
pub type SharedState = Arc<AppState>;

/// Receiving halves handed to a connection's writer task.
pub struct ConnectionOutbox {
    /// Reliable, ordered messages.
    pub messages: mpsc::UnboundedReceiver<Message>,
    /// Latest snapshot slot; a newer snapshot replaces an unsent one.
    pub snapshots: watch::Receiver<Option<Utf8Bytes>>,
}

#[derive(Clone)]
/// Handle used to push messages to a connected client.
pub struct ClientConnection {
    /// Connection identity.
    pub id: SessionId,
    tx: mpsc::UnboundedSender<Message>,
    snapshots: Arc<watch::Sender<Option<Utf8Bytes>>>,
}

impl ClientConnection {
    /// Create the handle for connection `id` together with its writer-side receivers.
    pub fn new(id: SessionId) -> (Self, ConnectionOutbox) {
        let (tx, messages) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshots) = watch::channel(None);
        let connection = Self {
            id,
            tx,
            snapshots: Arc::new(snapshot_tx),
        };
        (connection, ConnectionOutbox { messages, snapshots })
    }

    /// Queue a reliable message. Returns `false` once the writer is gone.
    pub fn send(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Offer the latest snapshot, replacing any snapshot not yet written.
    pub fn offer_snapshot(&self, payload: Utf8Bytes) {
        self.snapshots.send_replace(Some(payload));
    }

    /// Whether the writer task is still draining this connection.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Central application state: the world behind its lock plus the open connections.
pub struct AppState {
    config: Arc<AppConfig>,
    world: RwLock<World>,
    connections: DashMap<SessionId, ClientConnection>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: AppConfig) -> SharedState {
        let world = World::new(&config);
        Arc::new(Self {
            config: Arc::new(config),
            world: RwLock::new(world),
            connections: DashMap::new(),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Registry of open sockets keyed by connection identity.
    pub fn connections(&self) -> &DashMap<SessionId, ClientConnection> {
        &self.connections
    }

    /// Number of open sockets.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run `work` with exclusive access to the world.
    pub async fn with_world_mut<T>(&self, work: impl FnOnce(&mut World) -> T) -> T {
        let mut guard = self.world.write().await;
        work(&mut guard)
    }

    /// Run `work` with shared access to the world.
    pub async fn with_world<T>(&self, work: impl FnOnce(&World) -> T) -> T {
        let guard = self.world.read().await;
        work(&guard)
    }
}
