//! Connection handle: owns exactly one transport instance.
//!
//! Inbound text frames fan out synchronously to every registered listener,
//! in registration order. Every transport event (including messages) is also
//! broadcast to async subscribers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::broadcast;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::error::{BridgeError, Result};
use crate::transport::{
    ConnectRequest, Connector, EventSink, ReconnectOptions, Transport, TransportEvent,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Raw inbound-frame listener.
pub type Listener = Arc<dyn Fn(&str) + Send + Sync>;

/// Handle for removing a listener registered with [`Connection::on_message`].
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct Hub {
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    events: broadcast::Sender<TransportEvent>,
}

impl Hub {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            events,
        }
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    fn emit(&self, event: TransportEvent) {
        if let TransportEvent::Message(text) = &event {
            // Snapshot so listeners may add or remove listeners while running.
            let listeners: Vec<Listener> = self
                .listeners
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(_, l)| l.clone())
                .collect();
            for listener in listeners {
                listener(text);
            }
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Closes the transport once the last `Connection` clone goes away.
struct TransportGuard(Box<dyn Transport>);

impl Drop for TransportGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// A cheaply cloneable handle to one open transport.
#[derive(Clone)]
pub struct Connection {
    id: Uuid,
    url: Url,
    hub: Arc<Hub>,
    transport: Arc<TransportGuard>,
}

impl Connection {
    /// Open a transport for `url` through `connector`.
    pub fn open(
        connector: &dyn Connector,
        url: Url,
        protocols: Vec<String>,
        options: ReconnectOptions,
    ) -> Result<Self> {
        Self::open_on(connector, url, protocols, options, Arc::new(Hub::new()))
    }

    /// Like [`Connection::open`], with `listener` registered before the
    /// transport starts so it sees the very first frame.
    pub fn open_with_listener<F>(
        connector: &dyn Connector,
        url: Url,
        protocols: Vec<String>,
        options: ReconnectOptions,
        listener: F,
    ) -> Result<(Self, ListenerId)>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let hub = Arc::new(Hub::new());
        let listener_id = hub.add_listener(Arc::new(listener));
        let conn = Self::open_on(connector, url, protocols, options, hub)?;
        Ok((conn, listener_id))
    }

    fn open_on(
        connector: &dyn Connector,
        url: Url,
        protocols: Vec<String>,
        options: ReconnectOptions,
        hub: Arc<Hub>,
    ) -> Result<Self> {
        let id = Uuid::new_v4();

        let weak: Weak<Hub> = Arc::downgrade(&hub);
        let sink: EventSink = Arc::new(move |event: TransportEvent| {
            if let Some(hub) = weak.upgrade() {
                hub.emit(event);
            }
        });

        let transport = connector.open(
            ConnectRequest {
                url: url.clone(),
                protocols,
                options,
            },
            sink,
        )?;
        debug!(connection_id = %id, url = %url, "connection opened");

        Ok(Self {
            id,
            url,
            hub,
            transport: Arc::new(TransportGuard(transport)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Transmit one raw text frame.
    pub fn send(&self, text: String) -> Result<()> {
        self.transport.0.send(text)
    }

    /// Register a listener invoked once per inbound frame with the raw text.
    pub fn on_message<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.hub.add_listener(Arc::new(listener))
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .hub
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.hub
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Subscribe to transport events (open, message, close, error).
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.hub.events.subscribe()
    }

    /// Stop the underlying transport.
    pub fn close(&self) {
        debug!(connection_id = %self.id, "closing connection");
        self.transport.0.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

/// The bridge's current connection, shared with every stream handle so
/// streams always send on whatever connection is live.
#[derive(Default)]
pub(crate) struct ConnectionSlot {
    current: RwLock<Option<Connection>>,
}

impl ConnectionSlot {
    pub(crate) fn current(&self) -> Option<Connection> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install `connection`, returning the one it replaces.
    pub(crate) fn replace(&self, connection: Connection) -> Option<Connection> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(connection)
    }

    pub(crate) fn send(&self, text: String) -> Result<()> {
        self.current()
            .ok_or(BridgeError::NotConnected)?
            .send(text)
    }
}
