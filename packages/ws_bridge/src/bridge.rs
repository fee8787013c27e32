//! The bridge: one connection, a registry of named streams, and a default
//! callback for unscoped traffic.
//!
//! Every inbound frame is decoded once and routed to at most one destination:
//!
//! 1. no `stream` tag → the default callback, as `(frame, None)`
//! 2. `stream` names a registered stream → that stream's callback, as `(payload, Some(name))`
//! 3. anything else → dropped
//!
//! The registry and the default callback belong to the bridge, not to the
//! connection, so they survive both transport-level reconnects and a fresh
//! call to [`Bridge::connect`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionSlot};
use crate::endpoint::{Origin, resolve_url};
use crate::envelope::{self, Inbound};
use crate::error::Result;
use crate::stream::{Callback, Stream};
use crate::transport::{Connector, ReconnectOptions, WebSocketConnector};

/// Multiplexes named streams over one reconnecting connection.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    connector: Arc<dyn Connector>,
    origin: Option<Origin>,
    slot: Arc<ConnectionSlot>,
    streams: RwLock<HashMap<String, Stream>>,
    default_callback: RwLock<Option<Callback>>,
}

/// Builder for a [`Bridge`] with a non-default origin or connector.
#[derive(Default)]
pub struct BridgeBuilder {
    origin: Option<Origin>,
    connector: Option<Arc<dyn Connector>>,
}

impl BridgeBuilder {
    /// Origin that relative (and omitted) URLs resolve against.
    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Transport factory. Defaults to [`WebSocketConnector`].
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> Bridge {
        Bridge {
            inner: Arc::new(BridgeInner {
                connector: self
                    .connector
                    .unwrap_or_else(|| Arc::new(WebSocketConnector)),
                origin: self.origin,
                slot: Arc::new(ConnectionSlot::default()),
                streams: RwLock::new(HashMap::new()),
                default_callback: RwLock::new(None),
            }),
        }
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    /// A bridge with no origin that connects over websockets.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::default()
    }

    /// Open the underlying transport and attach the demultiplexer to it.
    ///
    /// `url` may be absolute (`ws://`, `wss://`), relative to the origin
    /// (leading `/`), or omitted to use the bare origin. Fails immediately on
    /// an unusable URL. Any previous connection is closed; streams and the
    /// default callback are kept.
    pub fn connect(
        &self,
        url: Option<&str>,
        protocols: &[String],
        options: ReconnectOptions,
    ) -> Result<()> {
        let url = resolve_url(url, self.inner.origin.as_ref())?;
        info!(url = %url, "connecting bridge");

        let weak: Weak<BridgeInner> = Arc::downgrade(&self.inner);
        let (connection, _) = Connection::open_with_listener(
            self.inner.connector.as_ref(),
            url,
            protocols.to_vec(),
            options,
            move |text| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(text);
                }
            },
        )?;

        if let Some(previous) = self.inner.slot.replace(connection) {
            debug!(connection_id = %previous.id(), "replacing previous connection");
            previous.close();
        }
        Ok(())
    }

    /// The live connection, for attaching raw listeners or watching transport events.
    pub fn connection(&self) -> Option<Connection> {
        self.inner.slot.current()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.slot.current().is_some()
    }

    /// Close the current transport. Streams and callbacks stay registered.
    pub fn close(&self) {
        if let Some(connection) = self.inner.slot.current() {
            connection.close();
        }
    }

    /// Send `payload` as-is, with no envelope.
    pub fn send<T>(&self, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let text = envelope::encode_unscoped(payload)?;
        self.inner.slot.send(text)
    }

    /// Send a pre-serialized frame untouched.
    pub fn send_raw(&self, text: impl Into<String>) -> Result<()> {
        self.inner.slot.send(text.into())
    }

    /// The stream handle for `name`, created and registered on first use.
    pub fn stream(&self, name: &str) -> Stream {
        if let Some(stream) = self
            .inner
            .streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return stream.clone();
        }

        self.inner
            .streams
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(stream = %name, "registering stream");
                Stream::new(name.to_string(), self.inner.slot.clone())
            })
            .clone()
    }

    /// Route frames tagged `name` to `callback`. Shorthand for
    /// `bridge.stream(name).set_callback(callback)`.
    pub fn demultiplex<F>(&self, name: &str, callback: F)
    where
        F: Fn(Value, Option<&str>) + Send + Sync + 'static,
    {
        self.stream(name).set_callback(callback);
    }

    /// Set the default callback for frames without a stream tag.
    pub fn listen<F>(&self, callback: F)
    where
        F: Fn(Value, Option<&str>) + Send + Sync + 'static,
    {
        *self
            .inner
            .default_callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Remove the default callback. Unscoped frames are dropped afterwards.
    pub fn unlisten(&self) {
        *self
            .inner
            .default_callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Names of every registered stream, sorted.
    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Route one raw inbound frame as if it had arrived on the connection.
    pub fn dispatch(&self, text: &str) {
        self.inner.dispatch(text);
    }
}

impl BridgeInner {
    fn dispatch(&self, text: &str) {
        let inbound = match Inbound::decode(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping malformed frame");
                return;
            }
        };

        // Locks are released before any callback runs so callbacks can call
        // back into the bridge.
        match inbound {
            Inbound::Unscoped(frame) => {
                let callback = self
                    .default_callback
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(callback) = callback {
                    callback(frame, None);
                }
            }
            Inbound::Scoped { stream, payload } => {
                let target = self
                    .streams
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&stream)
                    .cloned();
                if let Some(target) = target {
                    target.deliver(payload);
                }
            }
            Inbound::Unroutable => {}
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("origin", &self.inner.origin)
            .field("connection", &self.inner.slot.current())
            .field("streams", &self.stream_names())
            .finish_non_exhaustive()
    }
}
