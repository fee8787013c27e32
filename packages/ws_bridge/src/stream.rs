use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;

use crate::connection::ConnectionSlot;
use crate::envelope;
use crate::error::Result;

/// Inbound handler: `(payload, stream)`. `stream` is `None` for unscoped frames.
pub type Callback = Arc<dyn Fn(Value, Option<&str>) + Send + Sync>;

/// A named logical channel on a bridge.
///
/// Handles are cheap clones of one shared entry in the bridge's registry, so a
/// callback set through any handle is visible through all of them. A stream
/// has no connection of its own: it sends on whatever connection the bridge
/// currently holds.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    name: String,
    slot: Arc<ConnectionSlot>,
    callback: RwLock<Option<Callback>>,
}

impl Stream {
    pub(crate) fn new(name: String, slot: Arc<ConnectionSlot>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                name,
                slot,
                callback: RwLock::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Send `action` as `{"stream": <name>, "payload": <action>}`.
    pub fn send<T>(&self, action: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let text = envelope::encode_scoped(&self.inner.name, action)?;
        self.inner.slot.send(text)
    }

    /// Set the callback for frames tagged with this stream. Last writer wins.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(Value, Option<&str>) + Send + Sync + 'static,
    {
        self.replace_callback(Some(Arc::new(callback)));
    }

    /// Stop routing to this stream. Frames tagged with it are dropped afterwards.
    pub fn clear_callback(&self) {
        self.replace_callback(None);
    }

    pub fn has_callback(&self) -> bool {
        self.inner
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// True if both handles refer to the same registry entry.
    pub fn ptr_eq(&self, other: &Stream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn replace_callback(&self, callback: Option<Callback>) {
        *self
            .inner
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }

    /// Hand a payload to the callback, if one is set.
    pub(crate) fn deliver(&self, payload: Value) {
        let callback = self
            .inner
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(payload, Some(&self.inner.name));
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("name", &self.inner.name)
            .field("has_callback", &self.has_callback())
            .finish()
    }
}
