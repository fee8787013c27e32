//! The underlying transport the bridge multiplexes over.
//!
//! Submodules:
//! - `websocket`: reconnecting tokio-tungstenite client
//! - `queue`: bounded FIFO for frames sent while disconnected
//!
//! The bridge only sees the [`Connector`] / [`Transport`] capability pair.
//! Reconnection and backoff live entirely behind it.

mod queue;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::Result;

pub use websocket::{ReconnectingWebSocket, WebSocketConnector};

/// Everything a transport reports about itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection (or reconnection) was established.
    Open,
    /// One inbound text frame.
    Message(String),
    /// The connection went away. The transport may reconnect afterwards.
    Close { code: Option<u16>, reason: String },
    /// A connect attempt or an established connection failed.
    Error(String),
}

/// Callback a transport pushes its events into.
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// A live transport instance.
pub trait Transport: Send + Sync {
    /// Hand one text frame to the transport. Fire-and-forget.
    fn send(&self, text: String) -> Result<()>;

    /// Stop the transport. No further events are emitted after the final `Close`.
    fn close(&self);
}

/// What a [`Connector`] needs to open a transport.
#[derive(Clone, Debug)]
pub struct ConnectRequest {
    pub url: Url,
    pub protocols: Vec<String>,
    pub options: ReconnectOptions,
}

/// Factory for transports.
pub trait Connector: Send + Sync {
    fn open(&self, request: ConnectRequest, events: EventSink) -> Result<Box<dyn Transport>>;
}

/// Reconnection tunables, passed through to the transport untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectOptions {
    pub min_reconnection_delay: Duration,
    pub max_reconnection_delay: Duration,
    /// Multiplier applied per consecutive failed attempt. Values below 1.0 are treated as 1.0.
    pub reconnection_delay_grow_factor: f64,
    pub connection_timeout: Duration,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    /// Frames held while disconnected. `None` is unbounded.
    pub max_enqueued_messages: Option<usize>,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            min_reconnection_delay: Duration::from_millis(1000),
            max_reconnection_delay: Duration::from_millis(10_000),
            reconnection_delay_grow_factor: 1.3,
            connection_timeout: Duration::from_millis(4000),
            max_retries: None,
            max_enqueued_messages: None,
        }
    }
}

impl ReconnectOptions {
    /// Delay before retry number `retry` (0-based): `min * grow^retry`, capped at `max`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let grow = self.reconnection_delay_grow_factor.max(1.0);
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let max_secs = self.max_reconnection_delay.as_secs_f64();
        let secs = self.min_reconnection_delay.as_secs_f64() * grow.powi(exponent);

        if secs.is_finite() && secs < max_secs {
            Duration::from_secs_f64(secs)
        } else {
            self.max_reconnection_delay
        }
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn may_retry(&self, failures: u32) -> bool {
        self.max_retries.is_none_or(|max| failures <= max)
    }
}
