//! ws_bridge - named JSON streams over one reconnecting WebSocket
//!
//! A [`Bridge`] owns a single connection and routes every inbound frame to at
//! most one destination: frames tagged `{"stream": name, "payload": ...}` go to
//! the callback registered for `name`, untagged frames go to the default
//! callback, and everything else is dropped. Outbound, a [`Stream`] wraps its
//! payloads in the same envelope while [`Bridge::send`] transmits them bare.
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use ws_bridge::{Bridge, Origin, ReconnectOptions};
//!
//! #[tokio::main]
//! async fn main() -> ws_bridge::Result<()> {
//!     let bridge = Bridge::builder()
//!         .origin(Origin::parse("http://localhost:8000")?)
//!         .build();
//!     bridge.connect(Some("/ws/"), &[], ReconnectOptions::default())?;
//!
//!     bridge.listen(|frame, _| println!("unscoped: {frame}"));
//!     bridge.demultiplex("mystream", |payload, stream| {
//!         println!("{}: {payload}", stream.unwrap_or("-"));
//!     });
//!
//!     bridge.stream("mystream").send(&json!({"prop1": "value1"}))?;
//!     bridge.send(&json!({"prop1": "value1"}))?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use bridge::{Bridge, BridgeBuilder};
pub use connection::{Connection, ListenerId};
pub use endpoint::{Origin, resolve_url};
pub use envelope::Inbound;
pub use error::{BridgeError, Result};
pub use stream::{Callback, Stream};
pub use transport::{
    ConnectRequest, Connector, EventSink, ReconnectOptions, Transport, TransportEvent,
    WebSocketConnector,
};
