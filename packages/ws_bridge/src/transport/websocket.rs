use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    self, Message,
    client::IntoClientRequest,
    handshake::client::Request,
    http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::queue::OutboundQueue;
use super::{ConnectRequest, Connector, EventSink, Transport, TransportEvent};
use crate::error::{BridgeError, Result};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens [`ReconnectingWebSocket`]s on the current tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn open(&self, request: ConnectRequest, events: EventSink) -> Result<Box<dyn Transport>> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BridgeError::NoRuntime)?;
        // Reject a bad URL or protocol list now rather than on every retry.
        build_request(&request.url, &request.protocols)?;
        Ok(Box::new(ReconnectingWebSocket::spawn(
            &runtime, request, events,
        )))
    }
}

/// A websocket client that reconnects with backoff until closed.
///
/// Frames sent while disconnected are queued (see `ReconnectOptions::max_enqueued_messages`)
/// and flushed in order once the next connection opens. Frames in flight when
/// a connection drops are lost.
pub struct ReconnectingWebSocket {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl ReconnectingWebSocket {
    pub fn spawn(
        runtime: &tokio::runtime::Handle,
        request: ConnectRequest,
        events: EventSink,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        runtime.spawn(run(request, events, outbound_rx, cancel.clone()));
        Self { outbound, cancel }
    }
}

impl Transport for ReconnectingWebSocket {
    fn send(&self, text: String) -> Result<()> {
        self.outbound.send(text).map_err(|_| BridgeError::Closed)
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ReconnectingWebSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build the client handshake request, carrying `protocols` in `Sec-WebSocket-Protocol`.
pub fn build_request(url: &Url, protocols: &[String]) -> Result<Request> {
    let mut request = url.as_str().into_client_request()?;

    if !protocols.is_empty() {
        let joined = protocols.join(", ");
        let malformed = protocols
            .iter()
            .any(|p| p.is_empty() || p.contains(|c: char| c == ',' || c.is_whitespace()));
        if malformed {
            return Err(BridgeError::InvalidProtocol(joined));
        }
        let value =
            HeaderValue::from_str(&joined).map_err(|_| BridgeError::InvalidProtocol(joined))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    Ok(request)
}

/// True when the peer simply isn't there (refused, reset or aborted).
pub fn is_unavailable(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::Io(io_err) => matches!(
            io_err.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
        ),
        _ => false,
    }
}

enum SessionEnd {
    /// The socket dropped; reconnect.
    Disconnected,
    /// Closed locally; stop for good.
    Stopped,
}

async fn run(
    request: ConnectRequest,
    events: EventSink,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    let ConnectRequest {
        url,
        protocols,
        options,
    } = request;
    let mut queue = OutboundQueue::new(options.max_enqueued_messages);
    let mut failures = 0u32;

    'run: loop {
        if failures > 0 {
            if !options.may_retry(failures) {
                warn!(url = %url, failures, "giving up on reconnecting");
                break;
            }
            let delay = options.delay_for(failures - 1);
            debug!(
                url = %url,
                attempt = failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "waiting before reconnect"
            );
            if !wait(delay, &mut outbound, &mut queue, &cancel).await {
                closed_by_client(&events);
                break;
            }
        }

        let client_request = match build_request(&url, &protocols) {
            Ok(r) => r,
            Err(e) => {
                events(TransportEvent::Error(e.to_string()));
                break;
            }
        };

        let connect = tokio::time::timeout(
            options.connection_timeout,
            tokio_tungstenite::connect_async(client_request),
        );
        tokio::pin!(connect);

        // Frames sent mid-attempt go through the bounded queue too.
        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    closed_by_client(&events);
                    break 'run;
                }
                result = &mut connect => break result,
                frame = outbound.recv() => match frame {
                    Some(text) => {
                        queue.push(text);
                    }
                    None => {
                        closed_by_client(&events);
                        break 'run;
                    }
                },
            }
        };

        match result {
            Ok(Ok((ws, _response))) => {
                info!(url = %url, "websocket open");
                while let Ok(text) = outbound.try_recv() {
                    queue.push(text);
                }
                failures = 0;
                events(TransportEvent::Open);
                match session(ws, &events, &mut outbound, &mut queue, &cancel).await {
                    SessionEnd::Stopped => break,
                    SessionEnd::Disconnected => {}
                }
            }
            Ok(Err(e)) => {
                if is_unavailable(&e) {
                    debug!(url = %url, error = %e, "websocket server unavailable");
                } else {
                    warn!(url = %url, error = %e, "websocket connect failed");
                }
                events(TransportEvent::Error(e.to_string()));
            }
            Err(_) => {
                warn!(
                    url = %url,
                    timeout_ms = u64::try_from(options.connection_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                    "websocket connect timed out"
                );
                events(TransportEvent::Error("connection timed out".to_string()));
            }
        }

        failures = failures.saturating_add(1);
    }

    debug!(url = %url, "websocket transport stopped");
}

fn closed_by_client(events: &EventSink) {
    events(TransportEvent::Close {
        code: Some(1000),
        reason: "closed by client".to_string(),
    });
}

/// Sleep out a backoff delay while still accepting outbound frames.
/// Returns false if the transport was closed meanwhile.
async fn wait(
    delay: std::time::Duration,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    queue: &mut OutboundQueue,
    cancel: &CancellationToken,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            () = &mut sleep => return true,
            frame = outbound.recv() => match frame {
                Some(text) => {
                    queue.push(text);
                }
                None => return false,
            },
        }
    }
}

async fn session(
    ws: WsStream,
    events: &EventSink,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    queue: &mut OutboundQueue,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut write, mut read) = ws.split();

    if !queue.is_empty() {
        debug!(queued = queue.len(), "flushing queued frames");
    }
    for text in queue.drain() {
        if let Err(e) = write.send(Message::Text(text.into())).await {
            warn!(error = %e, "failed to flush queued frame");
            events(TransportEvent::Error(e.to_string()));
            events(TransportEvent::Close {
                code: None,
                reason: String::new(),
            });
            return SessionEnd::Disconnected;
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                closed_by_client(events);
                return SessionEnd::Stopped;
            }

            frame = outbound.recv() => {
                let Some(text) = frame else {
                    let _ = write.send(Message::Close(None)).await;
                    closed_by_client(events);
                    return SessionEnd::Stopped;
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    warn!(error = %e, "websocket send failed");
                    events(TransportEvent::Error(e.to_string()));
                    events(TransportEvent::Close {
                        code: None,
                        reason: String::new(),
                    });
                    return SessionEnd::Disconnected;
                }
            }

            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    events(TransportEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => events(TransportEvent::Message(text.to_owned())),
                    Err(_) => warn!(len = bytes.len(), "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.as_str().to_owned()))
                        .unwrap_or((None, String::new()));
                    info!(code = ?code, reason = %reason, "websocket closed by server");
                    events(TransportEvent::Close { code, reason });
                    return SessionEnd::Disconnected;
                }
                // Ping/pong are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "websocket read failed");
                    events(TransportEvent::Error(e.to_string()));
                    events(TransportEvent::Close {
                        code: None,
                        reason: String::new(),
                    });
                    return SessionEnd::Disconnected;
                }
                None => {
                    events(TransportEvent::Close {
                        code: None,
                        reason: String::new(),
                    });
                    return SessionEnd::Disconnected;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReconnectOptions;
    use std::sync::Arc;
    use std::time::Duration;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    // ── build_request ───────────────────────────────────────────────────

    #[test]
    fn request_without_protocols_has_no_header() {
        let request = build_request(&url("ws://localhost:9000/ws"), &[]).unwrap();
        assert!(request.headers().get(SEC_WEBSOCKET_PROTOCOL).is_none());
        assert_eq!(request.uri().to_string(), "ws://localhost:9000/ws");
    }

    #[test]
    fn request_carries_protocols() {
        let protocols = vec!["chat".to_string(), "superchat".to_string()];
        let request = build_request(&url("ws://localhost/"), &protocols).unwrap();
        assert_eq!(
            request.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
            "chat, superchat"
        );
    }

    #[test]
    fn malformed_protocol_is_rejected() {
        for bad in ["", "two words", "a,b"] {
            let err = build_request(&url("ws://localhost/"), &[bad.to_string()]).unwrap_err();
            assert!(matches!(err, BridgeError::InvalidProtocol(_)), "{bad:?}");
        }
    }

    // ── is_unavailable ──────────────────────────────────────────────────

    #[test]
    fn refused_reset_aborted_are_unavailable() {
        for kind in [
            std::io::ErrorKind::ConnectionRefused,
            std::io::ErrorKind::ConnectionReset,
            std::io::ErrorKind::ConnectionAborted,
        ] {
            let err = tungstenite::Error::Io(std::io::Error::new(kind, "gone"));
            assert!(is_unavailable(&err), "{kind:?}");
        }
    }

    #[test]
    fn other_errors_are_not_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(!is_unavailable(&tungstenite::Error::Io(io)));
        assert!(!is_unavailable(&tungstenite::Error::ConnectionClosed));
    }

    // ── connector ───────────────────────────────────────────────────────

    fn request(target: &str, options: ReconnectOptions) -> ConnectRequest {
        ConnectRequest {
            url: url(target),
            protocols: Vec::new(),
            options,
        }
    }

    #[test]
    fn open_outside_runtime_fails() {
        let sink: EventSink = Arc::new(|_: TransportEvent| {});
        let result = WebSocketConnector.open(
            request("ws://127.0.0.1:1/", ReconnectOptions::default()),
            sink,
        );
        assert!(matches!(result, Err(BridgeError::NoRuntime)));
    }

    #[tokio::test]
    async fn close_during_backoff_reports_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: EventSink = Arc::new(move |event: TransportEvent| {
            let _ = tx.send(event);
        });
        let options = ReconnectOptions {
            min_reconnection_delay: Duration::from_secs(30),
            max_reconnection_delay: Duration::from_secs(30),
            ..Default::default()
        };

        let transport = WebSocketConnector
            .open(request("ws://127.0.0.1:1/", options), sink)
            .unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(first, TransportEvent::Error(_)), "{first:?}");

        // Now sleeping out a 30s backoff.
        transport.close();
        let last = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            last,
            TransportEvent::Close {
                code: Some(1000),
                reason: "closed by client".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn close_during_connect_reports_close() {
        // Accepts TCP but never answers the handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: EventSink = Arc::new(move |event: TransportEvent| {
            let _ = tx.send(event);
        });
        let transport = WebSocketConnector
            .open(
                request(&format!("ws://127.0.0.1:{port}/"), ReconnectOptions::default()),
                sink,
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        transport.close();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            TransportEvent::Close {
                code: Some(1000),
                reason: "closed by client".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: EventSink = Arc::new(move |event: TransportEvent| {
            let _ = tx.send(event);
        });
        let options = ReconnectOptions {
            min_reconnection_delay: Duration::from_millis(10),
            max_reconnection_delay: Duration::from_millis(10),
            max_retries: Some(1),
            ..Default::default()
        };

        // Port 1 is reserved and nothing listens on it.
        let transport = WebSocketConnector
            .open(request("ws://127.0.0.1:1/", options), sink)
            .unwrap();

        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(event, TransportEvent::Error(_)), "{event:?}");
        }

        // Once the task has given up, sends are refused.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if matches!(transport.send("x".into()), Err(BridgeError::Closed)) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "transport never stopped");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
