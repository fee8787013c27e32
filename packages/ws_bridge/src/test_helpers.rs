use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use url::Url;

use crate::error::{BridgeError, Result};
use crate::transport::{
    ConnectRequest, Connector, EventSink, ReconnectOptions, Transport, TransportEvent,
};

/// In-memory transport: records sent frames and lets tests inject inbound ones.
pub struct MockTransport {
    pub url: Url,
    pub protocols: Vec<String>,
    pub options: ReconnectOptions,
    sent: Mutex<Vec<String>>,
    sink: EventSink,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Deliver one inbound text frame.
    pub fn inject(&self, text: &str) {
        self.emit(TransportEvent::Message(text.to_string()));
    }

    pub fn emit(&self, event: TransportEvent) {
        (self.sink)(event);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockHandle(Arc<MockTransport>);

impl Transport for MockHandle {
    fn send(&self, text: String) -> Result<()> {
        if self.0.is_closed() {
            return Err(BridgeError::Closed);
        }
        self.0.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out [`MockTransport`]s; keeps every one it opened.
#[derive(Default)]
pub struct MockConnector {
    opened: Mutex<Vec<Arc<MockTransport>>>,
    greeting: Mutex<Option<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Have the next opened transport emit `text` before `open` returns.
    pub fn greet_with(&self, text: &str) {
        *self.greeting.lock().unwrap() = Some(text.to_string());
    }

    pub fn opened(&self) -> Vec<Arc<MockTransport>> {
        self.opened.lock().unwrap().clone()
    }

    /// The most recently opened transport. Panics if none was opened.
    pub fn last(&self) -> Arc<MockTransport> {
        self.opened
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport opened")
    }
}

impl Connector for MockConnector {
    fn open(&self, request: ConnectRequest, events: EventSink) -> Result<Box<dyn Transport>> {
        let transport = Arc::new(MockTransport {
            url: request.url,
            protocols: request.protocols,
            options: request.options,
            sent: Mutex::new(Vec::new()),
            sink: events,
            closed: AtomicBool::new(false),
        });
        self.opened.lock().unwrap().push(transport.clone());
        if let Some(text) = self.greeting.lock().unwrap().take() {
            transport.inject(&text);
        }
        Ok(Box::new(MockHandle(transport)))
    }
}
