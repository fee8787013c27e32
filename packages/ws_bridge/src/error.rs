use tokio_tungstenite::tungstenite;

/// Errors surfaced to callers of the bridge.
///
/// Inbound dispatch never produces one of these: malformed and unroutable
/// frames are dropped inside the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("relative url {0:?} needs an origin to resolve against")]
    RelativeUrlWithoutOrigin(String),

    #[error("no url given and no origin configured")]
    MissingUrl,

    #[error("unsupported url scheme {0:?} (expected ws, wss, http or https)")]
    UnsupportedScheme(String),

    #[error("invalid websocket protocol list {0:?}")]
    InvalidProtocol(String),

    #[error("bridge is not connected")]
    NotConnected,

    #[error("connect must be called from within a tokio runtime")]
    NoRuntime,

    #[error("transport is closed")]
    Closed,

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    #[error("websocket request rejected: {0}")]
    Handshake(#[from] tungstenite::Error),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
