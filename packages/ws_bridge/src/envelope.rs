//! The `{stream, payload}` wire envelope.
//!
//! Wire format (JSON text frames):
//!
//! - unscoped: any JSON value, sent and received as-is
//! - scoped: `{"stream": "<name>", "payload": <any JSON value>}`
//!
//! Inbound frames are decoded exactly once, here, into an [`Inbound`] that
//! the bridge routes without looking at the raw text again.

use serde::Serialize;
use serde_json::Value;

/// Envelope key carrying the stream name.
pub const STREAM_KEY: &str = "stream";

/// Envelope key carrying the scoped payload.
pub const PAYLOAD_KEY: &str = "payload";

/// A decoded inbound frame, classified for routing.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// No stream tag (absent or `null`). The whole decoded frame is the payload.
    Unscoped(Value),
    /// Tagged with a stream name. A missing `payload` key decodes to `null`.
    Scoped { stream: String, payload: Value },
    /// Tagged, but the tag is not a string and can never match a stream name.
    Unroutable,
}

impl Inbound {
    /// Parse one text frame.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(value))
    }

    /// Classify an already-parsed frame.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Inbound::Unscoped(value);
        };

        match map.remove(STREAM_KEY) {
            None => Inbound::Unscoped(Value::Object(map)),
            Some(Value::Null) => {
                map.insert(STREAM_KEY.to_string(), Value::Null);
                Inbound::Unscoped(Value::Object(map))
            }
            Some(Value::String(stream)) => {
                let payload = map.remove(PAYLOAD_KEY).unwrap_or(Value::Null);
                Inbound::Scoped { stream, payload }
            }
            Some(_) => Inbound::Unroutable,
        }
    }

    /// The stream tag, if this frame is scoped.
    pub fn stream(&self) -> Option<&str> {
        match self {
            Inbound::Scoped { stream, .. } => Some(stream),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: ?Sized> {
    stream: &'a str,
    payload: &'a T,
}

/// Serialize `payload` wrapped in a `{stream, payload}` envelope.
pub fn encode_scoped<T>(stream: &str, payload: &T) -> serde_json::Result<String>
where
    T: Serialize + ?Sized,
{
    serde_json::to_string(&Envelope { stream, payload })
}

/// Serialize `payload` as-is, with no envelope.
pub fn encode_unscoped<T>(payload: &T) -> serde_json::Result<String>
where
    T: Serialize + ?Sized,
{
    serde_json::to_string(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── decode ──────────────────────────────────────────────────────────

    #[test]
    fn object_without_stream_is_unscoped() {
        let inbound = Inbound::decode(r#"{"type":"test","payload":"message 1"}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Unscoped(json!({"type": "test", "payload": "message 1"}))
        );
    }

    #[test]
    fn tagged_object_is_scoped() {
        let inbound = Inbound::decode(
            r#"{"stream":"stream1","payload":{"type":"test","payload":"message 1"}}"#,
        )
        .unwrap();
        assert_eq!(
            inbound,
            Inbound::Scoped {
                stream: "stream1".to_string(),
                payload: json!({"type": "test", "payload": "message 1"}),
            }
        );
        assert_eq!(inbound.stream(), Some("stream1"));
    }

    #[test]
    fn null_stream_is_unscoped_and_keeps_the_key() {
        let inbound = Inbound::decode(r#"{"stream":null,"a":1}"#).unwrap();
        assert_eq!(inbound, Inbound::Unscoped(json!({"stream": null, "a": 1})));
        assert_eq!(inbound.stream(), None);
    }

    #[test]
    fn missing_payload_decodes_to_null() {
        let inbound = Inbound::decode(r#"{"stream":"s"}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Scoped {
                stream: "s".to_string(),
                payload: Value::Null,
            }
        );
    }

    #[test]
    fn scoped_ignores_extra_keys() {
        let inbound = Inbound::decode(r#"{"stream":"s","payload":2,"extra":true}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Scoped {
                stream: "s".to_string(),
                payload: json!(2),
            }
        );
    }

    #[test]
    fn non_string_stream_is_unroutable() {
        assert_eq!(
            Inbound::decode(r#"{"stream":5,"payload":1}"#).unwrap(),
            Inbound::Unroutable
        );
        assert_eq!(
            Inbound::decode(r#"{"stream":["a"],"payload":1}"#).unwrap(),
            Inbound::Unroutable
        );
    }

    #[test]
    fn non_object_frames_are_unscoped() {
        assert_eq!(Inbound::decode("[1,2]").unwrap(), Inbound::Unscoped(json!([1, 2])));
        assert_eq!(Inbound::decode("42").unwrap(), Inbound::Unscoped(json!(42)));
        assert_eq!(
            Inbound::decode(r#""stream""#).unwrap(),
            Inbound::Unscoped(json!("stream"))
        );
    }

    #[test]
    fn malformed_frame_is_an_error() {
        assert!(Inbound::decode("{not json").is_err());
        assert!(Inbound::decode("").is_err());
    }

    // ── encode ──────────────────────────────────────────────────────────

    #[test]
    fn scoped_encoding_puts_stream_first() {
        let text = encode_scoped("stream1", &json!({"type": "test"})).unwrap();
        assert_eq!(text, r#"{"stream":"stream1","payload":{"type":"test"}}"#);
    }

    #[test]
    fn unscoped_encoding_has_no_wrapper() {
        let text = encode_unscoped(&json!({"a": 1})).unwrap();
        assert_eq!(text, r#"{"a":1}"#);
    }

    #[test]
    fn scoped_encoding_accepts_any_serialize() {
        #[derive(Serialize)]
        struct Ping {
            seq: u32,
        }
        let text = encode_scoped("pings", &Ping { seq: 7 }).unwrap();
        assert_eq!(text, r#"{"stream":"pings","payload":{"seq":7}}"#);
    }
}
