//! URL resolution for `Bridge::connect`.

use std::fmt;
use std::str::FromStr;

use url::{Position, Url};

use crate::error::{BridgeError, Result};

/// The origin relative URLs resolve against, e.g. `https://example.com:8443`.
///
/// A secure origin (`https`/`wss`) resolves to `wss://`, anything else to `ws://`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Origin {
    secure: bool,
    authority: String,
}

impl Origin {
    pub fn parse(input: &str) -> Result<Self> {
        let parsed = Url::parse(input).map_err(|source| BridgeError::InvalidUrl {
            url: input.to_string(),
            source,
        })?;

        let secure = match parsed.scheme() {
            "https" | "wss" => true,
            "http" | "ws" => false,
            other => return Err(BridgeError::UnsupportedScheme(other.to_string())),
        };

        if !parsed.has_host() {
            return Err(BridgeError::InvalidUrl {
                url: input.to_string(),
                source: url::ParseError::EmptyHost,
            });
        }

        Ok(Self {
            secure,
            authority: parsed[Position::BeforeHost..Position::AfterPort].to_string(),
        })
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// `host[:port]` as written in the origin.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// `ws://host[:port]` or `wss://host[:port]`.
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}", scheme, self.authority)
    }
}

impl FromStr for Origin {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{}://{}", scheme, self.authority)
    }
}

/// Resolve the URL handed to `connect`.
///
/// - `None` resolves to the bare origin.
/// - A leading `/` is appended to the origin's websocket base.
/// - Anything else must already be an absolute `ws://` or `wss://` URL.
pub fn resolve_url(url: Option<&str>, origin: Option<&Origin>) -> Result<Url> {
    let resolved = match url {
        None => origin.ok_or(BridgeError::MissingUrl)?.base_url(),
        Some(path) if path.starts_with('/') => {
            let origin =
                origin.ok_or_else(|| BridgeError::RelativeUrlWithoutOrigin(path.to_string()))?;
            format!("{}{}", origin.base_url(), path)
        }
        Some(absolute) => absolute.to_string(),
    };

    let parsed = Url::parse(&resolved).map_err(|source| BridgeError::InvalidUrl {
        url: resolved.clone(),
        source,
    })?;

    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(BridgeError::UnsupportedScheme(other.to_string())),
    }
}
