use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ws_bridge::config::{ConnectionConfig, FileConfig, load_config};
use ws_bridge::{Bridge, Origin, ReconnectOptions, TransportEvent};

#[derive(Parser)]
#[command(name = "ws-bridge")]
#[command(about = "Multiplex named JSON streams over one WebSocket connection")]
struct Args {
    /// ws:// or wss:// URL, or a path starting with / (needs --origin)
    url: Option<String>,

    /// Stream to subscribe to (repeatable)
    #[arg(short, long = "stream", value_name = "NAME")]
    streams: Vec<String>,

    /// Origin that relative URLs resolve against, e.g. https://example.com
    #[arg(short, long)]
    origin: Option<String>,

    /// Sec-WebSocket-Protocol to request (repeatable)
    #[arg(short, long = "protocol", value_name = "PROTOCOL")]
    protocols: Vec<String>,

    /// Config file (default: ./ws-bridge.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// One line typed on stdin, ready to send.
#[derive(Debug, PartialEq)]
enum Outbound {
    Scoped { stream: String, payload: Value },
    Unscoped(Value),
}

/// `@name <json>` sends on stream `name`; any other non-blank line is sent bare.
fn parse_input_line(line: &str) -> Result<Option<Outbound>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    if let Some(rest) = line.strip_prefix('@') {
        let (stream, json) = rest
            .split_once(char::is_whitespace)
            .map(|(s, j)| (s, j.trim_start()))
            .unwrap_or((rest, ""));
        if stream.is_empty() {
            bail!("missing stream name after '@'");
        }
        if json.is_empty() {
            bail!("missing payload for stream {stream:?}");
        }
        let payload = serde_json::from_str(json)
            .with_context(|| format!("payload for stream {stream:?} is not valid JSON"))?;
        return Ok(Some(Outbound::Scoped {
            stream: stream.to_string(),
            payload,
        }));
    }

    let payload = serde_json::from_str(line).context("line is not valid JSON")?;
    Ok(Some(Outbound::Unscoped(payload)))
}

fn send_outbound(bridge: &Bridge, outbound: Outbound) -> ws_bridge::Result<()> {
    match outbound {
        Outbound::Scoped { stream, payload } => bridge.stream(&stream).send(&payload),
        Outbound::Unscoped(payload) => bridge.send(&payload),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug {
        "ws_bridge=debug"
    } else {
        "ws_bridge=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // stdout carries routed messages, so logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let file_config: FileConfig = load_config(args.config.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    let mut connection = ConnectionConfig::from_file(&file_config.connection)
        .context("Invalid [connection] configuration")?;
    let options = ReconnectOptions::from_file(&file_config.reconnect);

    // CLI flags win over the config file.
    if let Some(url) = args.url {
        connection.url = Some(url);
    }
    if let Some(origin) = args.origin.as_deref() {
        connection.origin = Some(Origin::parse(origin).context("Invalid --origin")?);
    }
    if !args.protocols.is_empty() {
        connection.protocols = args.protocols;
    }

    let mut builder = Bridge::builder();
    if let Some(origin) = connection.origin.clone() {
        builder = builder.origin(origin);
    }
    let bridge = builder.build();

    bridge.listen(|frame, _| println!("- {frame}"));
    for name in &args.streams {
        bridge.demultiplex(name, |payload, stream| {
            println!("{} {payload}", stream.unwrap_or("-"));
        });
    }

    bridge
        .connect(connection.url.as_deref(), &connection.protocols, options)
        .context("Failed to start connection")?;

    if let Some(conn) = bridge.connection() {
        info!(url = %conn.url(), streams = ?args.streams, "bridge started");
        let mut events = conn.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::Open) => info!("connected"),
                    Ok(TransportEvent::Close { code, reason }) => {
                        warn!(?code, %reason, "disconnected")
                    }
                    Ok(TransportEvent::Error(e)) => warn!(error = %e, "transport error"),
                    Ok(TransportEvent::Message(text)) => debug!(len = text.len(), "frame received"),
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "event log lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                match parse_input_line(&line) {
                    Ok(Some(outbound)) => {
                        if let Err(e) = send_outbound(&bridge, outbound) {
                            error!(error = %e, "send failed");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "ignoring input line"),
                }
            }
        }
    }

    bridge.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blank_line_is_skipped() {
        assert_eq!(parse_input_line("   ").unwrap(), None);
    }

    #[test]
    fn test_scoped_line() {
        assert_eq!(
            parse_input_line("@mystream {\"prop1\": \"value1\"}").unwrap(),
            Some(Outbound::Scoped {
                stream: "mystream".into(),
                payload: json!({"prop1": "value1"}),
            })
        );
    }

    #[test]
    fn test_scoped_line_tab_separated() {
        assert_eq!(
            parse_input_line("@s\t42").unwrap(),
            Some(Outbound::Scoped {
                stream: "s".into(),
                payload: json!(42),
            })
        );
    }

    #[test]
    fn test_unscoped_line() {
        assert_eq!(
            parse_input_line("{\"a\": 1}").unwrap(),
            Some(Outbound::Unscoped(json!({"a": 1})))
        );
    }

    #[test]
    fn test_scoped_line_without_payload_fails() {
        assert!(parse_input_line("@mystream").is_err());
        assert!(parse_input_line("@ {}").is_err());
    }

    #[test]
    fn test_invalid_json_fails() {
        assert!(parse_input_line("not json").is_err());
        assert!(parse_input_line("@s not json").is_err());
    }
}
