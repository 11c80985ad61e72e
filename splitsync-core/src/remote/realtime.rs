//! Realtime change feed over the backend's Phoenix-channel websocket.
//!
//! One channel is joined per table (`realtime:<table>`) with a
//! `postgres_changes` filter for every event on that table. The connection
//! is kept alive with heartbeats and re-established with exponential
//! backoff; each successful (re)connection is reported to the sink so the
//! engine can refresh whatever it may have missed.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{EventType, RealtimeMessage, RemoteConfig, RemoteEvent};
use crate::table::{Row, SyncTable};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A Phoenix channel frame.
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    event_type: EventType,
    table: Option<String>,
    record: Option<Value>,
    old_record: Option<Value>,
}

/// What an inbound frame means to the feed.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Change(RemoteEvent),
    /// The server refused to join a channel.
    JoinRejected { topic: String, reason: String },
    Ignored,
}

/// Websocket URL of the realtime endpoint.
pub fn socket_url(config: &RemoteConfig) -> String {
    format!(
        "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        config.ws_base_url(),
        urlencoding::encode(&config.api_key)
    )
}

pub fn topic(table: SyncTable) -> String {
    format!("realtime:{}", table)
}

fn encode(frame: &Frame) -> String {
    // Frames hold only strings and JSON values, which always serialize.
    serde_json::to_string(frame).unwrap_or_default()
}

pub fn join_frame(table: SyncTable, access_token: &str, reference: u64) -> String {
    encode(&Frame {
        topic: topic(table),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": table.name() }
                ]
            },
            "access_token": access_token,
        }),
        reference: Some(reference.to_string()),
    })
}

pub fn heartbeat_frame(reference: u64) -> String {
    encode(&Frame {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    })
}

fn into_row(value: Option<Value>) -> Option<Row> {
    match value {
        Some(Value::Object(map)) if !map.is_empty() => Some(map),
        _ => None,
    }
}

/// Decodes one text frame.
pub fn parse_frame(text: &str) -> Inbound {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!("Ignoring undecodable realtime frame: {}", e);
            return Inbound::Ignored;
        }
    };

    match frame.event.as_str() {
        "postgres_changes" => {
            let data: ChangeData = match serde_json::from_value(frame.payload["data"].clone()) {
                Ok(data) => data,
                Err(e) => {
                    tracing::debug!("Ignoring malformed change on {}: {}", frame.topic, e);
                    return Inbound::Ignored;
                }
            };

            let table_name = data
                .table
                .clone()
                .or_else(|| frame.topic.strip_prefix("realtime:").map(str::to_string))
                .unwrap_or_default();
            let table = match table_name.parse::<SyncTable>() {
                Ok(table) => table,
                Err(_) => {
                    tracing::debug!("Ignoring change for unsynced table {}", table_name);
                    return Inbound::Ignored;
                }
            };

            Inbound::Change(RemoteEvent {
                table,
                event_type: data.event_type,
                new_row: into_row(data.record),
                old_row: into_row(data.old_record),
            })
        }
        "phx_reply" if frame.payload["status"] == "error" => Inbound::JoinRejected {
            topic: frame.topic,
            reason: frame.payload["response"].to_string(),
        },
        _ => Inbound::Ignored,
    }
}

enum SessionEnd {
    /// The engine dropped its receiver; stop for good.
    SinkClosed,
    Disconnected(String),
}

/// Keeps a realtime connection open until `sink` is closed.
pub(crate) async fn run(
    url: String,
    access_token: String,
    tables: Vec<SyncTable>,
    sink: mpsc::UnboundedSender<RealtimeMessage>,
) {
    let mut backoff = INITIAL_BACKOFF;
    let mut connected_before = false;

    loop {
        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                tracing::info!(
                    "Realtime connected ({} table(s), reconnect: {})",
                    tables.len(),
                    connected_before
                );
                backoff = INITIAL_BACKOFF;
                let end = session(socket, &access_token, &tables, connected_before, &sink).await;
                connected_before = true;
                match end {
                    SessionEnd::SinkClosed => return,
                    SessionEnd::Disconnected(reason) => {
                        tracing::warn!("Realtime disconnected: {}", reason);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Realtime connection failed: {}; retrying in {:?}", e, backoff);
            }
        }

        if sink.is_closed() {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn session(
    socket: Socket,
    access_token: &str,
    tables: &[SyncTable],
    reconnect: bool,
    sink: &mpsc::UnboundedSender<RealtimeMessage>,
) -> SessionEnd {
    let (mut sender, mut receiver) = socket.split();
    let mut reference = 0u64;

    for table in tables {
        reference += 1;
        let frame = join_frame(*table, access_token, reference);
        if let Err(e) = sender.send(Message::Text(frame.into())).await {
            return SessionEnd::Disconnected(e.to_string());
        }
    }

    if sink.send(RealtimeMessage::Connected { reconnect }).is_err() {
        return SessionEnd::SinkClosed;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = sink.closed() => {
                let _ = sender.send(Message::Close(None)).await;
                return SessionEnd::SinkClosed;
            }
            _ = heartbeat.tick() => {
                reference += 1;
                let frame = heartbeat_frame(reference);
                if let Err(e) = sender.send(Message::Text(frame.into())).await {
                    return SessionEnd::Disconnected(e.to_string());
                }
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => match parse_frame(text.as_str()) {
                    Inbound::Change(event) => {
                        if sink.send(RealtimeMessage::Change(event)).is_err() {
                            return SessionEnd::SinkClosed;
                        }
                    }
                    Inbound::JoinRejected { topic, reason } => {
                        tracing::warn!("Realtime join rejected on {}: {}", topic, reason);
                    }
                    Inbound::Ignored => {}
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sender.send(Message::Pong(data)).await {
                        return SessionEnd::Disconnected(e.to_string());
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return SessionEnd::Disconnected("closed by server".to_string());
                }
                Some(Ok(_)) => {
                    // Ignore other message types
                }
                Some(Err(e)) => return SessionEnd::Disconnected(e.to_string()),
            },
        }
    }
}
