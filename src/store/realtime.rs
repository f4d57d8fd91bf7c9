//! Insert notifications over the backend's Realtime WebSocket
//!
//! The channel speaks the Phoenix framing: every frame is a JSON object
//! with `topic`, `event`, `payload` and `ref`. After joining
//! `realtime:{schema}:{table}` with a `postgres_changes` filter for
//! `INSERT`, the server pushes one `postgres_changes` frame per new row,
//! carrying the row under `payload.data.record`. The connection must send a
//! heartbeat on the `phoenix` topic at least every 30 seconds.

use crate::error::FeedError;
use crate::store::record::StoredReading;
use crate::store::{BackendCredentials, ChangeSource, ChangeStream};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const JOIN_REF: &str = "1";

/// Subscription factory for insert notifications on one table
pub struct RealtimeSource {
    credentials: BackendCredentials,
    schema: String,
    table: String,
    heartbeat_interval: Duration,
}

/// One decoded server frame
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// A newly inserted row
    Insert(Box<StoredReading>),
    /// Reply to a client message, keyed by its `ref`
    Reply {
        reference: Option<String>,
        ok: bool,
        detail: String,
    },
    /// Channel-level error
    ChannelError(String),
    /// Server closed the channel
    ChannelClosed,
    /// Anything else (presence, system notices, other change types)
    Ignored,
}

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

impl RealtimeSource {
    /// Create a source for inserts on `schema.table`
    ///
    /// # Arguments
    ///
    /// * `credentials` - Backend URL and API key
    /// * `schema` - Database schema of the watched table
    /// * `table` - Table whose inserts are streamed
    /// * `heartbeat_interval` - Period of the keep-alive frame
    pub fn new(
        credentials: BackendCredentials,
        schema: impl Into<String>,
        table: impl Into<String>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            credentials,
            schema: schema.into(),
            table: table.into(),
            heartbeat_interval,
        }
    }

    /// Channel topic for the watched table
    pub fn topic(&self) -> String {
        format!("realtime:{}:{}", self.schema, self.table)
    }

    /// WebSocket endpoint derived from the backend's HTTP URL
    pub fn websocket_url(&self) -> String {
        let base = self.credentials.url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            base, self.credentials.key
        )
    }

    /// `phx_join` frame subscribing to inserts
    pub fn join_message(&self) -> String {
        json!({
            "topic": self.topic(),
            "event": "phx_join",
            "payload": {
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "INSERT",
                        "schema": self.schema,
                        "table": self.table,
                    }],
                },
                "access_token": self.credentials.key,
            },
            "ref": JOIN_REF,
        })
        .to_string()
    }

    async fn connect(&self) -> Result<RealtimeStream, FeedError> {
        let url = self.websocket_url();
        let (ws, _response) = connect_async(&url)
            .await
            .map_err(|e| FeedError::SubscriptionFailed(format!("Failed to connect: {}", e)))?;
        let (mut sink, mut stream) = ws.split();

        sink.send(Message::Text(self.join_message()))
            .await
            .map_err(|e| FeedError::SubscriptionFailed(format!("Failed to send join: {}", e)))?;

        // Wait for the join reply before handing out the stream
        loop {
            let text = match stream.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => return Err(FeedError::SubscriptionClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(FeedError::SubscriptionFailed(e.to_string())),
            };

            match parse_frame(&text)? {
                RealtimeEvent::Reply { reference, ok, detail }
                    if reference.as_deref() == Some(JOIN_REF) =>
                {
                    if ok {
                        break;
                    }
                    return Err(FeedError::SubscriptionFailed(detail));
                }
                RealtimeEvent::ChannelError(detail) => {
                    return Err(FeedError::SubscriptionFailed(detail))
                }
                _ => continue,
            }
        }

        info!("Subscribed to inserts on {}", self.topic());

        let mut heartbeat = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(RealtimeStream {
            sink,
            stream,
            heartbeat,
            topic: self.topic(),
            next_ref: 2,
        })
    }
}

impl ChangeSource for RealtimeSource {
    fn subscribe<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChangeStream>, FeedError>> + Send + 'a>> {
        Box::pin(async move {
            let stream = self.connect().await?;
            Ok(Box::new(stream) as Box<dyn ChangeStream>)
        })
    }
}

/// A joined channel yielding inserted rows
pub struct RealtimeStream {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    heartbeat: Interval,
    topic: String,
    next_ref: u64,
}

impl RealtimeStream {
    fn take_ref(&mut self) -> String {
        let reference = self.next_ref.to_string();
        self.next_ref += 1;
        reference
    }
}

impl ChangeStream for RealtimeStream {
    fn next_record<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<StoredReading, FeedError>> + Send + 'a>> {
        Box::pin(async move {
            loop {
                let message = tokio::select! {
                    _ = self.heartbeat.tick() => {
                        let frame = heartbeat_message(&self.take_ref());
                        self.sink
                            .send(Message::Text(frame))
                            .await
                            .map_err(|e| FeedError::SubscriptionFailed(format!("Heartbeat failed: {}", e)))?;
                        debug!("Sent realtime heartbeat");
                        continue;
                    }
                    message = self.stream.next() => message,
                };

                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Realtime connection closed: {:?}", frame);
                        return Err(FeedError::SubscriptionClosed);
                    }
                    None => return Err(FeedError::SubscriptionClosed),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(FeedError::SubscriptionFailed(e.to_string())),
                };

                match parse_frame(&text) {
                    Ok(RealtimeEvent::Insert(record)) => return Ok(*record),
                    Ok(RealtimeEvent::ChannelError(detail)) => {
                        return Err(FeedError::SubscriptionFailed(detail))
                    }
                    Ok(RealtimeEvent::ChannelClosed) => return Err(FeedError::SubscriptionClosed),
                    Ok(RealtimeEvent::Reply { ok: false, detail, .. }) => {
                        warn!("Realtime server rejected a message: {}", detail);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Skipping undecodable realtime frame: {}", e),
                }
            }
        })
    }

    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let leave = json!({
                "topic": self.topic,
                "event": "phx_leave",
                "payload": {},
                "ref": self.take_ref(),
            })
            .to_string();

            if let Err(e) = self.sink.send(Message::Text(leave)).await {
                debug!("Failed to send leave frame: {}", e);
            }
            if let Err(e) = self.sink.close().await {
                debug!("Failed to close realtime connection: {}", e);
            }
            info!("Unsubscribed from {}", self.topic);
        })
    }
}

/// Heartbeat frame on the `phoenix` topic
pub fn heartbeat_message(reference: &str) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference,
    })
    .to_string()
}

/// Decode one text frame
///
/// # Errors
///
/// Returns `FeedError::DecodeError` if the frame is not a Phoenix message
/// or an insert carries a record that does not decode.
pub fn parse_frame(text: &str) -> Result<RealtimeEvent, FeedError> {
    let frame: Frame =
        serde_json::from_str(text).map_err(|e| FeedError::DecodeError(e.to_string()))?;

    match frame.event.as_str() {
        "postgres_changes" => {
            let data = &frame.payload["data"];
            if data["type"].as_str().unwrap_or("INSERT") != "INSERT" {
                return Ok(RealtimeEvent::Ignored);
            }
            decode_record(&data["record"])
        }
        // Older servers send the change type as the event name
        "INSERT" => decode_record(&frame.payload["record"]),
        "phx_reply" => {
            let ok = frame.payload["status"].as_str() == Some("ok");
            Ok(RealtimeEvent::Reply {
                reference: frame.reference,
                ok,
                detail: frame.payload["response"].to_string(),
            })
        }
        "phx_error" => Ok(RealtimeEvent::ChannelError(frame.payload.to_string())),
        "phx_close" => Ok(RealtimeEvent::ChannelClosed),
        _ => Ok(RealtimeEvent::Ignored),
    }
}

fn decode_record(record: &Value) -> Result<RealtimeEvent, FeedError> {
    if record.is_null() {
        return Err(FeedError::DecodeError(
            "insert notification has no record".to_string(),
        ));
    }
    serde_json::from_value::<StoredReading>(record.clone())
        .map(|record| RealtimeEvent::Insert(Box::new(record)))
        .map_err(|e| FeedError::DecodeError(e.to_string()))
}
