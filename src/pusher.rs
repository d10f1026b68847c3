//! Pusher websocket subscription.
//!
//! Speaks protocol 7: waits for `pusher:connection_established`, subscribes to
//! the `common` channel and forwards every bound build event on it to the
//! dispatcher channel. Reconnects with backoff when the socket drops or goes
//! quiet; error codes 4000-4099 stop the client for good.

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::config::PusherCfg;
use crate::domain::{BuildEvent, RawEvent};
use crate::metrics;
use crate::readiness::Readiness;
use crate::retry::RetryPolicy;

/// Channel Travis publishes build notifications on.
pub const CHANNEL: &str = "common";

const PROTOCOL: u8 = 7;
const CLIENT_NAME: &str = "travis-archive";

#[derive(thiserror::Error, Debug)]
pub enum SubscriptionError {
    #[error("websocket: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("rejected by server ({code}): {message}")]
    Rejected { code: u16, message: String },
}

/// A frame as sent by the Pusher server.
#[derive(Debug, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// What a frame means to the client.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Established {
        socket_id: String,
        activity_timeout: Option<u64>,
    },
    Subscribed(String),
    Ping,
    Pong,
    Error {
        code: Option<u16>,
        message: String,
    },
    Event(RawEvent),
    Ignored(String),
}

impl Inbound {
    pub fn classify(frame: Frame) -> Inbound {
        match frame.event.as_str() {
            "pusher:connection_established" => {
                let data = decode_data(&frame.data);
                Inbound::Established {
                    socket_id: data["socket_id"].as_str().unwrap_or_default().to_string(),
                    activity_timeout: data["activity_timeout"].as_u64(),
                }
            }
            "pusher_internal:subscription_succeeded" => {
                Inbound::Subscribed(frame.channel.unwrap_or_default())
            }
            "pusher:ping" => Inbound::Ping,
            "pusher:pong" => Inbound::Pong,
            "pusher:error" => {
                let data = decode_data(&frame.data);
                Inbound::Error {
                    code: data["code"].as_u64().and_then(|c| u16::try_from(c).ok()),
                    message: data["message"].as_str().unwrap_or_default().to_string(),
                }
            }
            name => {
                let on_channel = frame.channel.as_deref() == Some(CHANNEL);
                match name.parse::<BuildEvent>() {
                    Ok(event) if on_channel => {
                        Inbound::Event(RawEvent::new(event, payload_text(frame.data)))
                    }
                    _ => Inbound::Ignored(frame.event),
                }
            }
        }
    }
}

/// Pusher double-encodes `data` as a JSON string; tolerate plain objects too.
fn decode_data(data: &Value) -> Value {
    match data {
        Value::String(s) => serde_json::from_str(s).unwrap_or(Value::Null),
        other => other.clone(),
    }
}

fn payload_text(data: Value) -> String {
    match data {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// How to react to a `pusher:error` code.
#[derive(Debug, PartialEq, Eq)]
pub enum Reconnect {
    Never,
    Immediately,
    WithBackoff,
}

pub fn reconnect_policy(code: Option<u16>) -> Reconnect {
    match code {
        Some(4000..=4099) => Reconnect::Never,
        Some(4200..=4299) => Reconnect::Immediately,
        _ => Reconnect::WithBackoff,
    }
}

enum SessionEnd {
    /// The dispatcher is gone; stop for good.
    ReceiverClosed,
    Reconnect { immediately: bool },
}

pub struct SubscriptionClient {
    cfg: PusherCfg,
    tx: mpsc::Sender<RawEvent>,
    ready: Arc<Readiness>,
    backoff: RetryPolicy,
}

impl SubscriptionClient {
    pub fn new(cfg: PusherCfg, tx: mpsc::Sender<RawEvent>, ready: Arc<Readiness>) -> Self {
        Self {
            cfg,
            tx,
            ready,
            backoff: RetryPolicy {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                ..RetryPolicy::default()
            },
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.cfg.secure { "wss" } else { "ws" };
        format!(
            "{scheme}://{}/app/{}?protocol={PROTOCOL}&client={CLIENT_NAME}&version={}",
            self.cfg.host,
            self.cfg.key,
            env!("CARGO_PKG_VERSION")
        )
    }

    /// Runs until the event receiver is dropped or the server rejects us.
    pub async fn run(self) -> Result<(), SubscriptionError> {
        let mut failures: u32 = 0;
        loop {
            let mut established = false;
            let end = self.session(&mut established).await;
            self.ready.set_subscription(false);
            if established {
                failures = 0;
            }

            let delay = match end {
                Ok(SessionEnd::ReceiverClosed) => {
                    tracing::info!("event receiver closed, leaving subscription");
                    return Ok(());
                }
                Ok(SessionEnd::Reconnect { immediately: true }) => Duration::ZERO,
                Ok(SessionEnd::Reconnect { immediately: false }) => {
                    failures += 1;
                    self.backoff.delay_for_attempt(failures)
                }
                Err(e @ SubscriptionError::Rejected { .. }) => return Err(e),
                Err(e) => {
                    failures += 1;
                    let delay = self.backoff.delay_for_attempt(failures);
                    tracing::warn!(error = %e, attempt = failures, "subscription failed");
                    delay
                }
            };

            metrics::SUBSCRIPTION_RECONNECTS.inc();
            tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting to pusher");
            tokio::time::sleep(delay).await;
        }
    }

    async fn session(&self, established: &mut bool) -> Result<SessionEnd, SubscriptionError> {
        let url = self.url();
        tracing::info!(host = %self.cfg.host, "connecting to pusher");
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws.split();

        let mut activity_timeout = Duration::from_secs(self.cfg.activity_timeout_secs);
        let pong_timeout = Duration::from_secs(self.cfg.pong_timeout_secs);
        let mut awaiting_pong = false;

        loop {
            let wait = if awaiting_pong {
                pong_timeout
            } else {
                activity_timeout
            };
            let msg = match tokio::time::timeout(wait, read.next()).await {
                Err(_) if awaiting_pong => {
                    tracing::warn!("no pong from pusher, reconnecting");
                    return Ok(SessionEnd::Reconnect { immediately: false });
                }
                Err(_) => {
                    send(&mut write, "pusher:ping", json!({})).await?;
                    awaiting_pong = true;
                    continue;
                }
                Ok(None) => {
                    tracing::warn!("pusher closed the connection");
                    return Ok(SessionEnd::Reconnect { immediately: false });
                }
                Ok(Some(msg)) => msg?,
            };
            awaiting_pong = false;

            let text = match msg {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    tracing::warn!(?frame, "pusher sent close");
                    return Ok(SessionEnd::Reconnect { immediately: false });
                }
                _ => continue,
            };

            let frame: Frame = match serde_json::from_str(text.as_str()) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "unreadable pusher frame");
                    continue;
                }
            };

            match Inbound::classify(frame) {
                Inbound::Established {
                    socket_id,
                    activity_timeout: server_timeout,
                } => {
                    if let Some(secs) = server_timeout.filter(|s| *s > 0) {
                        activity_timeout = Duration::from_secs(secs);
                    }
                    tracing::info!(%socket_id, "connected to pusher");
                    *established = true;
                    self.ready.set_subscription(true);
                    send(&mut write, "pusher:subscribe", json!({ "channel": CHANNEL })).await?;
                }
                Inbound::Subscribed(channel) => {
                    tracing::info!(%channel, "subscribed");
                }
                Inbound::Ping => send(&mut write, "pusher:pong", json!({})).await?,
                Inbound::Pong => {}
                Inbound::Error { code, message } => {
                    tracing::warn!(?code, %message, "pusher error");
                    match reconnect_policy(code) {
                        Reconnect::Never => {
                            return Err(SubscriptionError::Rejected {
                                code: code.unwrap_or_default(),
                                message,
                            });
                        }
                        // errors without a code are informational
                        _ if code.is_none() => {}
                        policy => {
                            return Ok(SessionEnd::Reconnect {
                                immediately: policy == Reconnect::Immediately,
                            });
                        }
                    }
                }
                Inbound::Event(raw) => {
                    tracing::debug!(event = %raw.event, bytes = raw.payload.len(), "received");
                    if self.tx.send(raw).await.is_err() {
                        return Ok(SessionEnd::ReceiverClosed);
                    }
                }
                Inbound::Ignored(event) => tracing::debug!(%event, "ignored pusher frame"),
            }
        }
    }
}

async fn send<S>(write: &mut S, event: &str, data: Value) -> Result<(), SubscriptionError>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let frame = json!({ "event": event, "data": data });
    write.send(Message::Text(frame.to_string().into())).await?;
    Ok(())
}
