//! Stream ingestor: the websocket feed from the bot backend and the
//! reconnect loop that keeps it alive.
//!
//! The feed is the only push path into the session; every frame becomes a
//! [`StatePatch`] applied through the store. A malformed or unknown frame is
//! logged and dropped without killing the connection.

use crate::session::store::{SessionStore, StatePatch};
use crate::session::types::{BotConfig, BotStatus, Candle, DailySummary, Position, PositionMsg};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// One frame of the backend's push feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Status(BotStatus),
    Position(PositionMsg),
    Config(BotConfig),
    Summary(DailySummary),
    Tick { ltp: f64 },
    Candle(Candle),
    SessionRollover,
}

pub fn parse_event(text: &str) -> Option<StreamEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(err = %err, "dropping unparseable stream frame");
            None
        }
    }
}

async fn apply_event(store: &Arc<SessionStore>, event: StreamEvent) {
    match event {
        StreamEvent::Status(status) => store.apply(StatePatch::Status(status)).await,
        StreamEvent::Position(msg) => match Position::try_from(msg) {
            Ok(position) => store.apply(StatePatch::Position(position)).await,
            Err(err) => warn!(err = %err, "dropping malformed position frame"),
        },
        StreamEvent::Config(config) => store.apply(StatePatch::Config(config)).await,
        StreamEvent::Summary(summary) => store.apply(StatePatch::Summary(summary)).await,
        StreamEvent::Tick { ltp } => store.apply_tick(ltp).await,
        StreamEvent::Candle(candle) => store.apply(StatePatch::Candle(candle)).await,
        StreamEvent::SessionRollover => store.apply(StatePatch::SessionRollover).await,
    }
}

#[derive(Clone)]
pub struct SessionWs {
    url: String,
}

impl SessionWs {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }

    /// One connection lifetime: connect, mark the session live, pump frames
    /// into the store until the server closes, the cancel signal fires or the
    /// socket errors.
    pub async fn stream(
        &self,
        store: &Arc<SessionStore>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut ws, _resp) = connect_async(self.url.as_str())
            .await
            .context("ws connect failed")?;
        store.apply(StatePatch::WsConnected(true)).await;
        info!(url = %self.url, "session stream connected");

        let mut ping = tokio::time::interval(Duration::from_secs(10));

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() { break; }
                }
                _ = ping.tick() => {
                    ws.send(Message::Ping(Vec::new().into()))
                        .await
                        .context("ws ping send failed")?;
                }
                msg = ws.next() => {
                    let Some(msg) = msg else { break };
                    let msg = msg.context("ws read failed")?;
                    match msg {
                        Message::Text(text) => {
                            if let Some(event) = parse_event(text.as_str()) {
                                apply_event(store, event).await;
                            }
                        }
                        Message::Binary(bin) => {
                            let text = String::from_utf8_lossy(&bin);
                            if let Some(event) = parse_event(&text) {
                                apply_event(store, event).await;
                            }
                        }
                        Message::Ping(_) | Message::Pong(_) => {}
                        Message::Close(_) => break,
                        Message::Frame(_) => {}
                    }
                }
            }
        }

        Ok(())
    }
}

/// Reconnect backoff: doubles per failed attempt, resets once a connection
/// is established.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max)
    }
}

/// Keep the stream alive until cancelled. While disconnected the store keeps
/// serving its last snapshot and the command path stays usable.
pub async fn run_ingest(
    ws: SessionWs,
    store: Arc<SessionStore>,
    policy: ReconnectPolicy,
    mut cancel: watch::Receiver<bool>,
) {
    let mut delay = policy.initial;
    loop {
        if *cancel.borrow() {
            break;
        }
        let result = ws.stream(&store, cancel.clone()).await;
        // If the handshake made it through, start the backoff over.
        let was_connected = store.snapshot().await.ws_connected;
        store.apply(StatePatch::WsConnected(false)).await;
        if *cancel.borrow() {
            break;
        }
        if let Err(err) = result {
            warn!(err = %err, "session stream dropped");
        }
        if was_connected {
            delay = policy.initial;
        }
        debug!(delay_ms = delay.as_millis() as u64, "reconnecting session stream");
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() { break; }
            }
            _ = tokio::time::sleep(delay) => {}
        }
        delay = policy.next_delay(delay);
    }
    store.apply(StatePatch::WsConnected(false)).await;
}
