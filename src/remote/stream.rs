//! Streaming connection to the remote event API.
//!
//! One connection per account session. Opens a websocket at the REST base
//! URL with its scheme swapped `http(s)` → `ws(s)` (§4.H step 4), sends the
//! session's bearer token as an authentication challenge, then forwards
//! parsed envelopes onto an `mpsc` channel for the dispatcher to consume.
//! Cancellation uses the "close a shared channel to signal stop" pattern
//! from §9: a `tokio::sync::watch` rather than a plain atomic, since the
//! reader blocks on the socket's own read future and needs a wakeup.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use crate::{Error, Result};

/// A decoded envelope from the event stream. Recognised `event_type`s are
/// listed in §4.D; anything else is logged and skipped by the dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    #[serde(default)]
    pub broadcast: Broadcast,
}

/// The `broadcast` envelope field, carrying routing metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Broadcast {
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// A live streaming connection. Holds the stop signal so `disconnect` is
/// idempotent and safe to call concurrently (guarded by the `watch`
/// sender's own `send` semantics plus an `AtomicBool` once-guard).
pub struct StreamHandle {
    stop_tx: watch::Sender<bool>,
    closed: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl StreamHandle {
    /// Signal the reader task to stop. Safe to call any number of times
    /// concurrently; only the first call has an effect.
    pub fn disconnect(&self) {
        use std::sync::atomic::Ordering;
        if self.closed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            let _ = self.stop_tx.send(true);
        }
    }
}

/// Connect to the remote event stream and spawn the reader task.
///
/// `base_url` is the account's REST base URL (scheme swapped internally).
/// Returns the stop handle and a receiver of decoded envelopes; the
/// receiver closes when the connection drops or `disconnect` is called.
///
/// # Errors
///
/// Returns an error if the initial websocket handshake fails.
pub async fn connect(base_url: &str, token: &str) -> Result<(StreamHandle, mpsc::Receiver<Envelope>)> {
    let ws_url = swap_scheme(base_url) + "/api/v4/websocket";
    let (socket, _response) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .map_err(|e| Error::Channel(format!("websocket connect failed: {e}")))?;

    let (mut write, mut read) = socket.split();

    let auth = serde_json::json!({
        "seq": 1,
        "action": "authentication_challenge",
        "data": { "token": token },
    });
    write
        .send(Message::Text(auth.to_string().into()))
        .await
        .map_err(Error::Stream)?;

    let (tx, rx) = mpsc::channel(256);
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let closed = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<Envelope>(&text) {
                                Ok(envelope) => {
                                    if tx.send(envelope).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "malformed stream envelope, dropping");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("remote stream closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "remote stream read error");
                            break;
                        }
                    }
                }
            }
        }
    });

    Ok((StreamHandle { stop_tx, closed }, rx))
}

/// Swap `http(s)://` for `ws(s)://`, preserving host/port/path.
fn swap_scheme(base_url: &str) -> String {
    if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_swap_preserves_host_and_path() {
        assert_eq!(swap_scheme("https://chat.example.com/sub"), "wss://chat.example.com/sub");
        assert_eq!(swap_scheme("http://localhost:8065"), "ws://localhost:8065");
    }

    #[test]
    fn envelope_parses_minimal_shape() {
        let raw = r#"{"event":"posted","data":{"post":"{}"},"broadcast":{"channel_id":"c1"}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.event, "posted");
        assert_eq!(env.broadcast.channel_id.as_deref(), Some("c1"));
    }

    #[test]
    fn envelope_tolerates_missing_broadcast() {
        let raw = r#"{"event":"typing","data":{}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert!(env.broadcast.channel_id.is_none());
    }
}
