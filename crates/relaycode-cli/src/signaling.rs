//! Thin client for C1's WebSocket wire protocol. Reconnects on unexpected
//! transport loss per the signaling reconnect policy: backoff delays of
//! `1s, 2s, 4s, 8s, 16s`, capped at the final value and reset on a
//! successful reopen, with outbound messages queued while disconnected
//! flushed once the new socket is up.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use relaycode_shared::constants::RECONNECT_BACKOFF_MS;
use relaycode_shared::signaling::{ClientMessage, ServerMessage};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct SignalingClient {
    socket: Socket,
    url: String,
    pending: VecDeque<ClientMessage>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let socket = Self::dial(url).await?;
        Ok(Self {
            socket,
            url: url.to_string(),
            pending: VecDeque::new(),
        })
    }

    async fn dial(url: &str) -> Result<Socket> {
        let (socket, _response) = connect_async(url)
            .await
            .with_context(|| format!("failed to connect to signaling server at {url}"))?;
        Ok(socket)
    }

    /// Queues `message` and attempts to flush the outbound queue. Never
    /// fails on a transport loss -- the message stays queued and is sent
    /// once reconnection succeeds.
    pub async fn send(&mut self, message: ClientMessage) -> Result<()> {
        self.pending.push_back(message);
        self.flush_pending().await;
        Ok(())
    }

    /// Blocks until the next server message, reconnecting transparently on
    /// unexpected transport loss. Only returns `Err` for a malformed
    /// message on an otherwise healthy transport.
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    let message: ServerMessage = serde_json::from_str(&text)
                        .with_context(|| format!("malformed server message: {text}"))?;
                    return Ok(message);
                }
                Some(Ok(Message::Close(_))) | None => {
                    warn!("signaling transport closed unexpectedly");
                    self.reconnect().await;
                    self.flush_pending().await;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "signaling transport error");
                    self.reconnect().await;
                    self.flush_pending().await;
                }
            }
        }
    }

    async fn flush_pending(&mut self) {
        while let Some(message) = self.pending.pop_front() {
            let text = match serde_json::to_string(&message) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "dropping unsendable queued message");
                    continue;
                }
            };
            if let Err(e) = self.socket.send(Message::Text(text)).await {
                warn!(error = %e, "signaling send failed, reconnecting");
                self.pending.push_front(message);
                self.reconnect().await;
                continue;
            }
        }
    }

    /// Dials a fresh socket with the reconnect backoff schedule, retrying
    /// indefinitely at the final delay once the schedule is exhausted. The
    /// attempt counter resets to zero on every call (i.e. on every
    /// successful reopen).
    async fn reconnect(&mut self) {
        let mut attempt = 0usize;
        loop {
            let delay_ms = RECONNECT_BACKOFF_MS[attempt.min(RECONNECT_BACKOFF_MS.len() - 1)];
            warn!(delay_ms, attempt, "reconnecting to signaling server");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;

            match Self::dial(&self.url).await {
                Ok(socket) => {
                    self.socket = socket;
                    info!("signaling transport reconnected");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "reconnect attempt failed");
                    attempt += 1;
                }
            }
        }
    }
}

/// Extracts a room code from either a bare code or a `?room=` deep-link URL,
/// normalizing to uppercase.
pub fn extract_room_code(input: &str) -> String {
    let code = input
        .split("room=")
        .nth(1)
        .map(|rest| rest.split('&').next().unwrap_or(rest))
        .unwrap_or(input);
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_code_passes_through_uppercased() {
        assert_eq!(extract_room_code("abc123"), "ABC123");
    }

    #[test]
    fn deep_link_url_extracts_room_param() {
        assert_eq!(
            extract_room_code("https://relaycode.example?room=abc123"),
            "ABC123"
        );
    }

    #[test]
    fn deep_link_with_trailing_query_params() {
        assert_eq!(
            extract_room_code("https://relaycode.example?room=abc123&ref=qr"),
            "ABC123"
        );
    }
}
