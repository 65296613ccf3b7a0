//! Live feed session - one WebSocket listener subscribed under one identity
//!
//! The session subscribes on start, forwards each published record as a JSON
//! text frame, and unsubscribes when the client leaves, a send fails, the
//! registry releases it, or the server shuts down. Inbound text and binary
//! frames are treated as keepalives and ignored.

use crate::domain::types::UserId;
use crate::infra::metrics::Metrics;
use crate::services::subscription::SubscriptionRegistry;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ClientClosed,
    ReceiveError,
    SendFailed,
    /// Registry dropped the listener (slow consumer or release at shutdown)
    Released,
    Shutdown,
}

impl SessionEnd {
    fn as_str(&self) -> &'static str {
        match self {
            SessionEnd::ClientClosed => "client_closed",
            SessionEnd::ReceiveError => "receive_error",
            SessionEnd::SendFailed => "send_failed",
            SessionEnd::Released => "released",
            SessionEnd::Shutdown => "shutdown",
        }
    }
}

pub struct LiveFeedSession {
    pub user_id: UserId,
    pub registry: Arc<SubscriptionRegistry>,
    pub metrics: Arc<Metrics>,
    /// Records allowed to wait for this connection before it is dropped
    pub queue: usize,
}

impl LiveFeedSession {
    /// Serve one connection until it ends
    pub async fn run<S>(
        self,
        ws: WebSocketStream<S>,
        mut shutdown: watch::Receiver<bool>,
    ) -> SessionEnd
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (listener, mut records) = self.registry.listener(self.queue);
        let listener_id = listener.id();
        self.registry.subscribe(self.user_id, &listener);
        // Registry holds the only sender from here on
        drop(listener);
        self.metrics.listener_connected();
        info!(user_id = %self.user_id, listener = %listener_id, "live_feed_connected");

        let (mut sink, mut stream) = ws.split();

        let end = loop {
            tokio::select! {
                outbound = records.recv() => {
                    let Some(record) = outbound else {
                        break SessionEnd::Released;
                    };
                    let text = match serde_json::to_string(&*record) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, id = record.id, "live_feed_encode_failed");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!(listener = %listener_id, error = %e, "live_feed_send_failed");
                        break SessionEnd::SendFailed;
                    }
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Close(_))) | None => break SessionEnd::ClientClosed,
                    // Pings are answered by the protocol layer
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(listener = %listener_id, error = %e, "live_feed_receive_failed");
                        break SessionEnd::ReceiveError;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break SessionEnd::Shutdown;
                    }
                }
            }
        };

        self.registry.unsubscribe(self.user_id, listener_id);
        self.metrics.listener_disconnected();

        if matches!(end, SessionEnd::Shutdown | SessionEnd::Released) {
            let _ = sink.send(Message::Close(None)).await;
        }

        info!(
            user_id = %self.user_id,
            listener = %listener_id,
            reason = end.as_str(),
            "live_feed_disconnected"
        );
        end
    }
}
