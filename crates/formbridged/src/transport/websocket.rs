//! WebSocket halves adapted to the session's frame traits.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::debug;

use formbridge_session::{FrameSink, FrameSource, TransportError};

use super::TRANSPORT_TARGET;

/// Splits an upgraded socket into the session's outbound and inbound
/// halves.
#[must_use]
pub fn split(socket: WebSocket) -> (WebSocketSink, WebSocketSource) {
    let (sink, stream) = socket.split();
    (
        WebSocketSink {
            sink: Mutex::new(sink),
        },
        WebSocketSource { stream },
    )
}

/// Outbound half; concurrent senders are serialised by a mutex.
pub struct WebSocketSink {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.into()))
            .await
            .map_err(|error| TransportError::io("websocket send failed", error))
    }
}

/// Inbound half, yielding text frames only.
pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn receive(&mut self) -> Result<Option<String>, TransportError> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Ok(Some(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(target: TRANSPORT_TARGET, ?frame, "peer sent close frame");
                    return Ok(None);
                }
                Ok(Message::Binary(bytes)) => {
                    debug!(target: TRANSPORT_TARGET, len = bytes.len(), "ignoring binary frame");
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(error) => return Err(TransportError::io("websocket receive failed", error)),
            }
        }
        Ok(None)
    }
}
