use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError as WsProtocolError},
};
use url::Url;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling setup failed: {0}")]
    Setup(String),
    #[error("signaling channel closed")]
    ChannelClosed,
}

/// Bidirectional, reliable, ordered message channel to the remote peer.
/// Payloads are the codec's wire text; framing and delivery belong to the
/// implementation.
#[async_trait]
pub trait SignalingChannel: Send {
    async fn send(&mut self, payload: String) -> Result<(), SignalingError>;

    /// Next inbound payload, or `None` once the channel is closed.
    async fn recv(&mut self) -> Option<String>;

    async fn close(&mut self);
}

/// Signaling channel over a websocket. Text frames carry the wire messages;
/// binary frames are tolerated when they hold valid UTF-8.
pub struct WebSocketSignaling {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketSignaling {
    pub async fn connect(endpoint: &str) -> Result<Self, SignalingError> {
        let url = Url::parse(endpoint).map_err(|err| {
            SignalingError::Setup(format!("invalid signaling url {endpoint}: {err}"))
        })?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| SignalingError::Setup(format!("websocket connect failed: {err}")))?;
        tracing::debug!(target = "signaling", url = %url, "signaling websocket connected");
        Ok(Self { stream })
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignaling {
    async fn send(&mut self, payload: String) -> Result<(), SignalingError> {
        self.stream
            .send(Message::Text(payload))
            .await
            .map_err(|_| SignalingError::ChannelClosed)
    }

    async fn recv(&mut self) -> Option<String> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(text),
                    Err(_) => {
                        tracing::warn!(
                            target = "signaling",
                            "dropping non-utf8 binary signaling frame"
                        );
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(
                    WsError::ConnectionClosed
                    | WsError::AlreadyClosed
                    | WsError::Protocol(WsProtocolError::ResetWithoutClosingHandshake),
                ) => return None,
                Err(err) => {
                    tracing::warn!(target = "signaling", error = %err, "signaling websocket error");
                    return None;
                }
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            tracing::debug!(target = "signaling", error = %err, "websocket close failed");
        }
    }
}
