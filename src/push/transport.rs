//! Push transport capability
//!
//! A connection is a stream of text frames in both directions. The default
//! implementation is a tokio-tungstenite websocket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{PushError, PushResult};

/// One open connection
#[async_trait]
pub trait PushConnection: Send {
    async fn send(&mut self, text: String) -> PushResult<()>;

    /// Next text frame; `None` once the peer has closed the connection
    async fn recv(&mut self) -> Option<PushResult<String>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self) -> PushResult<Box<dyn PushConnection>>;
}

pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn connect(&self) -> PushResult<Box<dyn PushConnection>> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| PushError::Channel(e.to_string()))?;
        debug!(url = %self.url, "websocket open");
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WebSocketConnection {
    async fn send(&mut self, text: String) -> PushResult<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| PushError::Channel(e.to_string()))
    }

    async fn recv(&mut self) -> Option<PushResult<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!("skipping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(_)) => return None,
                // Control frames are answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => return Some(Err(PushError::Channel(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
