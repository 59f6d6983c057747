//! WebSocket transport over `tokio-tungstenite`

use super::{Frame, FrameSink, Link, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<Link, TransportError> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(url = %url, "WebSocket opened");

        let (ws_sink, mut ws_stream) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel();

        // Spawn task to forward inbound frames until the socket closes
        let reader = tokio::spawn(async move {
            let mut code = None;
            while let Some(msg) = ws_stream.next().await {
                let frame = match msg {
                    Ok(Message::Text(text)) => Frame::Text(text),
                    Ok(Message::Binary(bytes)) => Frame::Binary(bytes),
                    Ok(Message::Close(close)) => {
                        code = close.map(|f| u16::from(f.code));
                        break;
                    }
                    // Pongs are answered by tungstenite itself
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "WebSocket read failed");
                        break;
                    }
                };
                if tx.send(TransportEvent::Frame(frame)).is_err() {
                    return;
                }
            }
            let _ = tx.send(TransportEvent::Closed { code });
        });

        Ok(Link {
            sink: Box::new(WebSocketSink {
                sink: ws_sink,
                reader,
            }),
            events: rx,
        })
    }
}

struct WebSocketSink {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: code.into(),
            reason: "".into(),
        };
        let result = self
            .sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Send(e.to_string()));
        self.reader.abort();
        result
    }
}

impl Drop for WebSocketSink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
