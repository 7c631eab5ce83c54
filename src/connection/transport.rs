//! Transport seam between the connection manager and the socket
//!
//! The manager only needs to open a link, push text frames and be told
//! when frames arrive or the link dies. [`WsConnector`] provides that over
//! a WebSocket; tests plug in an in-memory connector instead.

use async_trait::async_trait;
use futures_util::stream::{BoxStream, SplitSink};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};

/// Inbound transport signal
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    /// Peer closed the link, with the close reason when one was given
    Closed(Option<String>),
}

/// Inbound frames, ending with `Closed`, an error or end of stream
pub type FrameStream = BoxStream<'static, Result<Frame>>;

/// Write half of an open link
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// An open link split into its two halves
pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub stream: FrameStream,
}

/// Opens links to the device
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Url) -> Result<Link>;
}

// ─────────────────────────────────────────────────────────────────
// WebSocket Transport
// ─────────────────────────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Link> {
        let (ws_stream, _response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| Error::connection_failed(endpoint.as_str(), e.to_string()))?;

        debug!(endpoint = %endpoint, "WebSocket handshake complete");

        let (write, read) = ws_stream.split();
        let stream = read.filter_map(|item| async move { translate(item) }).boxed();

        Ok(Link {
            sink: Box::new(WsSink { write }),
            stream,
        })
    }
}

fn translate(item: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>) -> Option<Result<Frame>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
        Ok(Message::Binary(data)) => match String::from_utf8(data) {
            Ok(text) => Some(Ok(Frame::Text(text))),
            Err(_) => Some(Err(Error::malformed("binary frame is not UTF-8"))),
        },
        Ok(Message::Close(frame)) => {
            Some(Ok(Frame::Closed(frame.map(|f| f.reason.into_owned()))))
        }
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
            trace!("Control frame");
            None
        }
        Err(e) => Some(Err(Error::WebSocket(e))),
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.write.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.write.send(Message::Close(None)).await?;
        self.write.close().await?;
        Ok(())
    }
}
