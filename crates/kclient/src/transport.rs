//
// transport.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Transport trait and the websocket implementation used to reach a kernel.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use kshared::wire_codec::WireFrame;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Something that happened on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A frame arrived from the peer.
    Message(WireFrame),

    /// The connection closed. `was_clean` is false when the connection
    /// dropped without a completed closing handshake.
    Closed { was_clean: bool },

    /// The connection failed. No further events follow for it.
    Error(String),
}

/// Error type for transport operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Failed to connect to {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    #[error("Websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// A duplex, message-oriented connection to the kernel.
///
/// One connection is open at a time; `open` replaces any existing one.
#[async_trait]
pub trait Transport: Send + fmt::Debug {
    /// Open a connection to `url`, resolving once it is open.
    async fn open(&mut self, url: &str) -> Result<(), TransportError>;

    /// Whether a connection is currently open.
    fn is_open(&self) -> bool;

    /// Send a frame. Fails with [`TransportError::NotConnected`] if no
    /// connection is open.
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError>;

    /// Close the connection, if one is open. No events are delivered for a
    /// connection after it has been closed locally.
    async fn close(&mut self);

    /// Wait for the next event on the open connection. Pends forever while
    /// no connection is open.
    async fn next_event(&mut self) -> TransportEvent;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A [`Transport`] over a websocket, as served by the Jupyter server's
/// `/api/kernels/{id}/channels` endpoint.
#[derive(Default)]
pub struct WebsocketTransport {
    url: Option<String>,
    writer: Option<SplitSink<WsStream, Message>>,
    reader: Option<SplitStream<WsStream>>,
}

impl fmt::Debug for WebsocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebsocketTransport")
            .field("url", &self.url)
            .field("open", &self.is_open())
            .finish()
    }
}

impl WebsocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn teardown(&mut self) {
        self.writer = None;
        self.reader = None;
    }
}

#[async_trait]
impl Transport for WebsocketTransport {
    async fn open(&mut self, url: &str) -> Result<(), TransportError> {
        self.close().await;
        log::info!("Connecting to {}", url);
        let (ws_stream, _) =
            connect_async(url)
                .await
                .map_err(|e| TransportError::ConnectFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
        log::info!("WebSocket handshake has been successfully completed");
        let (writer, reader) = ws_stream.split();
        self.url = Some(url.to_string());
        self.writer = Some(writer);
        self.reader = Some(reader);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        let message = match frame {
            WireFrame::Text(text) => Message::Text(text),
            WireFrame::Binary(data) => Message::Binary(data.to_vec()),
        };
        writer.send(message).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.send(Message::Close(None)).await {
                log::debug!("Failed to send close frame: {}", e);
            }
            if let Err(e) = writer.close().await {
                log::debug!("Failed to close websocket: {}", e);
            }
        }
        self.reader = None;
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            let next = match self.reader.as_mut() {
                Some(reader) => reader.next().await,
                None => return futures::future::pending().await,
            };
            match next {
                Some(Ok(Message::Text(text))) => {
                    return TransportEvent::Message(WireFrame::Text(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    return TransportEvent::Message(WireFrame::Binary(Bytes::from(data)));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    let was_clean = frame
                        .as_ref()
                        .map_or(true, |f| matches!(f.code, CloseCode::Normal | CloseCode::Away));
                    log::debug!("Websocket closed by peer: {:?}", frame);
                    self.teardown();
                    return TransportEvent::Closed { was_clean };
                }
                Some(Err(e)) => {
                    log::error!("Failed to read data from websocket: {}", e);
                    self.teardown();
                    return TransportEvent::Error(e.to_string());
                }
                None => {
                    log::info!("No data from websocket; closing");
                    self.teardown();
                    return TransportEvent::Closed { was_clean: false };
                }
            }
        }
    }
}
