//! A throwaway WebSocket server on `127.0.0.1:0` for end-to-end tests of
//! `lib_realtime` against a real `tokio-tungstenite` stack.

use anyhow::{Context, Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use lib_realtime::Frame;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};

/// How long any single expectation may take before a test fails.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LoopbackServer {
    url: String,
    accepted: mpsc::UnboundedReceiver<ServerConn>,
}

/// The server side of one accepted connection.
pub struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl LoopbackServer {
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                match accept_async(stream).await {
                    Ok(ws) => {
                        log::debug!("Loopback accepted {}", peer);
                        if tx.send(ServerConn { ws }).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("Loopback handshake with {} failed: {}", peer, e),
                }
            }
        });

        Ok(Self {
            url: format!("ws://{addr}/ws"),
            accepted,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn accept(&mut self) -> Result<ServerConn> {
        timeout(STEP_TIMEOUT, self.accepted.recv())
            .await
            .context("no connection within timeout")?
            .ok_or_else(|| anyhow!("listener stopped"))
    }

    /// `true` if a connection arrives within `wait`.
    pub async fn accepts_within(&mut self, wait: Duration) -> bool {
        matches!(timeout(wait, self.accepted.recv()).await, Ok(Some(_)))
    }
}

impl ServerConn {
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.ws.send(Message::Text(frame.to_wire()?.into())).await?;
        Ok(())
    }

    /// Next message of any kind.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        match timeout(STEP_TIMEOUT, self.ws.next()).await.context("no message within timeout")? {
            Some(message) => Ok(Some(message?)),
            None => Ok(None),
        }
    }

    /// Next data frame, skipping control messages. `None` once the client closed.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.next_message().await? {
                Some(Message::Text(text)) => return Ok(Some(Frame::from_wire(text.as_str().as_bytes())?)),
                Some(Message::Close(_)) | None => return Ok(None),
                Some(_) => continue,
            }
        }
    }

    pub async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        self.ws
            .close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            }))
            .await?;
        Ok(())
    }

    /// Keeps reading (which answers pings) until the client goes away.
    pub async fn pump(mut self) {
        while let Some(Ok(message)) = self.ws.next().await {
            if message.is_close() {
                break;
            }
        }
    }
}
