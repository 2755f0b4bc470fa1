//! # WebSocket Transport
//!
//! Opens `ws://` / `wss://` connections with `tokio-tungstenite` and bridges
//! the split stream to a [`Link`] through two pump tasks:
//!
//! - the **writer** drains the link's outbound channel into the sink and closes
//!   the socket when the channel is dropped or a close message is written;
//! - the **reader** forwards socket messages as [`WireEvent`]s until the stream
//!   ends, the manager drops the link, or the writer finishes.
//!
//! Both tasks share a `CancellationToken`, so a half-open socket whose read side
//! never returns is still torn down once the manager lets go of the link.

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::TransportError;
use crate::transport::{close_code, Link, Transport, WireEvent, WireMessage};

#[derive(Debug, Clone, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for TungsteniteTransport {
    fn open(&self, url: &Url) -> BoxFuture<'static, Result<Link, TransportError>> {
        let url = url.clone();
        async move {
            match url.scheme() {
                "ws" | "wss" => {}
                other => {
                    return Err(TransportError::InvalidEndpoint(format!(
                        "unsupported scheme `{other}` in {url}, expected ws or wss"
                    )))
                }
            }

            log::info!("Connecting to {}", url);
            let (ws_stream, response) = connect_async(url.as_str()).await?;
            log::debug!("Handshake with {} completed ({})", url, response.status());

            let (mut write, mut read) = ws_stream.split();
            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireMessage>();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<WireEvent>();
            let shutdown = CancellationToken::new();

            let writer_shutdown = shutdown.clone();
            tokio::spawn(async move {
                while let Some(message) = outbound_rx.recv().await {
                    let closing = matches!(message, WireMessage::Close { .. });
                    if let Err(e) = write.send(to_ws(message)).await {
                        log::warn!("WebSocket write failed: {}", e);
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                let _ = write.close().await;
                writer_shutdown.cancel();
            });

            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = inbound_tx.closed() => break,
                        next = read.next() => next,
                    };
                    let (event, last) = match next {
                        Some(Ok(WsMessage::Text(text))) => (WireEvent::Text(text.as_str().to_string()), false),
                        Some(Ok(WsMessage::Binary(bytes))) => (WireEvent::Binary(bytes.to_vec()), false),
                        Some(Ok(WsMessage::Ping(_))) => (WireEvent::Ping, false),
                        Some(Ok(WsMessage::Pong(_))) => (WireEvent::Pong, false),
                        Some(Ok(WsMessage::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                                .unwrap_or((close_code::ABNORMAL, "closed without status".to_string()));
                            (WireEvent::Closed { code, reason }, true)
                        }
                        Some(Ok(WsMessage::Frame(_))) => continue,
                        Some(Err(e)) => (WireEvent::Error(e.to_string()), true),
                        None => (
                            WireEvent::Closed {
                                code: close_code::ABNORMAL,
                                reason: "stream ended".to_string(),
                            },
                            true,
                        ),
                    };
                    if inbound_tx.send(event).is_err() || last {
                        break;
                    }
                }
                shutdown.cancel();
            });

            Ok(Link {
                outbound: outbound_tx,
                inbound: inbound_rx,
            })
        }
        .boxed()
    }
}

fn to_ws(message: WireMessage) -> WsMessage {
    match message {
        WireMessage::Text(text) => WsMessage::Text(text.into()),
        WireMessage::Ping(payload) => WsMessage::Ping(payload.into()),
        WireMessage::Close { code, reason } => WsMessage::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_websocket_schemes() {
        let url = Url::parse("http://127.0.0.1:1/feed").unwrap();
        let err = TungsteniteTransport::new().open(&url).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidEndpoint(_)));
    }

    #[test]
    fn close_messages_keep_their_code() {
        match to_ws(WireMessage::Close {
            code: close_code::HEARTBEAT_TIMEOUT,
            reason: "heartbeat timeout".into(),
        }) {
            WsMessage::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), close_code::HEARTBEAT_TIMEOUT);
                assert_eq!(frame.reason.as_str(), "heartbeat timeout");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
