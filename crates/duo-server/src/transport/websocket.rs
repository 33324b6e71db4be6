//! WebSocket listener using tokio-tungstenite.
//!
//! Every accepted socket completes its handshake in its own task; finished
//! connections are handed to the server loop over a channel.

use duo_core::{DuoError, DuoResult};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// Start the WebSocket listener.
///
/// Returns the bound local address and a receiver that yields accepted
/// connections.
pub async fn start_listener(
    bind_addr: SocketAddr,
) -> DuoResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| DuoError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
            if tx.is_closed() {
                debug!("WebSocket listener stopping");
                break;
            }
        }
    });

    Ok((local_addr, rx))
}

/// Helper: send a text message over a WebSocket.
pub async fn ws_send_text(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    text: String,
) -> DuoResult<()> {
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| DuoError::Transport(format!("WS send failed: {e}")))
}

/// Helper: receive the payload of the next data frame from a WebSocket.
///
/// Text and binary frames both yield their raw bytes. Returns `None` once the
/// peer closes. Frames larger than `max_frame_size` are reported as
/// [`DuoError::FrameTooLarge`] and leave the stream usable.
pub async fn ws_recv_frame(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    max_frame_size: usize,
) -> DuoResult<Option<Vec<u8>>> {
    loop {
        let data = match ws.next().await {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(data))) => data.to_vec(),
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(Message::Ping(payload))) => {
                // Respond to pings automatically
                let _ = ws.send(Message::Pong(payload)).await;
                continue;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(DuoError::Transport(format!("WS recv failed: {e}")));
            }
            None => return Ok(None),
        };

        if data.len() > max_frame_size {
            return Err(DuoError::FrameTooLarge {
                size: data.len(),
                max: max_frame_size,
            });
        }
        return Ok(Some(data));
    }
}
