//! Core server: accepts WebSocket connections and runs one handler per
//! connection against the shared [`SessionRegistry`].

use crate::config::ServerConfig;
use crate::session::{ConnId, ConnectionHandle, Dispatch, SessionRegistry};
use crate::transport::websocket::{self, WebSocketConnection};
use duo_core::{decode_message, encode_message, DuoResult, ServerMessage};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected, not yet seated in a room.
    Open,
    /// Seated after a successful create or join.
    Joined,
    /// Loop finished; cleanup has run.
    Closed,
}

impl ConnectionState {
    /// State after a dispatch outcome.
    pub fn after(self, outcome: Dispatch) -> Self {
        match (self, outcome) {
            (ConnectionState::Open, Dispatch::Created { .. } | Dispatch::Joined { .. }) => {
                ConnectionState::Joined
            }
            (state, _) => state,
        }
    }
}

/// The duo server instance.
pub struct RoomServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    /// Monotonic connection ID counter.
    next_conn_id: AtomicU64,
}

/// A server whose listener is bound and ready to accept.
pub struct BoundServer {
    server: Arc<RoomServer>,
    local_addr: SocketAddr,
    ws_rx: mpsc::Receiver<WebSocketConnection>,
}

impl RoomServer {
    /// Create a new server instance.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Shared room registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Bind the WebSocket listener.
    pub async fn bind(self) -> DuoResult<BoundServer> {
        let bind_addr = self.config.bind_addr()?;
        let (local_addr, ws_rx) = websocket::start_listener(bind_addr).await?;
        Ok(BoundServer {
            server: Arc::new(self),
            local_addr,
            ws_rx,
        })
    }

    /// Bind and accept connections until the listener closes.
    pub async fn run(self) -> DuoResult<()> {
        self.bind().await?.serve().await
    }

    /// Handle one WebSocket connection from open to close.
    async fn handle_websocket(&self, mut conn: WebSocketConnection) -> DuoResult<()> {
        let remote = conn.remote_addr;
        let conn_id = ConnId(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
        info!(remote = %remote, conn_id = %conn_id, "connection opened");

        let (tx, rx) = mpsc::channel(self.config.outbound_queue);
        let handle = ConnectionHandle::new(conn_id, tx);
        let release = CleanupGuard::new(self.registry.clone(), conn_id);

        let result = self.connection_loop(&mut conn, &handle, rx).await;
        release.run().await;

        info!(remote = %remote, conn_id = %conn_id, state = ?ConnectionState::Closed, "connection closed");
        result
    }

    /// Per-connection message loop.
    ///
    /// Queued outbound messages are flushed before the next inbound frame is
    /// read, so each connection sees messages in the order they were produced.
    /// An undeliverable error reply, or a peer finding this queue full, ends
    /// the loop; the caller's cleanup then treats it as a disconnect.
    async fn connection_loop(
        &self,
        conn: &mut WebSocketConnection,
        handle: &ConnectionHandle,
        mut outbound: mpsc::Receiver<ServerMessage>,
    ) -> DuoResult<()> {
        let mut state = ConnectionState::Open;

        loop {
            tokio::select! {
                biased;

                Some(msg) = outbound.recv() => {
                    let text = encode_message(&msg)?;
                    // A client that stops reading parks this write on TCP backpressure.
                    tokio::select! {
                        sent = websocket::ws_send_text(&mut conn.ws_stream, text) => sent?,
                        _ = handle.evicted() => {
                            warn!(conn_id = %handle.id(), "outbound queue full, closing stuck reader");
                            break;
                        }
                    }
                }

                _ = handle.evicted() => {
                    warn!(conn_id = %handle.id(), "outbound queue full, closing stuck reader");
                    break;
                }

                frame = websocket::ws_recv_frame(&mut conn.ws_stream, self.config.max_frame_size) => {
                    match frame {
                        Ok(Some(data)) => match decode_message(&data) {
                            Ok(value) => {
                                let outcome = self.registry.dispatch(handle, value).await;
                                let next = state.after(outcome);
                                if next != state {
                                    debug!(conn_id = %handle.id(), from = ?state, to = ?next, "connection state changed");
                                    state = next;
                                }
                            }
                            Err(e) => {
                                warn!(conn_id = %handle.id(), error = %e, "invalid message");
                                if handle.send(ServerMessage::from_error(&e)).is_err() {
                                    break;
                                }
                            }
                        },
                        Ok(None) => {
                            debug!(conn_id = %handle.id(), "WebSocket session ended (peer closed)");
                            break;
                        }
                        Err(e) if e.is_per_message() => {
                            warn!(conn_id = %handle.id(), error = %e, "rejected frame");
                            if handle.send(ServerMessage::from_error(&e)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(conn_id = %handle.id(), error = %e, "WebSocket session ended");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl BoundServer {
    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared room registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.server.registry()
    }

    /// Accept connections until the listener closes.
    pub async fn serve(mut self) -> DuoResult<()> {
        info!(addr = %self.local_addr, "duo-server ready");

        while let Some(ws_conn) = self.ws_rx.recv().await {
            let srv = self.server.clone();
            tokio::spawn(async move {
                if let Err(e) = srv.handle_websocket(ws_conn).await {
                    warn!(error = %e, "WebSocket connection error");
                }
            });
        }

        info!("listener closed, shutting down");
        Ok(())
    }
}

/// Runs registry cleanup for a connection exactly once.
///
/// [`CleanupGuard::run`] is the normal path. If the handler is torn down
/// before reaching it (panic, runtime shutdown), `Drop` schedules the same
/// cleanup on the runtime instead.
struct CleanupGuard {
    registry: Arc<SessionRegistry>,
    conn: ConnId,
    armed: bool,
}

impl CleanupGuard {
    fn new(registry: Arc<SessionRegistry>, conn: ConnId) -> Self {
        Self {
            registry,
            conn,
            armed: true,
        }
    }

    async fn run(mut self) {
        self.registry.cleanup(self.conn).await;
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let registry = self.registry.clone();
            let conn = self.conn;
            runtime.spawn(async move {
                registry.cleanup(conn).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_moves_to_joined_once() {
        let state = ConnectionState::Open;
        assert_eq!(state.after(Dispatch::Rejected), ConnectionState::Open);
        assert_eq!(state.after(Dispatch::Full), ConnectionState::Open);
        let state = state.after(Dispatch::Created { player: 1 });
        assert_eq!(state, ConnectionState::Joined);
        assert_eq!(state.after(Dispatch::Relayed { recipients: 1 }), ConnectionState::Joined);
    }

    #[tokio::test]
    async fn dropped_guard_still_cleans_up() {
        let registry = Arc::new(SessionRegistry::new());
        let (tx, _rx) = mpsc::channel(8);
        let handle = ConnectionHandle::new(ConnId(1), tx);
        registry.dispatch(&handle, json!({ "room_id": "r1" })).await;

        drop(CleanupGuard::new(registry.clone(), ConnId(1)));

        for _ in 0..100 {
            if registry.room_count().await == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.room_count().await, 0);
        assert_eq!(registry.room_of(ConnId(1)).await, None);
    }

    #[tokio::test]
    async fn released_guard_cleans_up_inline() {
        let registry = Arc::new(SessionRegistry::new());
        let (tx, _rx) = mpsc::channel(8);
        let handle = ConnectionHandle::new(ConnId(1), tx);
        registry.dispatch(&handle, json!({ "room_id": "r1" })).await;

        CleanupGuard::new(registry.clone(), ConnId(1)).run().await;
        assert_eq!(registry.room_count().await, 0);
    }
}
