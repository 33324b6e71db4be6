//! Room membership and message routing.
//!
//! A connection is identified by a server-assigned [`ConnId`]; the transport
//! side of it is reached through a [`ConnectionHandle`], which only queues
//! messages for that connection's writer task.

pub mod registry;
pub mod room;

pub use registry::{Dispatch, SessionRegistry};
pub use room::Room;

use duo_core::{DuoError, DuoResult, ServerMessage};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

/// Default outbound queue capacity per connection.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Opaque identifier of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Send capability for one connection.
///
/// Cloning is cheap; every clone feeds the same bounded outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnId,
    tx: mpsc::Sender<ServerMessage>,
    evicted: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(id: ConnId, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            tx,
            evicted: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Queue a message for this connection.
    ///
    /// Never blocks. A full queue means the client stopped reading; it is
    /// treated the same as a closed connection and the writer is told to
    /// give up via [`ConnectionHandle::evicted`].
    pub fn send(&self, msg: ServerMessage) -> DuoResult<()> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.evicted.notify_one();
                Err(DuoError::Delivery(self.id.0))
            }
            Err(TrySendError::Closed(_)) => Err(DuoError::Delivery(self.id.0)),
        }
    }

    /// Resolves once a send to this connection found its queue full.
    pub async fn evicted(&self) {
        self.evicted.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_queue_is_a_delivery_failure() {
        let (tx, rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new(ConnId(3), tx);
        drop(rx);
        let err = handle.send(ServerMessage::success("ok")).unwrap_err();
        assert!(matches!(err, DuoError::Delivery(3)));
    }

    #[tokio::test]
    async fn full_queue_fails_and_evicts() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(ConnId(5), tx);
        handle.send(ServerMessage::success("first")).unwrap();

        let err = handle.send(ServerMessage::success("second")).unwrap_err();
        assert!(matches!(err, DuoError::Delivery(5)));

        tokio::time::timeout(std::time::Duration::from_secs(1), handle.evicted())
            .await
            .expect("eviction not signalled");
        assert_eq!(rx.recv().await.unwrap().message, "first");
    }
}
