//! duo-server: pairs up to two WebSocket participants per named room and
//! relays their messages.

pub mod config;
pub mod server;
pub mod session;
pub mod transport;

pub use config::ServerConfig;
pub use server::{BoundServer, ConnectionState, RoomServer};
pub use session::{ConnId, ConnectionHandle, Dispatch, SessionRegistry};
