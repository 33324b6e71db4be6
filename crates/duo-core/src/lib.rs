//! duo-core: Shared protocol library for the duo room relay.
//!
//! Provides the JSON wire envelopes exchanged with participants, the text
//! codec, and the error taxonomy shared by the server.

pub mod codec;
pub mod error;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{decode_message, encode_message, room_id_of};
pub use error::{DuoError, DuoResult};
pub use messages::{ServerMessage, Status, DEFAULT_HOST, DEFAULT_PORT, MAX_PLAYERS};
