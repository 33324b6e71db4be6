use thiserror::Error;

/// Errors produced by the duo protocol layer.
#[derive(Debug, Error)]
pub enum DuoError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("missing required parameter: {0}")]
    MissingField(&'static str),

    #[error("invalid parameter {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("already in room {0}")]
    AlreadyInRoom(String),

    #[error("room {room_id} is full ({current}/{max})")]
    RoomFull {
        room_id: String,
        current: usize,
        max: usize,
    },

    #[error("delivery to connection {0} failed")]
    Delivery(u64),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for DuoError {
    fn from(e: serde_json::Error) -> Self {
        DuoError::Decode(e.to_string())
    }
}

impl DuoError {
    /// Whether this error only affects the current message (the connection
    /// stays open and receives an `error` reply).
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            DuoError::Decode(_)
                | DuoError::MissingField(_)
                | DuoError::InvalidField { .. }
                | DuoError::AlreadyInRoom(_)
                | DuoError::FrameTooLarge { .. }
        )
    }
}

pub type DuoResult<T> = Result<T, DuoError>;
