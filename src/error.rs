//! Hub error types.
//!
//! Every failure here is scoped to one message or one connection. The
//! connection boundary logs them; none of them ends the process.

use thiserror::Error;

/// A frame or payload that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unsupported message: {0}")]
    Unsupported(String),

    #[error("invalid presence state json for client {client_id}: {reason}")]
    InvalidJson { client_id: u64, reason: String },
}

impl From<yrs::encoding::read::Error> for DecodeError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        DecodeError::Malformed(e.to_string())
    }
}

/// Errors raised while handling a connection.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("merge error: {0}")]
    Merge(String),

    #[error("presence error: {0}")]
    Presence(String),

    #[error("failed to observe document: {0}")]
    Observe(String),

    #[error("send error: {0}")]
    Send(String),

    #[error("room {room} is full ({limit} connections)")]
    RoomFull { room: String, limit: usize },
}

impl HubError {
    /// WebSocket close code sent to a peer refused with this error.
    pub fn close_code(&self) -> u16 {
        match self {
            HubError::RoomFull { .. } => 1013,
            _ => 1011,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_converts() {
        let err: HubError = DecodeError::Unsupported("auth".to_string()).into();
        assert!(matches!(err, HubError::Decode(DecodeError::Unsupported(_))));
        assert_eq!(err.to_string(), "decode error: unsupported message: auth");
    }

    #[test]
    fn test_read_error_is_malformed() {
        let err = DecodeError::from(yrs::encoding::read::Error::UnexpectedValue);
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_room_full_close_code() {
        let err = HubError::RoomFull {
            room: "doc-42".to_string(),
            limit: 2,
        };
        assert_eq!(err.close_code(), 1013);
        assert_eq!(err.to_string(), "room doc-42 is full (2 connections)");
        assert_eq!(HubError::Merge("bad".into()).close_code(), 1011);
    }
}
