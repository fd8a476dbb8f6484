//! Error types for the session server.
//!
//! Only [`SessionError::is_connection_lost`] errors are recovered by the
//! session driver; everything else terminates the process.

use shared::protocol::ProtocolError;
use shared::Point;
use std::fmt;
use thiserror::Error;

/// Which half of a connection failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

impl fmt::Display for IoDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoDirection::Read => f.write_str("reading"),
            IoDirection::Write => f.write_str("writing"),
        }
    }
}

/// Seat label for diagnostics, `-` while a client has no seat yet.
fn seat_label(seat: &Option<usize>) -> String {
    seat.map_or_else(|| "-".to_string(), |seat| seat.to_string())
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("snake body must end with two axis-adjacent points, got {0:?}")]
    InvalidBody(Vec<Point>),
    #[error("no start layout for {0} players")]
    UnsupportedPlayers(usize),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection lost on seat {} while {op}: {reason}", seat_label(.seat))]
    ConnectionLost {
        seat: Option<usize>,
        op: IoDirection,
        reason: String,
    },
    #[error("seat {} sent {token:?}, which is not a direction", seat_label(.seat))]
    InvalidDirection { seat: Option<usize>, token: String },
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error(transparent)]
    Game(#[from] GameError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn lost(seat: Option<usize>, op: IoDirection, reason: impl fmt::Display) -> Self {
        SessionError::ConnectionLost {
            seat,
            op,
            reason: reason.to_string(),
        }
    }

    /// True for failures that only cost the session its current players.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            SessionError::ConnectionLost { .. } | SessionError::InvalidDirection { .. }
        )
    }
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        SessionError::ProtocolViolation(err.to_string())
    }
}
