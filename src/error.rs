//! Error kinds surfaced by the engine.
//!
//! Every error is `Clone` so it can be carried in the status channel.

use thiserror::Error;

/// Rejected input at construction time. No network call has been made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid symbol {0:?}, expected something like BTCUSDT")]
    InvalidSymbol(String),
}

/// Failure to obtain a depth snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot request failed: {0}")]
    Network(String),

    #[error("snapshot request returned status {0}")]
    Status(u16),

    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

/// Transport level failure of the depth stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed")]
    Closed,

    #[error("resync failed: {0}")]
    Resync(SnapshotError),

    #[error("snapshot does not line up with the update stream")]
    OutOfSync,
}

/// A single inbound frame could not be decoded. The frame is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed depth message: {0}")]
pub struct MessageParseError(pub String);

impl From<serde_json::Error> for MessageParseError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Terminal. The engine has to be started again.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl EngineError {
    /// True for errors after which the engine will not recover on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. })
    }
}
