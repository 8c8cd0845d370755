pub mod app;

pub mod events;

pub mod game;

pub mod ranking;

pub mod reducer;

pub mod snapshot;

pub mod units;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid ledger record: {0}")]
    Validation(#[from] ValidationError),

    #[error("transport request failed: {0}")]
    Transport(#[from] TransportError),

    /// An event stream could not be opened.
    #[error("could not open event stream: {0}")]
    Connection(String),
}

/// A raw record or payload that cannot be turned into a domain value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("game tuple has no id")]
    MissingId,

    #[error("board must have 9 cells, got {0}")]
    BoardLength(usize),

    #[error("fee {0}% is outside 0..=20")]
    FeeOutOfRange(u8),

    #[error("amount {0} cannot be represented exactly")]
    AmountOutOfRange(u128),

    #[error("cell index {0} is outside 0..9")]
    CellIndex(usize),
}

/// A request to the ledger node failed or was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("ledger node unavailable")]
    Unavailable,

    #[error("unknown game {0}")]
    UnknownGame(u64),

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// A single notification could not be decoded. The stream stays open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to decode notification: {0}")]
pub struct DeliveryError(pub String);
