use crate::{
    abiencode::types::Hash,
    apps::AppError,
    channel::ChannelError,
    commitment::CommitmentError,
    lock::LockError,
    store::StoreError,
    wire::BusError,
};
use thiserror::Error;

/// Everything a protocol run can fail with. None of these leave the local
/// store partially updated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Malformed or unencodable input, found before anything was signed.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("invalid signature: {0}")]
    SignatureInvalid(String),
    #[error("stale version: caller expected {expected}, app is at {current}")]
    StaleVersion { expected: u64, current: u64 },
    /// Both parties hold signed states of the app, at versions that cannot
    /// be reconciled in this run.
    #[error("app instance {app} is at version {local} here but {remote} at the counterparty")]
    OutOfSync { app: Hash, local: u64, remote: u64 },
    #[error("no response from {0} in time")]
    CounterpartyTimeout(String),
    #[error(transparent)]
    InvalidLockKey(#[from] LockError),
    /// The store backend failed. A failed write changed nothing.
    #[error("store failure: {0}")]
    StoreWriteFailure(StoreError),
    #[error("channel {0} not found")]
    ChannelNotFound(Hash),
    #[error("app instance {0} not found")]
    AppNotFound(Hash),
    /// Another run held the channel for longer than this run was willing to
    /// wait.
    #[error("channel {0} is busy")]
    ChannelBusy(Hash),
    #[error("rejected by counterparty: {reason}")]
    Rejected { reason: String },
    #[error("transport: {0}")]
    Transport(#[from] BusError),
}

impl From<StoreError> for ProtocolError {
    fn from(e: StoreError) -> Self {
        Self::StoreWriteFailure(e)
    }
}

impl From<ChannelError> for ProtocolError {
    fn from(e: ChannelError) -> Self {
        Self::InvalidParameters(e.to_string())
    }
}

impl From<AppError> for ProtocolError {
    fn from(e: AppError) -> Self {
        Self::InvalidParameters(e.to_string())
    }
}

impl From<CommitmentError> for ProtocolError {
    fn from(e: CommitmentError) -> Self {
        Self::InvalidParameters(e.to_string())
    }
}
