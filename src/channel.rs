//! Data model of a two-party channel and the pure transitions between its
//! states.
//!
//! Everything in here is plain data without I/O: the commitment builder, the
//! store backends and the protocol runner all go through
//! [StateChannel::apply], so both parties and the store agree on what a
//! transition does.

mod app_instance;
mod free_balance;
mod state_channel;
mod withdrawal;

use crate::abiencode::{
    self,
    types::{Address, Hash, U256},
};
use thiserror::Error;

pub use app_instance::{AppInstance, OutcomeType};
pub use free_balance::{FreeBalance, FreeBalanceDelta};
pub use state_channel::{StateChannel, Transition, SCHEMA_VERSION};
pub use withdrawal::{Withdrawal, WithdrawalRecord};

#[cfg(test)]
pub(crate) use state_channel::tests as state_channel_tests;

/// Index of a participant in the channel.
///
/// `0` is the initiator of the Setup protocol.
pub type PartIdx = usize;

/// A channel participant: the public identifier used for addressing messages
/// and the address of the key it signs commitments with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub identifier: String,
    pub signer: Address,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("participant {participant} has insufficient funds in asset {asset}")]
    InsufficientFunds { asset: Address, participant: PartIdx },
    #[error("balance overflow in asset {0}")]
    BalanceOverflow(Address),
    #[error("app instance {0} is already installed or proposed")]
    AppExists(Hash),
    #[error("app instance {0} not installed")]
    AppNotFound(Hash),
    #[error("no pending proposal for app instance {0}")]
    ProposalNotFound(Hash),
    #[error("app sequence number {got} does not follow {expected}")]
    AppSeqNoMismatch { expected: u64, got: u64 },
    #[error("app instance {hash}: version {got} does not follow {current}")]
    VersionMismatch { hash: Hash, current: u64, got: u64 },
    #[error("withdrawal nonce {got}, expected {expected}")]
    WithdrawalNonceMismatch { expected: u64, got: u64 },
    #[error("app instance belongs to channel {0}")]
    WrongChannel(Hash),
    #[error(transparent)]
    Encoding(#[from] abiencode::Error),
}

/// Channel id derived from both public identifiers and a salt chosen by the
/// initiator.
pub fn channel_id(initiator: &str, responder: &str, salt: Hash) -> Result<Hash, ChannelError> {
    Ok(abiencode::to_hash(&(initiator, responder, salt))?)
}

/// Checked sum of two deposits, the collateral an app instance locks.
pub(crate) fn checked_total(asset: Address, amounts: [U256; 2]) -> Result<U256, ChannelError> {
    amounts[0]
        .checked_add(amounts[1])
        .ok_or(ChannelError::BalanceOverflow(asset))
}
