use super::PartIdx;
use crate::abiencode::types::{Address, Signature, U256};

/// Authorizes moving `amount` of `asset` from a participant's free balance to
/// an on-chain `recipient`. Submitting the transaction is up to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Withdrawal {
    pub participant: PartIdx,
    pub asset: Address,
    pub amount: U256,
    pub recipient: Address,
    /// Number of withdrawals committed before this one.
    pub nonce: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalRecord {
    pub withdrawal: Withdrawal,
    /// In channel participant order, `None` until both parties signed.
    pub signatures: Option<[Signature; 2]>,
}
