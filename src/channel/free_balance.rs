use super::{ChannelError, PartIdx};
use crate::abiencode::{
    self,
    types::{Address, Hash, U256},
};
use std::collections::BTreeMap;

/// The always-installed app tracking each participant's unencumbered balance
/// per asset, in channel participant order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeBalance {
    pub identity_hash: Hash,
    /// Bumped by one on every change.
    pub version: u64,
    pub balances: BTreeMap<Address, [U256; 2]>,
}

/// Change of a single asset's free balance. Credits are applied before
/// debits, so a delta never fails because of its own ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBalanceDelta {
    pub asset: Address,
    pub debits: [U256; 2],
    pub credits: [U256; 2],
}

impl FreeBalanceDelta {
    pub fn debit(asset: Address, debits: [U256; 2]) -> Self {
        Self {
            asset,
            debits,
            credits: [U256::zero(); 2],
        }
    }

    pub fn credit(asset: Address, credits: [U256; 2]) -> Self {
        Self {
            asset,
            debits: [U256::zero(); 2],
            credits,
        }
    }
}

impl FreeBalance {
    pub fn new(channel_id: Hash, deposits: BTreeMap<Address, [U256; 2]>) -> Result<Self, ChannelError> {
        Ok(Self {
            identity_hash: abiencode::to_hash(&(channel_id, "free-balance"))?,
            version: 0,
            balances: deposits,
        })
    }

    pub fn balance(&self, asset: Address, idx: PartIdx) -> U256 {
        self.balances
            .get(&asset)
            .map(|b| b[idx])
            .unwrap_or_default()
    }

    /// Applies `delta` and bumps the version. On error `self` is unchanged.
    pub fn apply(&mut self, delta: &FreeBalanceDelta) -> Result<(), ChannelError> {
        let current = self.balances.get(&delta.asset).copied().unwrap_or_default();
        let mut next = current;
        for idx in 0..2 {
            next[idx] = current[idx]
                .checked_add(delta.credits[idx])
                .ok_or(ChannelError::BalanceOverflow(delta.asset))?
                .checked_sub(delta.debits[idx])
                .ok_or(ChannelError::InsufficientFunds {
                    asset: delta.asset,
                    participant: idx,
                })?;
        }
        self.balances.insert(delta.asset, next);
        self.version += 1;
        Ok(())
    }

    /// Hash of `(address[] assets, uint256[2][] balances, bytes32[] activeApps)`.
    pub fn state_hash(&self, active_apps: &[Hash]) -> Result<Hash, ChannelError> {
        let assets: Vec<Address> = self.balances.keys().copied().collect();
        let balances: Vec<[U256; 2]> = self.balances.values().copied().collect();
        Ok(abiencode::to_hash(&(assets, balances, active_apps))?)
    }
}
