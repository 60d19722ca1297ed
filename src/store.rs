//! Channel Store contract.
//!
//! Backends persist one [StateChannel] record per channel id. Every write is
//! atomic: install, uninstall and withdraw touch both the free balance and the
//! app set, and either both changes land or neither does. Callers serialize
//! writes per channel through the lock service, backends only have to provide
//! durability and per-call atomicity.

mod memory;

use crate::{
    abiencode::types::{Address, Hash},
    channel::{AppInstance, ChannelError, FreeBalanceDelta, StateChannel, WithdrawalRecord},
};
use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("channel {0} not found")]
    ChannelNotFound(Hash),
    #[error("channel {0} already exists")]
    ChannelExists(Hash),
    #[error("app instance {0} not found")]
    AppNotFound(Hash),
    /// The write did not reach the backend. Nothing was changed.
    #[error("write failed: {0}")]
    WriteFailed(String),
    /// The write would violate a channel invariant. Nothing was changed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Layout version of the records this backend holds.
    async fn get_schema_version(&self) -> Result<u32, StoreError>;

    async fn get_channel(&self, channel_id: Hash) -> Result<Option<StateChannel>, StoreError>;

    /// The channel holding the installed or proposed app `app_identity_hash`.
    async fn get_channel_by_app_identity_hash(
        &self,
        app_identity_hash: Hash,
    ) -> Result<Option<StateChannel>, StoreError>;

    async fn get_app_instance(
        &self,
        app_identity_hash: Hash,
    ) -> Result<Option<AppInstance>, StoreError>;

    async fn get_app_proposal(
        &self,
        app_identity_hash: Hash,
    ) -> Result<Option<AppInstance>, StoreError>;

    /// Fails with [StoreError::ChannelExists] if the id is taken.
    async fn create_channel(&self, channel: StateChannel) -> Result<(), StoreError>;

    /// Stores a proposal and bumps `numProposedApps` to its sequence number.
    async fn save_app_proposal(
        &self,
        channel_id: Hash,
        proposal: AppInstance,
    ) -> Result<(), StoreError>;

    async fn remove_app_proposal(
        &self,
        channel_id: Hash,
        app_identity_hash: Hash,
    ) -> Result<(), StoreError>;

    /// Installs a proposed app and applies the collateral debit, atomically.
    async fn update_channel_with_app_instance(
        &self,
        channel_id: Hash,
        app: AppInstance,
        free_balance_delta: FreeBalanceDelta,
    ) -> Result<(), StoreError>;

    /// Replaces an installed app with its next version.
    async fn update_app_instance(&self, channel_id: Hash, app: AppInstance)
        -> Result<(), StoreError>;

    /// Removes an installed app and applies the outcome credit, atomically.
    async fn remove_app_instance(
        &self,
        channel_id: Hash,
        app_identity_hash: Hash,
        free_balance_delta: FreeBalanceDelta,
    ) -> Result<(), StoreError>;

    /// Records a signed withdrawal and applies its debit, atomically.
    async fn save_withdrawal(
        &self,
        channel_id: Hash,
        record: WithdrawalRecord,
        free_balance_delta: FreeBalanceDelta,
    ) -> Result<(), StoreError>;

    async fn set_active_collateralization(
        &self,
        channel_id: Hash,
        asset: Address,
        active: bool,
    ) -> Result<(), StoreError>;
}
