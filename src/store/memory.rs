use super::{ChannelStore, StoreError};
use crate::{
    abiencode::types::{Address, Hash},
    channel::{AppInstance, FreeBalanceDelta, StateChannel, Transition, WithdrawalRecord, SCHEMA_VERSION},
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::time::{sleep, Duration};

#[derive(Debug, Default)]
struct Inner {
    channels: HashMap<Hash, StateChannel>,
    /// app identity hash (installed or proposed) -> channel id
    apps: HashMap<Hash, Hash>,
}

impl Inner {
    fn channel_of_app(&self, app_identity_hash: &Hash) -> Option<&StateChannel> {
        self.apps
            .get(app_identity_hash)
            .and_then(|id| self.channels.get(id))
    }

    fn replace(&mut self, channel: StateChannel) {
        let id = channel.id;
        self.apps.retain(|_, channel_id| *channel_id != id);
        for hash in channel
            .app_instances
            .keys()
            .chain(channel.proposed_app_instances.keys())
        {
            self.apps.insert(*hash, id);
        }
        self.channels.insert(id, channel);
    }
}

/// Reference backend keeping everything in memory.
///
/// Each write computes the complete next record from a copy and swaps it in
/// under the write lock, so a failing write never leaves a partial update.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    fail_writes: AtomicBool,
    read_delay: Mutex<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail with [StoreError::WriteFailed] until
    /// reset, for exercising the failure paths of callers.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every following [ChannelStore::get_channel] take `delay` before
    /// answering, for slow backends.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::WriteFailed("backend unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn apply(&self, channel_id: Hash, transition: Transition) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.inner.write();
        let next = inner
            .channels
            .get(&channel_id)
            .ok_or(StoreError::ChannelNotFound(channel_id))?
            .apply(&transition)?;
        inner.replace(next);
        Ok(())
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn get_schema_version(&self) -> Result<u32, StoreError> {
        Ok(SCHEMA_VERSION)
    }

    async fn get_channel(&self, channel_id: Hash) -> Result<Option<StateChannel>, StoreError> {
        let delay = *self.read_delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        Ok(self.inner.read().channels.get(&channel_id).cloned())
    }

    async fn get_channel_by_app_identity_hash(
        &self,
        app_identity_hash: Hash,
    ) -> Result<Option<StateChannel>, StoreError> {
        Ok(self.inner.read().channel_of_app(&app_identity_hash).cloned())
    }

    async fn get_app_instance(
        &self,
        app_identity_hash: Hash,
    ) -> Result<Option<AppInstance>, StoreError> {
        Ok(self
            .inner
            .read()
            .channel_of_app(&app_identity_hash)
            .and_then(|c| c.app(&app_identity_hash))
            .cloned())
    }

    async fn get_app_proposal(
        &self,
        app_identity_hash: Hash,
    ) -> Result<Option<AppInstance>, StoreError> {
        Ok(self
            .inner
            .read()
            .channel_of_app(&app_identity_hash)
            .and_then(|c| c.proposal(&app_identity_hash))
            .cloned())
    }

    async fn create_channel(&self, channel: StateChannel) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.inner.write();
        if inner.channels.contains_key(&channel.id) {
            return Err(StoreError::ChannelExists(channel.id));
        }
        inner.replace(channel);
        Ok(())
    }

    async fn save_app_proposal(
        &self,
        channel_id: Hash,
        proposal: AppInstance,
    ) -> Result<(), StoreError> {
        self.apply(channel_id, Transition::Propose(proposal))
    }

    async fn remove_app_proposal(
        &self,
        channel_id: Hash,
        app_identity_hash: Hash,
    ) -> Result<(), StoreError> {
        self.apply(channel_id, Transition::RejectProposal(app_identity_hash))
    }

    async fn update_channel_with_app_instance(
        &self,
        channel_id: Hash,
        app: AppInstance,
        free_balance_delta: FreeBalanceDelta,
    ) -> Result<(), StoreError> {
        self.apply(
            channel_id,
            Transition::Install {
                app,
                delta: free_balance_delta,
            },
        )
    }

    async fn update_app_instance(
        &self,
        channel_id: Hash,
        app: AppInstance,
    ) -> Result<(), StoreError> {
        self.apply(channel_id, Transition::SetState(app))
    }

    async fn remove_app_instance(
        &self,
        channel_id: Hash,
        app_identity_hash: Hash,
        free_balance_delta: FreeBalanceDelta,
    ) -> Result<(), StoreError> {
        self.apply(
            channel_id,
            Transition::Uninstall {
                app_identity_hash,
                delta: free_balance_delta,
            },
        )
    }

    async fn save_withdrawal(
        &self,
        channel_id: Hash,
        record: WithdrawalRecord,
        free_balance_delta: FreeBalanceDelta,
    ) -> Result<(), StoreError> {
        self.apply(
            channel_id,
            Transition::Withdraw {
                record,
                delta: free_balance_delta,
            },
        )
    }

    async fn set_active_collateralization(
        &self,
        channel_id: Hash,
        asset: Address,
        active: bool,
    ) -> Result<(), StoreError> {
        self.apply(channel_id, Transition::SetCollateralization { asset, active })
    }
}
