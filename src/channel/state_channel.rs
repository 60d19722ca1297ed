use super::{
    AppInstance, ChannelError, FreeBalance, FreeBalanceDelta, PartIdx, Participant,
    WithdrawalRecord,
};
use crate::abiencode::types::{Address, Hash, U256};
use std::collections::BTreeMap;

/// Version of the channel record layout written by this crate.
pub const SCHEMA_VERSION: u32 = 1;

/// The channel record as kept in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChannel {
    pub id: Hash,
    /// `[initiator, responder]` of the Setup protocol.
    pub participants: [Participant; 2],
    pub free_balance: FreeBalance,
    pub app_instances: BTreeMap<Hash, AppInstance>,
    pub proposed_app_instances: BTreeMap<Hash, AppInstance>,
    /// Only ever increases, also when proposals are rejected.
    pub num_proposed_apps: u64,
    pub schema_version: u32,
    pub active_collateralizations: BTreeMap<Address, bool>,
    pub withdrawals: Vec<WithdrawalRecord>,
}

/// A change to a channel record. Applied with [StateChannel::apply].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The freshly created channel itself.
    Setup,
    Propose(AppInstance),
    RejectProposal(Hash),
    Install {
        app: AppInstance,
        delta: FreeBalanceDelta,
    },
    SetState(AppInstance),
    Uninstall {
        app_identity_hash: Hash,
        delta: FreeBalanceDelta,
    },
    Withdraw {
        record: WithdrawalRecord,
        delta: FreeBalanceDelta,
    },
    SetCollateralization {
        asset: Address,
        active: bool,
    },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Setup => "setup",
            Transition::Propose(_) => "propose",
            Transition::RejectProposal(_) => "reject-proposal",
            Transition::Install { .. } => "install",
            Transition::SetState(_) => "set-state",
            Transition::Uninstall { .. } => "uninstall",
            Transition::Withdraw { .. } => "withdraw",
            Transition::SetCollateralization { .. } => "set-collateralization",
        }
    }
}

impl StateChannel {
    pub fn new(
        id: Hash,
        participants: [Participant; 2],
        deposits: BTreeMap<Address, [U256; 2]>,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            id,
            participants,
            free_balance: FreeBalance::new(id, deposits)?,
            app_instances: BTreeMap::new(),
            proposed_app_instances: BTreeMap::new(),
            num_proposed_apps: 0,
            schema_version: SCHEMA_VERSION,
            active_collateralizations: BTreeMap::new(),
            withdrawals: Vec::new(),
        })
    }

    pub fn index_of(&self, identifier: &str) -> Option<PartIdx> {
        self.participants
            .iter()
            .position(|p| p.identifier == identifier)
    }

    pub fn next_app_seq_no(&self) -> u64 {
        self.num_proposed_apps + 1
    }

    pub fn app(&self, identity_hash: &Hash) -> Option<&AppInstance> {
        self.app_instances.get(identity_hash)
    }

    pub fn proposal(&self, identity_hash: &Hash) -> Option<&AppInstance> {
        self.proposed_app_instances.get(identity_hash)
    }

    pub fn active_apps(&self) -> Vec<Hash> {
        self.app_instances.keys().copied().collect()
    }

    pub fn free_balance_state_hash(&self) -> Result<Hash, ChannelError> {
        self.free_balance.state_hash(&self.active_apps())
    }

    /// Maps per-participant amounts from the app's participant order (proposer
    /// first) to the channel's.
    pub fn to_channel_order(&self, app: &AppInstance, amounts: [U256; 2]) -> [U256; 2] {
        if app.participants[0].signer == self.participants[0].signer {
            amounts
        } else {
            [amounts[1], amounts[0]]
        }
    }

    /// Returns the channel after `transition`, leaving `self` untouched.
    pub fn apply(&self, transition: &Transition) -> Result<StateChannel, ChannelError> {
        let mut next = self.clone();
        match transition {
            Transition::Setup => {}
            Transition::Propose(app) => {
                next.check_owned(app)?;
                if app.app_seq_no != self.next_app_seq_no() {
                    return Err(ChannelError::AppSeqNoMismatch {
                        expected: self.next_app_seq_no(),
                        got: app.app_seq_no,
                    });
                }
                if self.app(&app.identity_hash).is_some()
                    || self.proposal(&app.identity_hash).is_some()
                {
                    return Err(ChannelError::AppExists(app.identity_hash));
                }
                next.num_proposed_apps = app.app_seq_no;
                next.proposed_app_instances
                    .insert(app.identity_hash, app.clone());
            }
            Transition::RejectProposal(hash) => {
                next.proposed_app_instances
                    .remove(hash)
                    .ok_or(ChannelError::ProposalNotFound(*hash))?;
            }
            Transition::Install { app, delta } => {
                next.check_owned(app)?;
                if self.app(&app.identity_hash).is_some() {
                    return Err(ChannelError::AppExists(app.identity_hash));
                }
                next.proposed_app_instances
                    .remove(&app.identity_hash)
                    .ok_or(ChannelError::ProposalNotFound(app.identity_hash))?;
                next.free_balance.apply(delta)?;
                next.app_instances.insert(app.identity_hash, app.clone());
            }
            Transition::SetState(app) => {
                next.check_owned(app)?;
                let current = self
                    .app(&app.identity_hash)
                    .ok_or(ChannelError::AppNotFound(app.identity_hash))?;
                if app.latest_version_number != current.latest_version_number + 1 {
                    return Err(ChannelError::VersionMismatch {
                        hash: app.identity_hash,
                        current: current.latest_version_number,
                        got: app.latest_version_number,
                    });
                }
                next.app_instances.insert(app.identity_hash, app.clone());
            }
            Transition::Uninstall {
                app_identity_hash,
                delta,
            } => {
                next.app_instances
                    .remove(app_identity_hash)
                    .ok_or(ChannelError::AppNotFound(*app_identity_hash))?;
                next.free_balance.apply(delta)?;
            }
            Transition::Withdraw { record, delta } => {
                let expected = self.withdrawals.len() as u64;
                if record.withdrawal.nonce != expected {
                    return Err(ChannelError::WithdrawalNonceMismatch {
                        expected,
                        got: record.withdrawal.nonce,
                    });
                }
                next.free_balance.apply(delta)?;
                next.withdrawals.push(*record);
            }
            Transition::SetCollateralization { asset, active } => {
                next.active_collateralizations.insert(*asset, *active);
            }
        }
        Ok(next)
    }

    fn check_owned(&self, app: &AppInstance) -> Result<(), ChannelError> {
        if app.channel_id == self.id {
            Ok(())
        } else {
            Err(ChannelError::WrongChannel(app.channel_id))
        }
    }
}
