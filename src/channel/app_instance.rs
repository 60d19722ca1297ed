use super::{checked_total, ChannelError, Participant};
use crate::abiencode::{
    self, keccak256,
    types::{Address, Hash, Signature, U256},
};

/// How the final state of an app is turned into free balance credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeType {
    /// A single asset split between the two app participants.
    SingleAssetTwoPartyCoinTransfer,
}

/// An app (sub-contract) inside a channel, either proposed or installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInstance {
    pub identity_hash: Hash,
    pub channel_id: Hash,
    /// `numProposedApps + 1` at the time of the proposal.
    pub app_seq_no: u64,
    /// App participant order, the proposer comes first.
    pub participants: [Participant; 2],
    pub app_definition: Address,
    pub latest_state: Vec<u8>,
    /// Starts at 0 on install, +1 per committed update.
    pub latest_version_number: u64,
    pub latest_action: Option<Vec<u8>>,
    pub default_timeout: u64,
    pub state_timeout: u64,
    pub outcome_type: OutcomeType,
    pub state_encoding: String,
    pub action_encoding: Option<String>,
    pub asset: Address,
    pub initiator_deposit: U256,
    pub responder_deposit: U256,
    /// Both parties' signatures over the latest committed state, in channel
    /// participant order. `None` for proposals.
    pub latest_signatures: Option<[Signature; 2]>,
}

impl AppInstance {
    /// Identity hash of an app: `(channelId, appDefinition, keccak256(initialState), appSeqNo)`.
    pub fn compute_identity_hash(
        channel_id: Hash,
        app_definition: Address,
        initial_state: &[u8],
        app_seq_no: u64,
    ) -> Result<Hash, ChannelError> {
        Ok(abiencode::to_hash(&(
            channel_id,
            app_definition,
            keccak256(initial_state),
            app_seq_no,
        ))?)
    }

    pub fn state_hash(&self) -> Hash {
        keccak256(&self.latest_state)
    }

    /// Collateral locked by the app, `initiatorDeposit + responderDeposit`.
    pub fn locked_total(&self) -> Result<U256, ChannelError> {
        checked_total(self.asset, [self.initiator_deposit, self.responder_deposit])
    }

    /// Deposits in app participant order.
    pub fn deposits(&self) -> [U256; 2] {
        [self.initiator_deposit, self.responder_deposit]
    }

    pub fn is_install_state(&self) -> bool {
        self.latest_version_number == 0 && self.latest_action.is_none()
    }

    /// The next state, one version ahead, without signatures.
    pub fn with_next_state(&self, state: Vec<u8>, action: Vec<u8>) -> Self {
        Self {
            latest_state: state,
            latest_version_number: self.latest_version_number + 1,
            latest_action: Some(action),
            latest_signatures: None,
            ..self.clone()
        }
    }
}
