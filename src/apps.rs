//! App definitions the channel can install, resolved through an immutable
//! [AppRegistry] built once at startup.
//!
//! Every app is a closed [AppKind] variant with a state schema, an optional
//! action schema, a transition function and an outcome interpreter. States
//! and actions travel as canonical ABI bytes and are decoded strictly before
//! anything else looks at them.

mod transfers;

use crate::abiencode::{
    self, decode, parse_schema,
    types::{Address, U256},
    ParamType,
};
use std::collections::BTreeMap;
use thiserror::Error;

pub use transfers::{
    AppState, CoinTransfer, LinkedTransferAction, LinkedTransferState, SimpleTransferState,
    UnidirectionalTransferAction, UnidirectionalTransferState,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("invalid encoding: {0}")]
    Encoding(#[from] abiencode::Error),
    #[error("app {0} does not take actions")]
    NoActions(&'static str),
    #[error("invalid action: {0}")]
    InvalidAction(&'static str),
    #[error("app is already finalized")]
    Finalized,
    #[error("coin transfer to {0}, which is not an app participant")]
    UnknownRecipient(Address),
    #[error("amount overflow")]
    Overflow,
    #[error("app definition {0} registered twice")]
    DuplicateDefinition(Address),
}

/// The closed set of apps this crate knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AppKind {
    /// A fixed split that never changes after install.
    SimpleTransfer,
    /// Payments flowing from the first to the second participant.
    UnidirectionalTransfer,
    /// Hash-locked payment, unlocked by revealing the preimage.
    LinkedTransfer,
}

impl AppKind {
    pub const ALL: [AppKind; 3] = [
        AppKind::SimpleTransfer,
        AppKind::UnidirectionalTransfer,
        AppKind::LinkedTransfer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AppKind::SimpleTransfer => "SimpleTransferApp",
            AppKind::UnidirectionalTransfer => "UnidirectionalTransferApp",
            AppKind::LinkedTransfer => "SimpleLinkedTransferApp",
        }
    }

    pub fn state_encoding(&self) -> &'static str {
        match self {
            AppKind::SimpleTransfer => {
                "tuple(tuple(address to, uint256 amount)[2] coinTransfers)"
            }
            AppKind::UnidirectionalTransfer => {
                "tuple(tuple(address to, uint256 amount)[2] coinTransfers, bool finalized)"
            }
            AppKind::LinkedTransfer => {
                "tuple(tuple(address to, uint256 amount)[2] coinTransfers, bytes32 linkedHash, bytes32 preImage, bool finalized)"
            }
        }
    }

    pub fn action_encoding(&self) -> Option<&'static str> {
        match self {
            AppKind::SimpleTransfer => None,
            AppKind::UnidirectionalTransfer => Some("tuple(uint8 actionType, uint256 amount)"),
            AppKind::LinkedTransfer => Some("tuple(bytes32 preImage)"),
        }
    }
}

/// A registered app: its kind, on-chain address and parsed schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDefinition {
    pub kind: AppKind,
    pub address: Address,
    state_type: ParamType,
    action_type: Option<ParamType>,
}

impl AppDefinition {
    pub fn new(kind: AppKind, address: Address) -> Result<Self, AppError> {
        Ok(Self {
            kind,
            address,
            state_type: parse_schema(kind.state_encoding())?,
            action_type: kind.action_encoding().map(parse_schema).transpose()?,
        })
    }

    pub fn decode_state(&self, state: &[u8]) -> Result<AppState, AppError> {
        AppState::from_token(self.kind, decode(&self.state_type, state)?)
    }

    /// Runs the transition function, returning the encoded next state.
    pub fn apply_action(&self, state: &[u8], action: &[u8]) -> Result<Vec<u8>, AppError> {
        let action_type = self
            .action_type
            .as_ref()
            .ok_or(AppError::NoActions(self.kind.name()))?;
        let action = decode(action_type, action)?;
        let next = self.decode_state(state)?.apply_action(action)?;
        Ok(next.encode()?)
    }

    /// Amounts paid out to `participants` (app participant order) if the app
    /// were uninstalled in `state`.
    pub fn compute_outcome(
        &self,
        state: &[u8],
        participants: [Address; 2],
    ) -> Result<[U256; 2], AppError> {
        let mut outcome = [U256::zero(); 2];
        for transfer in self.decode_state(state)?.coin_transfers() {
            let idx = participants
                .iter()
                .position(|p| *p == transfer.to)
                .ok_or(AppError::UnknownRecipient(transfer.to))?;
            outcome[idx] = outcome[idx]
                .checked_add(transfer.amount)
                .ok_or(AppError::Overflow)?;
        }
        Ok(outcome)
    }
}

/// Immutable lookup table from app definition address to [AppDefinition].
#[derive(Debug, Clone, Default)]
pub struct AppRegistry {
    apps: BTreeMap<Address, AppDefinition>,
}

impl AppRegistry {
    pub fn new<I>(apps: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = (AppKind, Address)>,
    {
        let mut registry = BTreeMap::new();
        for (kind, address) in apps {
            if registry
                .insert(address, AppDefinition::new(kind, address)?)
                .is_some()
            {
                return Err(AppError::DuplicateDefinition(address));
            }
        }
        Ok(Self { apps: registry })
    }

    pub fn get(&self, address: &Address) -> Option<&AppDefinition> {
        self.apps.get(address)
    }

    pub fn by_name(&self, name: &str) -> Option<&AppDefinition> {
        self.apps.values().find(|app| app.kind.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppDefinition> {
        self.apps.values()
    }
}
