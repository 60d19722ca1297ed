use super::{AppError, AppKind};
use crate::abiencode::{
    self, keccak256, to_bytes,
    types::{Address, Hash, U256},
    Token,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoinTransfer {
    pub to: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimpleTransferState {
    pub coin_transfers: [CoinTransfer; 2],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnidirectionalTransferState {
    pub coin_transfers: [CoinTransfer; 2],
    pub finalized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnidirectionalTransferAction {
    pub action_type: u8,
    pub amount: U256,
}

const SEND_FUNDS: u8 = 0;
const END_CHANNEL: u8 = 1;

impl UnidirectionalTransferAction {
    pub fn send(amount: U256) -> Self {
        Self {
            action_type: SEND_FUNDS,
            amount,
        }
    }

    pub fn end() -> Self {
        Self {
            action_type: END_CHANNEL,
            amount: U256::zero(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedTransferState {
    pub coin_transfers: [CoinTransfer; 2],
    pub linked_hash: Hash,
    pub pre_image: Hash,
    pub finalized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedTransferAction {
    pub pre_image: Hash,
}

/// Decoded state of any known app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
    SimpleTransfer(SimpleTransferState),
    UnidirectionalTransfer(UnidirectionalTransferState),
    LinkedTransfer(LinkedTransferState),
}

/// Pops the next field of a decoded tuple. The decoder already checked the
/// shape against the schema, running out of fields means the schema and this
/// file disagree.
fn field(fields: &mut impl Iterator<Item = Token>) -> Result<Token, AppError> {
    fields
        .next()
        .ok_or(AppError::Encoding(abiencode::Error::UnexpectedToken {
            expected: "another tuple field",
        }))
}

impl CoinTransfer {
    fn from_token(token: Token) -> Result<Self, AppError> {
        let mut fields = token.into_tuple()?.into_iter();
        Ok(Self {
            to: field(&mut fields)?.into_address()?,
            amount: field(&mut fields)?.into_uint()?,
        })
    }

    fn pair_from_token(token: Token) -> Result<[Self; 2], AppError> {
        let mut items = token.into_array()?.into_iter();
        Ok([
            Self::from_token(field(&mut items)?)?,
            Self::from_token(field(&mut items)?)?,
        ])
    }
}

impl AppState {
    pub(super) fn from_token(kind: AppKind, token: Token) -> Result<Self, AppError> {
        let mut fields = token.into_tuple()?.into_iter();
        let coin_transfers = CoinTransfer::pair_from_token(field(&mut fields)?)?;
        Ok(match kind {
            AppKind::SimpleTransfer => AppState::SimpleTransfer(SimpleTransferState { coin_transfers }),
            AppKind::UnidirectionalTransfer => {
                AppState::UnidirectionalTransfer(UnidirectionalTransferState {
                    coin_transfers,
                    finalized: field(&mut fields)?.into_bool()?,
                })
            }
            AppKind::LinkedTransfer => AppState::LinkedTransfer(LinkedTransferState {
                coin_transfers,
                linked_hash: field(&mut fields)?.into_bytes32()?,
                pre_image: field(&mut fields)?.into_bytes32()?,
                finalized: field(&mut fields)?.into_bool()?,
            }),
        })
    }

    pub fn encode(&self) -> abiencode::Result<Vec<u8>> {
        match self {
            AppState::SimpleTransfer(s) => to_bytes(s),
            AppState::UnidirectionalTransfer(s) => to_bytes(s),
            AppState::LinkedTransfer(s) => to_bytes(s),
        }
    }

    pub fn coin_transfers(&self) -> &[CoinTransfer; 2] {
        match self {
            AppState::SimpleTransfer(s) => &s.coin_transfers,
            AppState::UnidirectionalTransfer(s) => &s.coin_transfers,
            AppState::LinkedTransfer(s) => &s.coin_transfers,
        }
    }

    /// `action` has already been decoded against the app's action schema.
    pub(super) fn apply_action(self, action: Token) -> Result<Self, AppError> {
        let mut fields = action.into_tuple()?.into_iter();
        match self {
            AppState::SimpleTransfer(_) => Err(AppError::NoActions(AppKind::SimpleTransfer.name())),
            AppState::UnidirectionalTransfer(mut state) => {
                if state.finalized {
                    return Err(AppError::Finalized);
                }
                let action_type = field(&mut fields)?.into_uint()?;
                let amount = field(&mut fields)?.into_uint()?;
                if action_type == U256::from(SEND_FUNDS) {
                    let [from, to] = &mut state.coin_transfers;
                    from.amount = from
                        .amount
                        .checked_sub(amount)
                        .ok_or(AppError::InvalidAction("amount exceeds sender balance"))?;
                    to.amount = to.amount.checked_add(amount).ok_or(AppError::Overflow)?;
                } else if action_type == U256::from(END_CHANNEL) {
                    state.finalized = true;
                } else {
                    return Err(AppError::InvalidAction("unknown action type"));
                }
                Ok(AppState::UnidirectionalTransfer(state))
            }
            AppState::LinkedTransfer(mut state) => {
                if state.finalized {
                    return Err(AppError::Finalized);
                }
                let pre_image = field(&mut fields)?.into_bytes32()?;
                if keccak256(&pre_image.0) != state.linked_hash {
                    return Err(AppError::InvalidAction("preimage does not match linked hash"));
                }
                let [from, to] = &mut state.coin_transfers;
                to.amount = to
                    .amount
                    .checked_add(from.amount)
                    .ok_or(AppError::Overflow)?;
                from.amount = U256::zero();
                state.pre_image = pre_image;
                state.finalized = true;
                Ok(AppState::LinkedTransfer(state))
            }
        }
    }
}
