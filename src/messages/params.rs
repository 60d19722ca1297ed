use super::{hash_from_bytes, ConversionError, ProtocolName};
use crate::{
    abiencode::types::{Address, Hash, U256},
    perunwire::{self, protocol_msg},
};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupParams {
    pub salt: Hash,
    pub initiator_signer: Address,
    pub responder_signer: Address,
    /// Initial free balance per asset, `[initiator, responder]`.
    pub deposits: BTreeMap<Address, [U256; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposeParams {
    pub app_definition: Address,
    pub initial_state: Vec<u8>,
    pub asset: Address,
    /// Locked from the proposer's free balance on install.
    pub initiator_deposit: U256,
    pub responder_deposit: U256,
    pub default_timeout: u64,
    pub state_timeout: u64,
    /// Sequence number of the proposal in the channel. Left `None` by
    /// callers, the initiator assigns the next free one before sending.
    pub app_seq_no: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallParams {
    pub app_identity_hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeActionParams {
    pub app_identity_hash: Hash,
    pub action: Vec<u8>,
    /// The version the caller believes is current, to detect stale writes.
    pub expected_version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UninstallParams {
    pub app_identity_hash: Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawParams {
    pub asset: Address,
    pub amount: U256,
    pub recipient: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolParams {
    Setup(SetupParams),
    Propose(ProposeParams),
    Install(InstallParams),
    TakeAction(TakeActionParams),
    Uninstall(UninstallParams),
    Withdraw(WithdrawParams),
}

impl ProtocolParams {
    pub fn protocol(&self) -> ProtocolName {
        match self {
            ProtocolParams::Setup(_) => ProtocolName::Setup,
            ProtocolParams::Propose(_) => ProtocolName::Propose,
            ProtocolParams::Install(_) => ProtocolName::Install,
            ProtocolParams::TakeAction(_) => ProtocolName::TakeAction,
            ProtocolParams::Uninstall(_) => ProtocolName::Uninstall,
            ProtocolParams::Withdraw(_) => ProtocolName::Withdraw,
        }
    }
}

fn address_from_bytes(bytes: Vec<u8>, field: &'static str) -> Result<Address, ConversionError> {
    Ok(Address(
        bytes
            .try_into()
            .or(Err(ConversionError::ByteLengthMismatch(field)))?,
    ))
}

fn u256_from_bytes(bytes: Vec<u8>, field: &'static str) -> Result<U256, ConversionError> {
    if bytes.len() != 32 {
        return Err(ConversionError::ByteLengthMismatch(field));
    }
    Ok(U256::from_big_endian(&bytes))
}

impl From<ProtocolParams> for protocol_msg::Payload {
    fn from(value: ProtocolParams) -> Self {
        match value {
            ProtocolParams::Setup(p) => protocol_msg::Payload::Setup(perunwire::SetupParams {
                salt: p.salt.0.to_vec(),
                initiator_signer: p.initiator_signer.0.to_vec(),
                responder_signer: p.responder_signer.0.to_vec(),
                deposits: p
                    .deposits
                    .into_iter()
                    .map(|(asset, [initiator, responder])| perunwire::Deposit {
                        asset: asset.0.to_vec(),
                        initiator: initiator.to_be_bytes().to_vec(),
                        responder: responder.to_be_bytes().to_vec(),
                    })
                    .collect(),
            }),
            ProtocolParams::Propose(p) => protocol_msg::Payload::Propose(perunwire::ProposeParams {
                app_definition: p.app_definition.0.to_vec(),
                initial_state: p.initial_state,
                asset: p.asset.0.to_vec(),
                initiator_deposit: p.initiator_deposit.to_be_bytes().to_vec(),
                responder_deposit: p.responder_deposit.to_be_bytes().to_vec(),
                default_timeout: p.default_timeout,
                state_timeout: p.state_timeout,
                app_seq_no: p.app_seq_no.unwrap_or_default(),
            }),
            ProtocolParams::Install(p) => protocol_msg::Payload::Install(perunwire::InstallParams {
                app_identity_hash: p.app_identity_hash.0.to_vec(),
            }),
            ProtocolParams::TakeAction(p) => {
                protocol_msg::Payload::TakeAction(perunwire::TakeActionParams {
                    app_identity_hash: p.app_identity_hash.0.to_vec(),
                    action: p.action,
                    expected_version: p.expected_version,
                })
            }
            ProtocolParams::Uninstall(p) => {
                protocol_msg::Payload::Uninstall(perunwire::UninstallParams {
                    app_identity_hash: p.app_identity_hash.0.to_vec(),
                })
            }
            ProtocolParams::Withdraw(p) => protocol_msg::Payload::Withdraw(perunwire::WithdrawParams {
                asset: p.asset.0.to_vec(),
                amount: p.amount.to_be_bytes().to_vec(),
                recipient: p.recipient.0.to_vec(),
            }),
        }
    }
}

impl TryFrom<protocol_msg::Payload> for ProtocolParams {
    type Error = ConversionError;

    fn try_from(value: protocol_msg::Payload) -> Result<Self, Self::Error> {
        Ok(match value {
            protocol_msg::Payload::Setup(p) => {
                let mut deposits = BTreeMap::new();
                for d in p.deposits {
                    deposits.insert(
                        address_from_bytes(d.asset, "deposit.asset")?,
                        [
                            u256_from_bytes(d.initiator, "deposit.initiator")?,
                            u256_from_bytes(d.responder, "deposit.responder")?,
                        ],
                    );
                }
                ProtocolParams::Setup(SetupParams {
                    salt: hash_from_bytes(p.salt, "salt")?,
                    initiator_signer: address_from_bytes(p.initiator_signer, "initiator_signer")?,
                    responder_signer: address_from_bytes(p.responder_signer, "responder_signer")?,
                    deposits,
                })
            }
            protocol_msg::Payload::Propose(p) => ProtocolParams::Propose(ProposeParams {
                app_definition: address_from_bytes(p.app_definition, "app_definition")?,
                initial_state: p.initial_state,
                asset: address_from_bytes(p.asset, "asset")?,
                initiator_deposit: u256_from_bytes(p.initiator_deposit, "initiator_deposit")?,
                responder_deposit: u256_from_bytes(p.responder_deposit, "responder_deposit")?,
                default_timeout: p.default_timeout,
                state_timeout: p.state_timeout,
                // Sequence numbers start at 1.
                app_seq_no: Some(p.app_seq_no).filter(|n| *n != 0),
            }),
            protocol_msg::Payload::Install(p) => ProtocolParams::Install(InstallParams {
                app_identity_hash: hash_from_bytes(p.app_identity_hash, "app_identity_hash")?,
            }),
            protocol_msg::Payload::TakeAction(p) => ProtocolParams::TakeAction(TakeActionParams {
                app_identity_hash: hash_from_bytes(p.app_identity_hash, "app_identity_hash")?,
                action: p.action,
                expected_version: p.expected_version,
            }),
            protocol_msg::Payload::Uninstall(p) => ProtocolParams::Uninstall(UninstallParams {
                app_identity_hash: hash_from_bytes(p.app_identity_hash, "app_identity_hash")?,
            }),
            protocol_msg::Payload::Withdraw(p) => ProtocolParams::Withdraw(WithdrawParams {
                asset: address_from_bytes(p.asset, "asset")?,
                amount: u256_from_bytes(p.amount, "amount")?,
                recipient: address_from_bytes(p.recipient, "recipient")?,
            }),
            protocol_msg::Payload::Countersign(_)
            | protocol_msg::Payload::Ack(_)
            | protocol_msg::Payload::Rejected(_)
            | protocol_msg::Payload::Latest(_) => {
                return Err(ConversionError::ExpectedSome("params"))
            }
        })
    }
}
