//! Commitment Builder: the exact bytes both parties sign for a transition.
//!
//! [build] is pure. Both parties run it on their own copy of the channel and
//! only exchange signatures, so any difference in the inputs shows up as a
//! signature that does not verify.

use crate::{
    abiencode::{self, keccak256, to_bytes, types::{Address, Hash, U256}},
    channel::{ChannelError, StateChannel, Transition},
    messages::ProtocolName,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommitmentError {
    #[error("protocol {protocol} cannot commit a {transition} transition")]
    ProtocolMismatch {
        protocol: ProtocolName,
        transition: &'static str,
    },
    #[error("protocol {0} has no commitment")]
    NoCommitment(ProtocolName),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Encoding(#[from] abiencode::Error),
}

/// Encoded as its index, separates the commitment kinds so that no two
/// of them can ever share bytes.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
enum CommitmentKind {
    Setup,
    Install,
    SetState,
    Uninstall,
    Withdraw,
}

#[derive(Serialize, Debug)]
struct SetupCommitment {
    kind: CommitmentKind,
    channel_id: Hash,
    participants: [Address; 2],
    free_balance_identity: Hash,
    free_balance_version: u64,
    free_balance_state: Hash,
}

#[derive(Serialize, Debug)]
struct InstallCommitment {
    kind: CommitmentKind,
    channel_id: Hash,
    app_identity_hash: Hash,
    app_definition: Address,
    app_state_hash: Hash,
    app_version: u64,
    default_timeout: u64,
    asset: Address,
    locked: [U256; 2],
    free_balance_version: u64,
    free_balance_state: Hash,
}

#[derive(Serialize, Debug)]
struct SetStateCommitment {
    kind: CommitmentKind,
    channel_id: Hash,
    app_identity_hash: Hash,
    app_version: u64,
    app_state_hash: Hash,
    state_timeout: u64,
}

#[derive(Serialize, Debug)]
struct UninstallCommitment {
    kind: CommitmentKind,
    channel_id: Hash,
    app_identity_hash: Hash,
    free_balance_version: u64,
    free_balance_state: Hash,
}

#[derive(Serialize, Debug)]
struct WithdrawCommitment {
    kind: CommitmentKind,
    channel_id: Hash,
    recipient: Address,
    asset: Address,
    amount: U256,
    nonce: u64,
    free_balance_version: u64,
    free_balance_state: Hash,
}

/// Bytes to sign and their hash. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    pub protocol: ProtocolName,
    pub bytes: Vec<u8>,
    pub hash: Hash,
}

impl Commitment {
    fn new(protocol: ProtocolName, bytes: Vec<u8>) -> Self {
        let hash = keccak256(&bytes);
        Self {
            protocol,
            bytes,
            hash,
        }
    }
}

/// Builds the commitment for `transition` applied to `channel`.
///
/// `channel` is the state before the transition, the commitment describes
/// the state after it.
pub fn build(
    protocol: ProtocolName,
    channel: &StateChannel,
    transition: &Transition,
) -> Result<Commitment, CommitmentError> {
    let mismatch = || CommitmentError::ProtocolMismatch {
        protocol,
        transition: transition.name(),
    };

    let next = channel.apply(transition)?;
    let fb_version = next.free_balance.version;

    let bytes = match (protocol, transition) {
        (ProtocolName::Propose, _) => return Err(CommitmentError::NoCommitment(protocol)),
        (ProtocolName::Setup, Transition::Setup) => to_bytes(&SetupCommitment {
            kind: CommitmentKind::Setup,
            channel_id: next.id,
            participants: [next.participants[0].signer, next.participants[1].signer],
            free_balance_identity: next.free_balance.identity_hash,
            free_balance_version: fb_version,
            free_balance_state: next.free_balance_state_hash()?,
        })?,
        (ProtocolName::Install, Transition::Install { app, .. }) => to_bytes(&InstallCommitment {
            kind: CommitmentKind::Install,
            channel_id: next.id,
            app_identity_hash: app.identity_hash,
            app_definition: app.app_definition,
            app_state_hash: app.state_hash(),
            app_version: app.latest_version_number,
            default_timeout: app.default_timeout,
            asset: app.asset,
            locked: app.deposits(),
            free_balance_version: fb_version,
            free_balance_state: next.free_balance_state_hash()?,
        })?,
        (ProtocolName::TakeAction, Transition::SetState(app)) => to_bytes(&SetStateCommitment {
            kind: CommitmentKind::SetState,
            channel_id: next.id,
            app_identity_hash: app.identity_hash,
            app_version: app.latest_version_number,
            app_state_hash: app.state_hash(),
            state_timeout: app.state_timeout,
        })?,
        (
            ProtocolName::Uninstall,
            Transition::Uninstall {
                app_identity_hash, ..
            },
        ) => to_bytes(&UninstallCommitment {
            kind: CommitmentKind::Uninstall,
            channel_id: next.id,
            app_identity_hash: *app_identity_hash,
            free_balance_version: fb_version,
            free_balance_state: next.free_balance_state_hash()?,
        })?,
        (ProtocolName::Withdraw, Transition::Withdraw { record, .. }) => {
            let w = &record.withdrawal;
            to_bytes(&WithdrawCommitment {
                kind: CommitmentKind::Withdraw,
                channel_id: next.id,
                recipient: w.recipient,
                asset: w.asset,
                amount: w.amount,
                nonce: w.nonce,
                free_balance_version: fb_version,
                free_balance_state: next.free_balance_state_hash()?,
            })?
        }
        _ => return Err(mismatch()),
    };

    Ok(Commitment::new(protocol, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{
        state_channel_tests::{asset, test_app, test_channel},
        FreeBalanceDelta,
    };

    fn install(channel: &StateChannel) -> (StateChannel, Transition) {
        let app = test_app(channel, 0);
        let proposed = channel.apply(&Transition::Propose(app.clone())).unwrap();
        let transition = Transition::Install {
            app,
            delta: FreeBalanceDelta::debit(asset(), [2.into(), 2.into()]),
        };
        (proposed, transition)
    }

    #[test]
    fn deterministic() {
        let (channel, transition) = install(&test_channel());
        let a = build(ProtocolName::Install, &channel, &transition).unwrap();
        let b = build(ProtocolName::Install, &channel.clone(), &transition.clone()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hash, keccak256(&a.bytes));
    }

    #[test]
    fn signatures_do_not_change_the_commitment() {
        let (channel, transition) = install(&test_channel());
        let unsigned = build(ProtocolName::Install, &channel, &transition).unwrap();

        let signed = match transition {
            Transition::Install { mut app, delta } => {
                app.latest_signatures = Some(Default::default());
                Transition::Install { app, delta }
            }
            _ => unreachable!(),
        };
        assert_eq!(
            build(ProtocolName::Install, &channel, &signed).unwrap(),
            unsigned
        );
    }

    #[test]
    fn every_input_is_covered() {
        let (channel, transition) = install(&test_channel());
        let base = build(ProtocolName::Install, &channel, &transition).unwrap();

        let other_delta = match transition.clone() {
            Transition::Install { app, .. } => Transition::Install {
                app,
                delta: FreeBalanceDelta::debit(asset(), [2.into(), 1.into()]),
            },
            _ => unreachable!(),
        };
        assert_ne!(
            build(ProtocolName::Install, &channel, &other_delta)
                .unwrap()
                .hash,
            base.hash
        );

        let mut richer = channel.clone();
        richer
            .free_balance
            .balances
            .insert(asset(), [11.into(), 10.into()]);
        assert_ne!(
            build(ProtocolName::Install, &richer, &transition).unwrap().hash,
            base.hash
        );
    }

    #[test]
    fn protocol_has_to_match_transition() {
        let (channel, transition) = install(&test_channel());
        assert_eq!(
            build(ProtocolName::Uninstall, &channel, &transition),
            Err(CommitmentError::ProtocolMismatch {
                protocol: ProtocolName::Uninstall,
                transition: "install"
            })
        );
        assert_eq!(
            build(ProtocolName::Propose, &channel, &transition),
            Err(CommitmentError::NoCommitment(ProtocolName::Propose))
        );
    }

    #[test]
    fn invalid_transition_is_an_error() {
        let channel = test_channel();
        let app = test_app(&channel, 0);
        // Not proposed yet.
        let transition = Transition::Install {
            app,
            delta: FreeBalanceDelta::debit(asset(), [2.into(), 2.into()]),
        };
        assert!(matches!(
            build(ProtocolName::Install, &channel, &transition),
            Err(CommitmentError::Channel(ChannelError::ProposalNotFound(_)))
        ));
    }
}
