//! Messages exchanged during a protocol run and their conversion to and from
//! the protobuf structs in [crate::perunwire].

mod params;

use crate::{
    abiencode::types::{Hash, Signature},
    perunwire::{self, protocol_msg},
};
use thiserror::Error;

pub use params::{
    InstallParams, ProposeParams, ProtocolParams, SetupParams, TakeActionParams, UninstallParams,
    WithdrawParams,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("byte length mismatch in field {0}")]
    ByteLengthMismatch(&'static str),
    #[error("missing field {0}")]
    ExpectedSome(&'static str),
    #[error("unknown protocol {0}")]
    UnknownProtocol(u32),
    #[error("payload does not belong to protocol {0}")]
    PayloadMismatch(ProtocolName),
}

/// The protocols the runner can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolName {
    Setup,
    Propose,
    Install,
    TakeAction,
    Uninstall,
    Withdraw,
}

impl ProtocolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolName::Setup => "setup",
            ProtocolName::Propose => "propose",
            ProtocolName::Install => "install",
            ProtocolName::TakeAction => "takeAction",
            ProtocolName::Uninstall => "uninstall",
            ProtocolName::Withdraw => "withdraw",
        }
    }
}

impl core::fmt::Display for ProtocolName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ProtocolName> for u32 {
    fn from(value: ProtocolName) -> Self {
        match value {
            ProtocolName::Setup => 1,
            ProtocolName::Propose => 2,
            ProtocolName::Install => 3,
            ProtocolName::TakeAction => 4,
            ProtocolName::Uninstall => 5,
            ProtocolName::Withdraw => 6,
        }
    }
}

impl TryFrom<u32> for ProtocolName {
    type Error = ConversionError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => ProtocolName::Setup,
            2 => ProtocolName::Propose,
            3 => ProtocolName::Install,
            4 => ProtocolName::TakeAction,
            5 => ProtocolName::Uninstall,
            6 => ProtocolName::Withdraw,
            _ => return Err(ConversionError::UnknownProtocol(value)),
        })
    }
}

/// What a single step of a run carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// First message of a run: the parameters and, for protocols with a
    /// commitment, the initiator's signature over it.
    Params(ProtocolParams, Option<Signature>),
    /// The responder's signature over the same commitment.
    Countersign(Signature),
    /// Positive answer of a run without commitment (Propose), with the
    /// identity hash of the proposal the responder stored.
    Ack(Hash),
    /// The responder refused the run.
    Rejected(String),
    /// The responder refused a TakeAction because the versions differ and
    /// sends its own latest signed state of the app instead.
    Latest(SignedAppState),
}

/// An app state both participants signed, as stored with the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAppState {
    pub app_identity_hash: Hash,
    pub version: u64,
    pub state: Vec<u8>,
    /// `None` for the state the app was installed with.
    pub action: Option<Vec<u8>>,
    /// Channel participant order.
    pub signatures: [Signature; 2],
}

/// Sequence number of the initiator's opening message.
pub const SEQ_PARAMS: u32 = 1;
/// Sequence number of the responder's reply.
pub const SEQ_REPLY: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub protocol: ProtocolName,
    /// Correlates all messages of one run.
    pub process_id: Hash,
    pub seq: u32,
    pub from: String,
    pub to: String,
    pub channel_id: Hash,
    pub payload: Payload,
}

impl ProtocolMessage {
    /// The reply to `self`, going back to its sender.
    pub fn reply(&self, payload: Payload) -> Self {
        Self {
            protocol: self.protocol,
            process_id: self.process_id,
            seq: SEQ_REPLY,
            from: self.to.clone(),
            to: self.from.clone(),
            channel_id: self.channel_id,
            payload,
        }
    }
}

pub(crate) fn hash_from_bytes(bytes: Vec<u8>, field: &'static str) -> Result<Hash, ConversionError> {
    Ok(Hash(
        bytes
            .try_into()
            .or(Err(ConversionError::ByteLengthMismatch(field)))?,
    ))
}

fn signature_from_bytes(bytes: Vec<u8>) -> Result<Option<Signature>, ConversionError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(Signature(
        bytes
            .try_into()
            .or(Err(ConversionError::ByteLengthMismatch("signature")))?,
    )))
}

impl From<SignedAppState> for perunwire::LatestState {
    fn from(value: SignedAppState) -> Self {
        Self {
            app_identity_hash: value.app_identity_hash.0.to_vec(),
            version: value.version,
            state: value.state,
            action: value.action.unwrap_or_default(),
            signatures: value.signatures.iter().map(|s| s.0.to_vec()).collect(),
        }
    }
}

impl TryFrom<perunwire::LatestState> for SignedAppState {
    type Error = ConversionError;

    fn try_from(value: perunwire::LatestState) -> Result<Self, Self::Error> {
        let mut signatures = [Signature::default(); 2];
        if value.signatures.len() != signatures.len() {
            return Err(ConversionError::ByteLengthMismatch("signatures"));
        }
        for (slot, bytes) in signatures.iter_mut().zip(value.signatures) {
            *slot = signature_from_bytes(bytes)?.ok_or(ConversionError::ExpectedSome("signature"))?;
        }
        Ok(Self {
            app_identity_hash: hash_from_bytes(value.app_identity_hash, "app_identity_hash")?,
            version: value.version,
            state: value.state,
            action: Some(value.action).filter(|a| !a.is_empty()),
            signatures,
        })
    }
}

impl From<ProtocolMessage> for perunwire::Envelope {
    fn from(value: ProtocolMessage) -> Self {
        let (payload, signature) = match value.payload {
            Payload::Params(params, sig) => (params.into(), sig),
            Payload::Countersign(sig) => (
                protocol_msg::Payload::Countersign(perunwire::Countersign {}),
                Some(sig),
            ),
            Payload::Ack(hash) => (
                protocol_msg::Payload::Ack(perunwire::Ack {
                    app_identity_hash: hash.0.to_vec(),
                }),
                None,
            ),
            Payload::Rejected(reason) => (
                protocol_msg::Payload::Rejected(perunwire::Rejected { reason }),
                None,
            ),
            Payload::Latest(latest) => (protocol_msg::Payload::Latest(latest.into()), None),
        };

        Self {
            sender: value.from,
            recipient: value.to,
            msg: Some(perunwire::ProtocolMsg {
                protocol: value.protocol.into(),
                process_id: value.process_id.0.to_vec(),
                seq: value.seq,
                channel_id: value.channel_id.0.to_vec(),
                signature: signature.map(|s| s.0.to_vec()).unwrap_or_default(),
                payload: Some(payload),
            }),
        }
    }
}

impl TryFrom<perunwire::Envelope> for ProtocolMessage {
    type Error = ConversionError;

    fn try_from(value: perunwire::Envelope) -> Result<Self, Self::Error> {
        let msg = value.msg.ok_or(ConversionError::ExpectedSome("msg"))?;
        let protocol = ProtocolName::try_from(msg.protocol)?;
        let signature = signature_from_bytes(msg.signature)?;

        let payload = match msg.payload.ok_or(ConversionError::ExpectedSome("payload"))? {
            protocol_msg::Payload::Countersign(_) => Payload::Countersign(
                signature.ok_or(ConversionError::ExpectedSome("signature"))?,
            ),
            protocol_msg::Payload::Ack(a) => {
                Payload::Ack(hash_from_bytes(a.app_identity_hash, "app_identity_hash")?)
            }
            protocol_msg::Payload::Rejected(r) => Payload::Rejected(r.reason),
            protocol_msg::Payload::Latest(l) => Payload::Latest(l.try_into()?),
            params => {
                let params = ProtocolParams::try_from(params)?;
                if params.protocol() != protocol {
                    return Err(ConversionError::PayloadMismatch(protocol));
                }
                Payload::Params(params, signature)
            }
        };

        Ok(Self {
            protocol,
            process_id: hash_from_bytes(msg.process_id, "process_id")?,
            seq: msg.seq,
            from: value.sender,
            to: value.recipient,
            channel_id: hash_from_bytes(msg.channel_id, "channel_id")?,
            payload,
        })
    }
}
