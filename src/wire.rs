//! Transport abstraction between the protocol runner and the network.
//!
//! The runner talks to a [MessageBus]. [ProtoBufEncodingLayer] implements it
//! on top of any [BytesBus] by encoding messages as length-prefixed protobuf
//! envelopes; [decode_message] is the inverse on the receiving side.

mod encoding;
mod in_process;

use crate::messages::{ConversionError, ProtocolMessage};
use async_trait::async_trait;
use core::fmt::Debug;
use thiserror::Error;

pub use encoding::{decode_message, ProtoBufEncodingLayer};
pub use in_process::InProcessBus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("frame shorter than its length prefix")]
    Truncated,
    #[error("message of {0} bytes does not fit the u16 length prefix")]
    TooLarge(usize),
    #[error("protobuf: {0}")]
    Protobuf(String),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("no route to participant {0}")]
    UnknownRecipient(String),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Low-Level abstraction over the network configuration: delivers bytes to a
/// participant addressed by its public identifier.
#[async_trait]
pub trait BytesBus: Debug + Send + Sync {
    async fn send_to_participant(&self, recipient: &str, msg: Vec<u8>) -> Result<(), BusError>;
}

/// Point-to-point delivery of protocol messages. At-least-once: messages
/// may be duplicated, receivers have to cope with that.
#[async_trait]
pub trait MessageBus: Debug + Send + Sync {
    async fn send(&self, msg: ProtocolMessage) -> Result<(), BusError>;
}
