use super::{BusError, BytesBus, MessageBus, WireError};
use crate::{messages::ProtocolMessage, perunwire::Envelope};
use async_trait::async_trait;
use prost::{bytes::BufMut, Message};

/// Length prefix size in bytes.
const PREFIX: usize = 2;

#[derive(Debug)]
pub struct ProtoBufEncodingLayer<B: BytesBus> {
    pub bus: B,
}

impl<B: BytesBus> ProtoBufEncodingLayer<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    fn encode<T: Message>(msg: T) -> Result<Vec<u8>, WireError> {
        // Go-perun writes a u16 for the length (2 bytes), this means we cannot
        // use `encode_length_delimited`, which would write a variable length
        // integer using LEB128.
        let len = msg.encoded_len();
        let prefix = u16::try_from(len).map_err(|_| WireError::TooLarge(len))?;

        let mut buf = Vec::with_capacity(PREFIX + len);
        buf.put_slice(&prefix.to_be_bytes());
        msg.encode(&mut buf)
            .map_err(|e| WireError::Protobuf(e.to_string()))?;
        Ok(buf)
    }
}

#[async_trait]
impl<B: BytesBus> MessageBus for ProtoBufEncodingLayer<B> {
    async fn send(&self, msg: ProtocolMessage) -> Result<(), BusError> {
        let recipient = msg.to.clone();
        let buf = Self::encode(Envelope::from(msg))?;
        self.bus.send_to_participant(&recipient, buf).await
    }
}

/// Decodes one frame produced by [ProtoBufEncodingLayer].
pub fn decode_message(frame: &[u8]) -> Result<ProtocolMessage, WireError> {
    if frame.len() < PREFIX {
        return Err(WireError::Truncated);
    }
    let len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    let body = frame
        .get(PREFIX..PREFIX + len)
        .ok_or(WireError::Truncated)?;
    let envelope = Envelope::decode(body).map_err(|e| WireError::Protobuf(e.to_string()))?;
    Ok(ProtocolMessage::try_from(envelope)?)
}
