use super::{BusError, BytesBus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    mailboxes: HashMap<String, mpsc::UnboundedSender<Vec<u8>>>,
    duplicate: bool,
    dropped: HashSet<String>,
}

/// [BytesBus] delivering frames to receivers in the same process.
///
/// Clones share the same routing table. Delivery can be made unreliable in
/// two ways: every frame delivered twice, or frames to some participants
/// silently lost.
#[derive(Debug, Clone, Default)]
pub struct InProcessBus {
    inner: Arc<Mutex<Inner>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `identifier` and returns the receiving end of its mailbox.
    /// Connecting again replaces the previous mailbox.
    pub fn connect(&self, identifier: &str) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().mailboxes.insert(identifier.to_owned(), tx);
        rx
    }

    pub fn set_duplicate_delivery(&self, duplicate: bool) {
        self.inner.lock().duplicate = duplicate;
    }

    pub fn drop_messages_to(&self, identifier: &str, drop: bool) {
        let mut inner = self.inner.lock();
        if drop {
            inner.dropped.insert(identifier.to_owned());
        } else {
            inner.dropped.remove(identifier);
        }
    }
}

#[async_trait]
impl BytesBus for InProcessBus {
    async fn send_to_participant(&self, recipient: &str, msg: Vec<u8>) -> Result<(), BusError> {
        let inner = self.inner.lock();
        let mailbox = inner
            .mailboxes
            .get(recipient)
            .ok_or_else(|| BusError::UnknownRecipient(recipient.to_owned()))?;

        if inner.dropped.contains(recipient) {
            debug!(recipient, "dropping frame");
            return Ok(());
        }
        if inner.duplicate {
            mailbox
                .send(msg.clone())
                .map_err(|_| BusError::UnknownRecipient(recipient.to_owned()))?;
        }
        mailbox
            .send(msg)
            .map_err(|_| BusError::UnknownRecipient(recipient.to_owned()))
    }
}
