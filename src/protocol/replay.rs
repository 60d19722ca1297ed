//! Remembers recent runs this party responded to, so a re-delivered opening
//! message is answered from memory instead of being executed again.

use crate::{abiencode::types::Hash, messages::ProtocolMessage};
use lru::LruCache;
use std::num::NonZeroUsize;

#[derive(Debug, Clone)]
enum Record {
    Running,
    Completed(ProtocolMessage),
    Aborted,
}

/// Outcome of [ReplayCache::claim].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Claim {
    /// First time this process id is seen, the caller now owns the run.
    New,
    Running,
    /// Finished earlier, this was the reply.
    Completed(ProtocolMessage),
    Aborted,
}

/// Bounded map `process id → run status`. Lookups do not refresh an entry,
/// so the oldest claims are evicted first.
#[derive(Debug)]
pub(crate) struct ReplayCache {
    runs: LruCache<Hash, Record>,
}

impl ReplayCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            runs: LruCache::new(cap),
        }
    }

    pub(crate) fn claim(&mut self, process_id: Hash) -> Claim {
        match self.runs.peek(&process_id) {
            Some(Record::Running) => Claim::Running,
            Some(Record::Completed(reply)) => Claim::Completed(reply.clone()),
            Some(Record::Aborted) => Claim::Aborted,
            None => {
                self.runs.put(process_id, Record::Running);
                Claim::New
            }
        }
    }

    pub(crate) fn complete(&mut self, process_id: Hash, reply: ProtocolMessage) {
        if let Some(record) = self.runs.peek_mut(&process_id) {
            *record = Record::Completed(reply);
        }
    }

    pub(crate) fn abort(&mut self, process_id: Hash) {
        if let Some(record) = self.runs.peek_mut(&process_id) {
            *record = Record::Aborted;
        }
    }
}
