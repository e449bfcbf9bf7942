use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::Error;
use crate::packet::CorrelationId;

/// Outstanding outgoing calls, keyed by correlation id.
///
/// Ids come from a counter scoped to this table, so two channels in one
/// process never contend for id space. An id is unique among the calls that
/// are currently pending; the counter would have to lap `u64` while a call
/// stayed pending for a collision to occur.
#[derive(Debug, Default)]
pub(crate) struct CorrelationTable {
    next_id: CorrelationId,
    pending: HashMap<CorrelationId, PendingCall>,
}

/// One not-yet-settled outgoing call.
#[derive(Debug)]
pub(crate) struct PendingCall {
    completion: oneshot::Sender<crate::Result<Value>>,
}

impl PendingCall {
    pub fn settle(self, outcome: crate::Result<Value>) {
        // The caller may have dropped its future; that only means nobody is
        // listening for this settlement.
        let _ = self.completion.send(outcome);
    }
}

impl CorrelationTable {
    /// Allocate a fresh id and track the completion under it.
    pub fn register(&mut self, completion: oneshot::Sender<crate::Result<Value>>) -> CorrelationId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.pending.insert(id, PendingCall { completion });
        id
    }

    /// Remove and return the pending call for `id`, if one is outstanding.
    pub fn take(&mut self, id: CorrelationId) -> Option<PendingCall> {
        self.pending.remove(&id)
    }

    /// Settle every pending call with clones of one reason.
    pub fn reject_all(&mut self, reason: &Error) {
        for (id, pending) in self.pending.drain() {
            log::debug!("{id} rejecting pending call: {reason}");
            pending.settle(Err(reason.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
