use crate::location::LocationId;
use bytes::Bytes;
use std::collections::HashMap;

#[derive(Debug)]
struct OpenCall {
    target: LocationId,
    reply: Option<Bytes>,
}

/// Suspended round-trip calls awaiting their reply.
///
/// Each blocked `invoke_sync` owns one record; nested calls issued while
/// pumping open further records, so the table depth is the reentrancy depth.
#[derive(Debug, Default)]
pub struct PendingCalls {
    next_id: u64,
    open: HashMap<u64, OpenCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, target: LocationId) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.open.insert(id, OpenCall {
            target,
            reply: None,
        });
        id
    }

    /// Record the reply for `id`
    pub fn complete(&mut self, id: u64, reply: Bytes) {
        match self.open.get_mut(&id) {
            Some(call) if call.reply.is_none() => call.reply = Some(reply),
            Some(call) => panic!(
                "second reply for call {} to location {}",
                id, call.target
            ),
            None => panic!("reply for unknown call {}", id),
        }
    }

    /// Remove and return the reply once it has arrived
    pub fn take(&mut self, id: u64) -> Option<Bytes> {
        if self.open.get(&id)?.reply.is_none() {
            return None;
        }
        self.open.remove(&id).and_then(|call| call.reply)
    }

    /// Calls currently suspended
    pub fn depth(&self) -> usize {
        self.open.len()
    }
}
