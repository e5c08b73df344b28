use crate::location::{LocationId, ObjectHandle};
use bytes::Bytes;

/// Method selector within a remote object
pub type MethodId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Fire-and-forget request
    Async,
    /// Request whose caller is blocked waiting for a reply
    SyncRequest,
    /// Reply to a `SyncRequest`, matched by call tag
    SyncReply,
    /// Contribution to a reduction, sent to the root
    Reduce,
    /// Reduction result, sent by the root
    Broadcast,
    /// Ask the receiver to flush its outgoing buffers
    Flush,
}

/// One message on the wire.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub opcode: Opcode,
    pub source: LocationId,
    pub handle: ObjectHandle,
    pub method: MethodId,
    /// Per (source, destination) sequence number, assigned when the envelope is buffered
    pub seq: u64,
    /// Call id for sync traffic, round number for collectives
    pub tag: u64,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(
        opcode: Opcode,
        source: LocationId,
        handle: ObjectHandle,
        method: MethodId,
        tag: u64,
        payload: Bytes,
    ) -> Self {
        Self {
            opcode,
            source,
            handle,
            method,
            seq: 0,
            tag,
            payload,
        }
    }

    /// Bytes counted against aggregation limits
    pub fn wire_size(&self) -> usize {
        self.payload.len() + std::mem::size_of::<Self>()
    }
}

/// Unit of delivery between two locations
#[derive(Debug)]
pub enum Packet {
    /// Aggregated envelopes from one source, in sequence order
    Batch {
        source: LocationId,
        envelopes: Vec<Envelope>,
    },
    /// The job is being torn down
    Abort { origin: LocationId, reason: String },
}
