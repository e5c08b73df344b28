//! Remote invocation transport.
//!
//! Outgoing envelopes are stamped with a per-destination sequence number and
//! aggregated into per-destination buffers; a buffer is handed to the
//! [`Fabric`] as one batch when it fills up or when it is flushed explicitly.
//! Incoming batches pass through the [`Sequencer`] so envelopes from one
//! sender are released in the order they were issued.

pub mod buffer;
pub mod calls;
pub mod codec;
pub mod collective;
pub mod envelope;
pub mod fabric;
pub mod sequencer;
pub mod stats;

pub use buffer::OutgoingBuffer;
pub use calls::PendingCalls;
pub use codec::Codec;
pub use collective::{Collectives, ROOT};
pub use envelope::{Envelope, MethodId, Opcode, Packet};
pub use fabric::Fabric;
pub use sequencer::Sequencer;
pub use stats::{StatsSnapshot, TransportStats};

use crate::core::config::RuntimeConfig;
use crate::core::errors::Result;
use crate::location::LocationId;
use std::sync::Arc;
use tracing::trace;

/// Sending and ordering state of one location
#[derive(Debug)]
pub struct Transport {
    here: LocationId,
    fabric: Arc<Fabric>,
    buffers: Vec<OutgoingBuffer>,
    sequencer: Sequencer,
    stats: Arc<TransportStats>,
}

impl Transport {
    pub fn new(
        here: LocationId,
        config: &RuntimeConfig,
        fabric: Arc<Fabric>,
        stats: Arc<TransportStats>,
    ) -> Self {
        let locations = fabric.locations();
        Self {
            here,
            buffers: (0..locations)
                .map(|_| OutgoingBuffer::new(config.aggregation_limit, config.aggregation_bytes))
                .collect(),
            sequencer: Sequencer::new(locations),
            fabric,
            stats,
        }
    }

    /// Stamp and buffer an envelope. A full buffer is flushed before
    /// returning, so the sender stalls until the batch is on the fabric.
    pub fn enqueue(&mut self, destination: LocationId, mut envelope: Envelope) -> Result<()> {
        envelope.seq = self.sequencer.stamp(destination);
        if self.buffers[destination].push(envelope) {
            self.flush(destination)?;
        }
        Ok(())
    }

    pub fn flush(&mut self, destination: LocationId) -> Result<()> {
        let buffer = &mut self.buffers[destination];
        if buffer.is_empty() {
            return Ok(());
        }
        let bytes = buffer.bytes();
        let envelopes = buffer.take();
        trace!(
            destination,
            envelopes = envelopes.len(),
            bytes,
            "flushing batch"
        );
        self.stats.record_batch(envelopes.len(), bytes);
        self.fabric.send(
            destination,
            Packet::Batch {
                source: self.here,
                envelopes,
            },
        )
    }

    pub fn flush_all(&mut self) -> Result<()> {
        for destination in 0..self.buffers.len() {
            self.flush(destination)?;
        }
        Ok(())
    }

    pub fn has_unflushed(&self) -> bool {
        self.buffers.iter().any(|b| !b.is_empty())
    }

    /// Pass an incoming envelope through sequencing
    pub fn admit(&mut self, envelope: Envelope) -> Vec<Envelope> {
        self.sequencer.admit(envelope)
    }
}
