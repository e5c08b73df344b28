use super::envelope::Envelope;
use crate::location::LocationId;
use std::collections::BTreeMap;

/// Per (sender, receiver) sequence numbering.
///
/// Outgoing envelopes are stamped in program order; incoming envelopes are
/// released strictly in stamp order, holding back anything that arrives early.
#[derive(Debug)]
pub struct Sequencer {
    next_out: Vec<u64>,
    next_in: Vec<u64>,
    holdback: Vec<BTreeMap<u64, Envelope>>,
}

impl Sequencer {
    pub fn new(locations: usize) -> Self {
        Self {
            next_out: vec![0; locations],
            next_in: vec![0; locations],
            holdback: (0..locations).map(|_| BTreeMap::new()).collect(),
        }
    }

    /// Next sequence number towards `destination`
    pub fn stamp(&mut self, destination: LocationId) -> u64 {
        let seq = self.next_out[destination];
        self.next_out[destination] += 1;
        seq
    }

    /// Accept an incoming envelope and return every envelope from its sender
    /// that is now deliverable, in order.
    pub fn admit(&mut self, envelope: Envelope) -> Vec<Envelope> {
        let source = envelope.source;
        let expected = self.next_in[source];

        if envelope.seq < expected {
            panic!(
                "envelope {} from location {} replayed (expected {})",
                envelope.seq, source, expected
            );
        }
        if envelope.seq > expected {
            self.holdback[source].insert(envelope.seq, envelope);
            return Vec::new();
        }

        let mut ready = vec![envelope];
        let mut next = expected + 1;
        while let Some(held) = self.holdback[source].remove(&next) {
            ready.push(held);
            next += 1;
        }
        self.next_in[source] = next;
        ready
    }

    /// Envelopes waiting for an earlier sequence number
    pub fn held_back(&self) -> usize {
        self.holdback.iter().map(BTreeMap::len).sum()
    }
}
