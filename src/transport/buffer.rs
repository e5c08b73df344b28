use super::envelope::Envelope;

/// Per-destination aggregation buffer
#[derive(Debug)]
pub struct OutgoingBuffer {
    envelopes: Vec<Envelope>,
    bytes: usize,
    max_envelopes: usize,
    max_bytes: usize,
}

impl OutgoingBuffer {
    pub fn new(max_envelopes: usize, max_bytes: usize) -> Self {
        Self {
            envelopes: Vec::new(),
            bytes: 0,
            max_envelopes,
            max_bytes,
        }
    }

    /// Append an envelope; returns true when the buffer must be flushed
    /// before anything else is sent to this destination.
    pub fn push(&mut self, envelope: Envelope) -> bool {
        self.bytes += envelope.wire_size();
        self.envelopes.push(envelope);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.envelopes.len() >= self.max_envelopes || self.bytes >= self.max_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Take everything buffered, in insertion order
    pub fn take(&mut self) -> Vec<Envelope> {
        self.bytes = 0;
        std::mem::take(&mut self.envelopes)
    }
}
