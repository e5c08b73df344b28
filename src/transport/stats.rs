//! Per-location transport counters.
//!
//! The request counters double as the message accounting used by the fence:
//! a request is in flight from the moment it is counted in `requests_sent`
//! until the destination counts it in `requests_processed`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct TransportStats {
    /// Envelopes handed to the fabric
    pub envelopes_sent: AtomicU64,
    /// Aggregated batches handed to the fabric
    pub batches_sent: AtomicU64,
    /// Payload bytes handed to the fabric
    pub bytes_sent: AtomicU64,
    /// Fire-and-forget requests issued
    pub async_sent: AtomicU64,
    /// Fire-and-forget requests issued, per destination
    pub async_sent_to: Vec<AtomicU64>,
    /// Fire-and-forget requests admitted in sequence order
    pub async_received: AtomicU64,
    /// Round-trip requests issued
    pub sync_calls: AtomicU64,
    /// Requests (async or sync) issued
    pub requests_sent: AtomicU64,
    /// Requests (async or sync) handled by a live object
    pub requests_processed: AtomicU64,
    /// Reductions entered
    pub reductions: AtomicU64,
    /// Fence voting rounds
    pub fence_rounds: AtomicU64,
    /// Requests deferred because their object was busy
    pub deferred: AtomicU64,
    /// Requests parked until their object is registered
    pub parked: AtomicU64,
}

impl TransportStats {
    pub fn new(locations: usize) -> Self {
        Self {
            envelopes_sent: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            async_sent: AtomicU64::new(0),
            async_sent_to: (0..locations).map(|_| AtomicU64::new(0)).collect(),
            async_received: AtomicU64::new(0),
            sync_calls: AtomicU64::new(0),
            requests_sent: AtomicU64::new(0),
            requests_processed: AtomicU64::new(0),
            reductions: AtomicU64::new(0),
            fence_rounds: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
            parked: AtomicU64::new(0),
        }
    }

    pub fn record_batch(&self, envelopes: usize, bytes: usize) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.envelopes_sent
            .fetch_add(envelopes as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_async_sent(&self, destination: usize) {
        self.async_sent.fetch_add(1, Ordering::Relaxed);
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = self.async_sent_to.get(destination) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_async_received(&self) {
        self.async_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_call(&self) {
        self.sync_calls.fetch_add(1, Ordering::Relaxed);
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reduction(&self) {
        self.reductions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fence_round(&self) {
        self.fence_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parked(&self) {
        self.parked.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests issued and requests handled, as counted by the fence
    pub fn request_counts(&self) -> (u64, u64) {
        (
            self.requests_sent.load(Ordering::Relaxed),
            self.requests_processed.load(Ordering::Relaxed),
        )
    }

    /// Get current stats snapshot
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            envelopes_sent: self.envelopes_sent.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            async_sent: self.async_sent.load(Ordering::Relaxed),
            async_sent_to: self
                .async_sent_to
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            async_received: self.async_received.load(Ordering::Relaxed),
            sync_calls: self.sync_calls.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            reductions: self.reductions.load(Ordering::Relaxed),
            fence_rounds: self.fence_rounds.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            parked: self.parked.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub envelopes_sent: u64,
    pub batches_sent: u64,
    pub bytes_sent: u64,
    pub async_sent: u64,
    pub async_sent_to: Vec<u64>,
    pub async_received: u64,
    pub sync_calls: u64,
    pub requests_sent: u64,
    pub requests_processed: u64,
    pub reductions: u64,
    pub fence_rounds: u64,
    pub deferred: u64,
    pub parked: u64,
}

impl StatsSnapshot {
    /// Counter growth since an earlier snapshot of the same location
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            envelopes_sent: self.envelopes_sent - earlier.envelopes_sent,
            batches_sent: self.batches_sent - earlier.batches_sent,
            bytes_sent: self.bytes_sent - earlier.bytes_sent,
            async_sent: self.async_sent - earlier.async_sent,
            async_sent_to: self
                .async_sent_to
                .iter()
                .zip(earlier.async_sent_to.iter().chain(std::iter::repeat(&0)))
                .map(|(now, then)| now - then)
                .collect(),
            async_received: self.async_received - earlier.async_received,
            sync_calls: self.sync_calls - earlier.sync_calls,
            requests_sent: self.requests_sent - earlier.requests_sent,
            requests_processed: self.requests_processed - earlier.requests_processed,
            reductions: self.reductions - earlier.reductions,
            fence_rounds: self.fence_rounds - earlier.fence_rounds,
            deferred: self.deferred - earlier.deferred,
            parked: self.parked - earlier.parked,
        }
    }
}
