//! Fence: collective quiescence detection.
//!
//! Every round, each location drains its local work and messages, then votes
//! with its activity and its cumulative request counters. A round whose
//! global vote is quiescent (nobody active, every request sent has been
//! processed) is only trusted once the next round reports exactly the same
//! counters: since the counters only grow, equality proves nothing was sent
//! or processed in between.

use crate::core::errors::{Result, TesseraError};
use crate::location::{Location, ObjectHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// One location's contribution to a fence round, or the sum of all of them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FenceVote {
    /// Locations with runnable or pending local work
    pub active: u64,
    /// Requests issued
    pub sent: u64,
    /// Requests processed
    pub processed: u64,
}

impl FenceVote {
    pub fn combine(self, other: FenceVote) -> FenceVote {
        FenceVote {
            active: self.active + other.active,
            sent: self.sent + other.sent,
            processed: self.processed + other.processed,
        }
    }

    pub fn is_quiescent(&self) -> bool {
        self.active == 0 && self.sent == self.processed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    /// The last round saw activity or messages in flight
    Probing,
    /// The last round looked quiescent; the next must confirm it
    Confirming(FenceVote),
    Terminated,
}

/// Decides termination from the sequence of global votes.
///
/// Every location observes the same global votes, so every location reaches
/// `Terminated` in the same round.
#[derive(Debug)]
pub struct TerminationDetector {
    state: FenceState,
    rounds: u64,
}

impl Default for TerminationDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationDetector {
    pub fn new() -> Self {
        Self {
            state: FenceState::Probing,
            rounds: 0,
        }
    }

    pub fn observe(&mut self, global: FenceVote) -> FenceState {
        self.rounds += 1;
        self.state = if !global.is_quiescent() {
            FenceState::Probing
        } else {
            match self.state {
                FenceState::Confirming(previous) if previous == global => FenceState::Terminated,
                _ => FenceState::Confirming(global),
            }
        };
        self.state
    }

    pub fn state(&self) -> FenceState {
        self.state
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }
}

impl Location {
    /// This location's vote for the current fence round
    pub fn local_vote(&self) -> FenceVote {
        let (sent, processed) = self.transport_stats().request_counts();
        FenceVote {
            active: u64::from(self.is_active()),
            sent,
            processed,
        }
    }

    /// Block until every location is idle and no request is in flight.
    ///
    /// Collective: every location must call it. Incoming requests and local
    /// work keep being processed while waiting.
    ///
    /// # Panics
    ///
    /// Panics when called from within a task body.
    pub fn fence(&self) -> Result<()> {
        assert!(!self.in_task(), "fence called from within a task body");
        let mut detector = TerminationDetector::new();
        loop {
            self.drain()?;
            let vote = self.local_vote();
            let global = self.invoke_reduce(ObjectHandle::LOCATION, vote, FenceVote::combine)?;
            self.transport_stats().record_fence_round();

            let state = detector.observe(global);
            trace!(?vote, ?global, ?state, "fence round");
            if state == FenceState::Terminated {
                debug!(rounds = detector.rounds(), "fence complete");
                return Ok(());
            }
            if let Some(limit) = self.config().max_fence_rounds {
                if detector.rounds() >= limit {
                    return Err(TesseraError::FenceDiverged {
                        rounds: detector.rounds(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RuntimeConfig;
    use pretty_assertions::assert_eq;

    fn vote(active: u64, sent: u64, processed: u64) -> FenceVote {
        FenceVote {
            active,
            sent,
            processed,
        }
    }

    #[test]
    fn test_needs_two_matching_quiescent_rounds() {
        let mut detector = TerminationDetector::new();
        assert_eq!(
            detector.observe(vote(0, 4, 4)),
            FenceState::Confirming(vote(0, 4, 4))
        );
        assert_eq!(detector.observe(vote(0, 4, 4)), FenceState::Terminated);
        assert_eq!(detector.rounds(), 2);
    }

    #[test]
    fn test_traffic_between_rounds_restarts_confirmation() {
        let mut detector = TerminationDetector::new();
        detector.observe(vote(0, 4, 4));
        // a message was sent and processed between the rounds
        assert_eq!(
            detector.observe(vote(0, 5, 5)),
            FenceState::Confirming(vote(0, 5, 5))
        );
        assert_eq!(detector.observe(vote(0, 5, 5)), FenceState::Terminated);
    }

    #[test]
    fn test_activity_or_in_flight_keeps_probing() {
        let mut detector = TerminationDetector::new();
        assert_eq!(detector.observe(vote(1, 0, 0)), FenceState::Probing);
        assert_eq!(detector.observe(vote(0, 3, 2)), FenceState::Probing);
        detector.observe(vote(0, 3, 3));
        assert_eq!(detector.observe(vote(1, 3, 3)), FenceState::Probing);
        assert_eq!(detector.state(), FenceState::Probing);
    }

    #[test]
    fn test_combine() {
        assert_eq!(vote(1, 2, 3).combine(vote(0, 5, 1)), vote(1, 7, 4));
        assert!(FenceVote::default().is_quiescent());
    }

    #[test]
    fn test_single_location_fence() {
        let location = Location::standalone(RuntimeConfig::default());
        location.fence().unwrap();
        assert_eq!(location.stats().fence_rounds, 2);
    }

    #[test]
    #[should_panic(expected = "fence called from within a task body")]
    fn test_fence_inside_task_is_fatal() {
        let location = Location::standalone(RuntimeConfig::default());
        let _ = location.run_task(|| location.fence());
    }
}
