use crate::location::LocationId;
use bytes::Bytes;
use std::collections::HashMap;

/// Location gathering contributions and folding reductions
pub const ROOT: LocationId = 0;

type RoundKey = (u32, u64);

/// Bookkeeping for reductions keyed by (object id, round).
///
/// Every location numbers the collectives it enters on an object, so the
/// k-th reduction on an object matches up across locations without any
/// further agreement.
#[derive(Debug, Default)]
pub struct Collectives {
    rounds: HashMap<u32, u64>,
    gathered: HashMap<RoundKey, Vec<Option<Bytes>>>,
    results: HashMap<RoundKey, Bytes>,
}

impl Collectives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_round(&mut self, object: u32) -> u64 {
        let round = self.rounds.entry(object).or_insert(0);
        let current = *round;
        *round += 1;
        current
    }

    /// Record one location's contribution at the root
    pub fn contribute(
        &mut self,
        object: u32,
        round: u64,
        source: LocationId,
        payload: Bytes,
        locations: usize,
    ) {
        let slots = self
            .gathered
            .entry((object, round))
            .or_insert_with(|| vec![None; locations]);
        if slots[source].is_some() {
            panic!(
                "location {} contributed twice to round {} of object {}",
                source, round, object
            );
        }
        slots[source] = Some(payload);
    }

    /// All contributions in location order, once every location has contributed
    pub fn take_gathered(&mut self, object: u32, round: u64) -> Option<Vec<Bytes>> {
        let complete = self
            .gathered
            .get(&(object, round))
            .map_or(false, |slots| slots.iter().all(Option::is_some));
        if !complete {
            return None;
        }
        self.gathered
            .remove(&(object, round))
            .map(|slots| slots.into_iter().flatten().collect())
    }

    /// Record the folded result broadcast by the root
    pub fn deliver(&mut self, object: u32, round: u64, payload: Bytes) {
        if self.results.insert((object, round), payload).is_some() {
            panic!("round {} of object {} completed twice", round, object);
        }
    }

    pub fn take_result(&mut self, object: u32, round: u64) -> Option<Bytes> {
        self.results.remove(&(object, round))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rounds_are_per_object() {
        let mut collectives = Collectives::new();
        assert_eq!(collectives.next_round(0), 0);
        assert_eq!(collectives.next_round(0), 1);
        assert_eq!(collectives.next_round(4), 0);
    }

    #[test]
    fn test_gather_in_location_order() {
        let mut collectives = Collectives::new();
        collectives.contribute(0, 0, 2, Bytes::from_static(b"c"), 3);
        collectives.contribute(0, 0, 0, Bytes::from_static(b"a"), 3);
        assert!(collectives.take_gathered(0, 0).is_none());

        // a faster location may already be in the next round
        collectives.contribute(0, 1, 1, Bytes::from_static(b"z"), 3);

        collectives.contribute(0, 0, 1, Bytes::from_static(b"b"), 3);
        let gathered = collectives.take_gathered(0, 0).unwrap();
        assert_eq!(
            gathered,
            vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c")
            ]
        );
        assert!(collectives.take_gathered(0, 1).is_none());
    }

    #[test]
    fn test_results() {
        let mut collectives = Collectives::new();
        assert!(collectives.take_result(3, 0).is_none());
        collectives.deliver(3, 0, Bytes::from_static(b"sum"));
        assert_eq!(collectives.take_result(3, 0).unwrap(), Bytes::from_static(b"sum"));
        assert!(collectives.take_result(3, 0).is_none());
    }

    #[test]
    #[should_panic(expected = "contributed twice")]
    fn test_double_contribution_is_fatal() {
        let mut collectives = Collectives::new();
        collectives.contribute(0, 0, 1, Bytes::new(), 2);
        collectives.contribute(0, 0, 1, Bytes::new(), 2);
    }
}
