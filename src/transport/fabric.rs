use super::envelope::Packet;
use crate::core::errors::{Result, TesseraError};
use crate::location::LocationId;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// In-process interconnect between the locations of one job.
///
/// Each location owns the receiving end of one channel; every location can
/// send to all of them. Channel order gives per-pair FIFO on the medium,
/// and the receiving sequencer enforces it regardless.
#[derive(Debug)]
pub struct Fabric {
    senders: Vec<UnboundedSender<Packet>>,
    aborted: OnceLock<(LocationId, String)>,
}

impl Fabric {
    pub fn new(locations: usize) -> (Arc<Self>, Vec<UnboundedReceiver<Packet>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..locations).map(|_| mpsc::unbounded_channel()).unzip();
        let fabric = Arc::new(Self {
            senders,
            aborted: OnceLock::new(),
        });
        (fabric, receivers)
    }

    pub fn locations(&self) -> usize {
        self.senders.len()
    }

    pub fn send(&self, destination: LocationId, packet: Packet) -> Result<()> {
        let sender = self
            .senders
            .get(destination)
            .ok_or(TesseraError::Unreachable {
                location: destination,
            })?;
        sender.send(packet).map_err(|_| TesseraError::Unreachable {
            location: destination,
        })
    }

    /// Tear the job down. Only the first abort is broadcast.
    pub fn abort(&self, origin: LocationId, reason: impl Into<String>) {
        let reason = reason.into();
        if self.aborted.set((origin, reason.clone())).is_err() {
            debug!(origin, "job already aborted");
            return;
        }
        warn!(origin, %reason, "aborting job");
        for (location, sender) in self.senders.iter().enumerate() {
            if location == origin {
                continue;
            }
            // a location that already finished has dropped its inbox
            let _ = sender.send(Packet::Abort {
                origin,
                reason: reason.clone(),
            });
        }
    }

    /// The first abort, if any
    pub fn abort_reason(&self) -> Option<(LocationId, String)> {
        self.aborted.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_abort_is_broadcast_once() {
        let (fabric, mut inboxes) = Fabric::new(3);
        fabric.abort(1, "first");
        fabric.abort(2, "second");

        assert_eq!(fabric.abort_reason(), Some((1, "first".to_string())));
        assert!(inboxes[1].try_recv().is_err());
        for location in [0, 2] {
            match inboxes[location].try_recv() {
                Ok(Packet::Abort { origin, reason }) => {
                    assert_eq!(origin, 1);
                    assert_eq!(reason, "first");
                }
                other => panic!("expected abort, got {:?}", other),
            }
            assert!(inboxes[location].try_recv().is_err());
        }
    }

    #[test]
    fn test_dropped_inbox_is_unreachable() {
        let (fabric, mut inboxes) = Fabric::new(2);
        inboxes.truncate(1);
        let err = fabric
            .send(
                1,
                Packet::Batch {
                    source: 0,
                    envelopes: Vec::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, TesseraError::Unreachable { location: 1 }));
        assert!(matches!(
            fabric.send(5, Packet::Batch { source: 0, envelopes: Vec::new() }),
            Err(TesseraError::Unreachable { location: 5 })
        ));
    }
}
