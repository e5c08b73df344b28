//! Notifier list: the consumers waiting on one edge.
//!
//! Every registration is delivered at most once per epoch at the detail level
//! it asked for, whether it registered before or after the value appeared.
//! A registration from a requester that already holds a weaker one upgrades
//! the existing entry instead of adding a second.

use super::task::TaskId;
use crate::location::LocationId;
use serde::{Deserialize, Serialize};

/// How much of a producer's output a consumer needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DetailLevel {
    /// Only that the producer has run
    Signal,
    /// The produced value
    Full,
}

/// Flow state of an edge within one epoch. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FlowState {
    Empty,
    Signalled,
    Full,
}

impl FlowState {
    pub fn satisfies(&self, level: DetailLevel) -> bool {
        match level {
            DetailLevel::Signal => *self >= FlowState::Signalled,
            DetailLevel::Full => *self == FlowState::Full,
        }
    }
}

/// What a notification carries
#[derive(Debug)]
pub enum Flow<'a, V> {
    Signal,
    Full(&'a V),
}

impl<'a, V> Flow<'a, V> {
    pub fn value(&self) -> Option<&'a V> {
        match self {
            Flow::Signal => None,
            Flow::Full(value) => Some(value),
        }
    }
}

pub type Callback<V> = Box<dyn FnMut(TaskId, Flow<'_, V>)>;

/// Identity of a registration, used to detect upgrades and duplicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requester {
    /// Another location, on behalf of all of its consumers
    Remote(LocationId),
    /// An input slot of a local task
    Task { task: TaskId, slot: usize },
    /// A callback registered by the application
    External(u64),
}

/// Where a notification goes
pub enum Delivery<V> {
    Task { consumer: TaskId, slot: usize },
    Remote(LocationId),
    Callback { token: u64, callback: Callback<V> },
}

impl<V> Delivery<V> {
    pub fn requester(&self) -> Requester {
        match self {
            Delivery::Task { consumer, slot } => Requester::Task {
                task: *consumer,
                slot: *slot,
            },
            Delivery::Remote(location) => Requester::Remote(*location),
            Delivery::Callback { token, .. } => Requester::External(*token),
        }
    }
}

impl<V> std::fmt::Debug for Delivery<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.requester())
    }
}

#[derive(Debug)]
pub struct Notifier<V> {
    pub delivery: Delivery<V>,
    pub level: DetailLevel,
    /// Kept for the next epoch after delivery, when the list is persistent
    pub persistent: bool,
}

impl<V> Notifier<V> {
    pub fn new(delivery: Delivery<V>, level: DetailLevel, persistent: bool) -> Self {
        Self {
            delivery,
            level,
            persistent,
        }
    }

    pub fn requester(&self) -> Requester {
        self.delivery.requester()
    }
}

#[derive(Debug)]
struct Entry<V> {
    notifier: Notifier<V>,
    delivered: Option<DetailLevel>,
}

impl<V> Entry<V> {
    fn is_served(&self) -> bool {
        self.delivered.map_or(false, |level| level >= self.notifier.level)
    }
}

#[derive(Debug)]
pub struct NotifierList<V> {
    entries: Vec<Entry<V>>,
    /// Registrations delivered and dropped this epoch
    served: Vec<(Requester, DetailLevel)>,
}

impl<V> Default for NotifierList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> NotifierList<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            served: Vec::new(),
        }
    }

    /// Append a registration, or upgrade the requester's existing one.
    ///
    /// # Panics
    ///
    /// Panics when the requester already registered at the same or a
    /// stronger level this epoch.
    pub fn add(&mut self, notifier: Notifier<V>) {
        let requester = notifier.requester();

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.notifier.requester() == requester)
        {
            if entry.notifier.level < notifier.level {
                entry.notifier.level = notifier.level;
                entry.notifier.delivery = notifier.delivery;
                return;
            }
            panic!(
                "duplicate notifier registration from {:?} at {:?}",
                requester, notifier.level
            );
        }

        if let Some((_, level)) = self.served.iter().find(|(r, _)| *r == requester) {
            if *level >= notifier.level {
                panic!(
                    "duplicate notifier registration from {:?} at {:?}",
                    requester, notifier.level
                );
            }
        }

        self.entries.push(Entry {
            notifier,
            delivered: None,
        });
    }

    /// Deliver every registration that `available` satisfies and has not yet
    /// been delivered at its level, in insertion order. Delivered entries are
    /// kept for re-arming only if both the list and the entry are persistent.
    pub fn flush<F>(&mut self, available: FlowState, persistent: bool, mut deliver: F)
    where
        F: FnMut(&mut Delivery<V>, DetailLevel),
    {
        for entry in &mut self.entries {
            let level = entry.notifier.level;
            if available.satisfies(level) && !entry.is_served() {
                deliver(&mut entry.notifier.delivery, level);
                entry.delivered = Some(level);
            }
        }

        let served = &mut self.served;
        self.entries.retain(|entry| {
            let keep = !entry.is_served() || (persistent && entry.notifier.persistent);
            if !keep {
                served.push((entry.notifier.requester(), entry.notifier.level));
            }
            keep
        });
    }

    /// Make every retained registration deliverable again
    pub fn rearm(&mut self) {
        for entry in &mut self.entries {
            entry.delivered = None;
        }
        self.served.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registrations still waiting for delivery
    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.is_served()).count()
    }
}
