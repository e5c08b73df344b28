//! Edge container: flow state, value and notifiers for every task output
//! known to one location.
//!
//! Entries exist for the outputs of local tasks and, as proxies, for remote
//! outputs that local consumers read. A proxy records which detail level has
//! already been requested from the producer's location so that location is
//! asked at most once per level, whatever the number of local consumers.

use super::notifier::{DetailLevel, Delivery, Flow, FlowState, Notifier, NotifierList};
use super::task::TaskId;
use crate::location::LocationId;
use std::collections::HashMap;

/// Follow-up work produced by a flush, carried out by the graph
#[derive(Debug, PartialEq)]
pub enum Dispatch<V> {
    /// Resolve input `slot` of a local task
    Task {
        consumer: TaskId,
        slot: usize,
        value: Option<V>,
    },
    /// Notify one remote location, once, at the strongest level it is owed
    Remote {
        producer: TaskId,
        location: LocationId,
        level: DetailLevel,
    },
}

#[derive(Debug)]
struct EdgeEntry<V> {
    state: FlowState,
    value: Option<V>,
    notifiers: NotifierList<V>,
    requested: Option<DetailLevel>,
}

impl<V> EdgeEntry<V> {
    fn new() -> Self {
        Self {
            state: FlowState::Empty,
            value: None,
            notifiers: NotifierList::new(),
            requested: None,
        }
    }
}

#[derive(Debug)]
pub struct EdgeContainer<V> {
    persistent: bool,
    entries: HashMap<TaskId, EdgeEntry<V>>,
}

impl<V: Clone> EdgeContainer<V> {
    pub fn new(persistent: bool) -> Self {
        Self {
            persistent,
            entries: HashMap::new(),
        }
    }

    fn entry(&mut self, task: TaskId) -> &mut EdgeEntry<V> {
        self.entries.entry(task).or_insert_with(EdgeEntry::new)
    }

    /// Register interest in `task`'s output; delivers immediately if the edge
    /// already satisfies the requested level.
    pub fn add_notifier(&mut self, task: TaskId, notifier: Notifier<V>) -> Vec<Dispatch<V>> {
        let persistent = self.persistent;
        let entry = self.entry(task);
        entry.notifiers.add(notifier);
        if entry.state == FlowState::Empty {
            return Vec::new();
        }
        flush(task, entry, persistent)
    }

    /// Store the value and flush.
    ///
    /// # Panics
    ///
    /// Panics if the value was already set this epoch.
    pub fn set_value(&mut self, task: TaskId, value: V) -> Vec<Dispatch<V>> {
        let persistent = self.persistent;
        let entry = self.entry(task);
        if entry.state == FlowState::Full {
            panic!("value for task {} set twice in one epoch", task);
        }
        entry.state = FlowState::Full;
        entry.value = Some(value);
        flush(task, entry, persistent)
    }

    /// Mark the output as existing without content. No effect once the edge
    /// has moved past `Empty`.
    pub fn signal(&mut self, task: TaskId) -> Vec<Dispatch<V>> {
        let persistent = self.persistent;
        let entry = self.entry(task);
        if entry.state != FlowState::Empty {
            return Vec::new();
        }
        entry.state = FlowState::Signalled;
        flush(task, entry, persistent)
    }

    /// Note that a local consumer needs `level` from a remote producer.
    /// Returns the level to request from the producer's location, or `None`
    /// if an equal or stronger request was already sent.
    pub fn note_request(&mut self, task: TaskId, level: DetailLevel) -> Option<DetailLevel> {
        let entry = self.entry(task);
        match entry.requested {
            Some(requested) if requested >= level => None,
            _ => {
                entry.requested = Some(level);
                Some(level)
            }
        }
    }

    pub fn state(&self, task: TaskId) -> FlowState {
        self.entries
            .get(&task)
            .map_or(FlowState::Empty, |entry| entry.state)
    }

    pub fn value(&self, task: TaskId) -> Option<&V> {
        self.entries.get(&task).and_then(|entry| entry.value.as_ref())
    }

    /// Registrations still waiting on `task`
    pub fn waiting(&self, task: TaskId) -> usize {
        self.entries
            .get(&task)
            .map_or(0, |entry| entry.notifiers.pending())
    }

    /// Start a new epoch: every edge back to `Empty`, retained notifiers re-armed.
    ///
    /// # Panics
    ///
    /// Panics on a non-persistent container.
    pub fn reset(&mut self) {
        assert!(self.persistent, "reset of a non-persistent edge container");
        for entry in self.entries.values_mut() {
            entry.state = FlowState::Empty;
            entry.value = None;
            entry.notifiers.rearm();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn flush<V: Clone>(task: TaskId, entry: &mut EdgeEntry<V>, persistent: bool) -> Vec<Dispatch<V>> {
    let EdgeEntry {
        state,
        value,
        notifiers,
        ..
    } = entry;

    let mut dispatches = Vec::new();
    let mut remote: Vec<(LocationId, DetailLevel)> = Vec::new();
    notifiers.flush(*state, persistent, |delivery, level| match delivery {
        Delivery::Task { consumer, slot } => dispatches.push(Dispatch::Task {
            consumer: *consumer,
            slot: *slot,
            value: match level {
                DetailLevel::Full => value.clone(),
                DetailLevel::Signal => None,
            },
        }),
        Delivery::Remote(location) => {
            match remote.iter_mut().find(|(l, _)| *l == *location) {
                Some((_, owed)) => *owed = (*owed).max(level),
                None => remote.push((*location, level)),
            }
        }
        Delivery::Callback { callback, .. } => {
            let flow = match (level, value.as_ref()) {
                (DetailLevel::Full, Some(v)) => Flow::Full(v),
                _ => Flow::Signal,
            };
            callback(task, flow);
        }
    });

    dispatches.extend(
        remote
            .into_iter()
            .map(|(location, level)| Dispatch::Remote {
                producer: task,
                location,
                level,
            }),
    );
    dispatches
}
