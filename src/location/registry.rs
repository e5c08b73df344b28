use super::RemoteObject;
use crate::transport::Envelope;
use std::collections::HashMap;
use std::rc::Rc;

/// Result of resolving an object id
pub enum Lookup {
    Live(Rc<dyn RemoteObject>),
    /// The id has not been handed out yet on this location
    NotYetRegistered,
    /// The id was registered and has since been unregistered
    Unregistered,
}

/// Local object table of one location.
///
/// Ids are handed out in increasing order starting at 1 and never reused.
pub struct Registry {
    objects: HashMap<u32, Rc<dyn RemoteObject>>,
    parked: HashMap<u32, Vec<Envelope>>,
    next_id: u32,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            parked: HashMap::new(),
            next_id: 1,
        }
    }

    /// Hand out the next id
    pub fn reserve(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self
            .next_id
            .checked_add(1)
            .unwrap_or_else(|| panic!("object ids exhausted"));
        id
    }

    /// Bind a reserved id to its object. Returns the requests that arrived
    /// for the id before it was bound.
    pub fn insert(&mut self, id: u32, object: Rc<dyn RemoteObject>) -> Vec<Envelope> {
        assert!(id != 0 && id < self.next_id, "object id {} was never reserved", id);
        if self.objects.insert(id, object).is_some() {
            panic!("object id {} registered twice", id);
        }
        self.parked.remove(&id).unwrap_or_default()
    }

    pub fn remove(&mut self, id: u32) -> Rc<dyn RemoteObject> {
        match self.objects.remove(&id) {
            Some(object) => object,
            None => panic!("unregister of unknown object id {}", id),
        }
    }

    pub fn lookup(&self, id: u32) -> Lookup {
        match self.objects.get(&id) {
            Some(object) => Lookup::Live(object.clone()),
            None if id >= self.next_id => Lookup::NotYetRegistered,
            None => Lookup::Unregistered,
        }
    }

    /// Hold a request until its object is registered
    pub fn park(&mut self, envelope: Envelope) {
        self.parked
            .entry(envelope.handle.id())
            .or_default()
            .push(envelope);
    }

    pub fn parked(&self) -> usize {
        self.parked.values().map(Vec::len).sum()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
