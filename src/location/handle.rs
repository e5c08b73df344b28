use super::LocationId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a registered object.
///
/// Objects constructed collectively (one per location, in the same order)
/// receive the same id everywhere, so a handle obtained on one location
/// addresses the matching object on any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectHandle {
    id: u32,
    owner: LocationId,
}

impl ObjectHandle {
    /// Reserved for location-wide collectives (fence, barrier)
    pub const LOCATION: ObjectHandle = ObjectHandle { id: 0, owner: 0 };

    pub fn new(id: u32, owner: LocationId) -> Self {
        Self { id, owner }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn owner(&self) -> LocationId {
        self.owner
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.id, self.owner)
    }
}
