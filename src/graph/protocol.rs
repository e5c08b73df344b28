//! Messages exchanged between the instances of one graph on different
//! locations. Every message carries the sender's epoch.

use super::notifier::DetailLevel;
use super::task::TaskId;
use crate::transport::MethodId;
use serde::{Deserialize, Serialize};

/// Consumer location asks the producer's location to notify it
pub const ADD_NOTIFIER: MethodId = 1;
/// Producer location notifies a consumer location
pub const DELIVER: MethodId = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddNotifier {
    pub epoch: u64,
    pub task: TaskId,
    pub level: DetailLevel,
}

/// `value` is present for full deliveries and absent for signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deliver<T> {
    pub epoch: u64,
    pub task: TaskId,
    pub value: Option<T>,
}
