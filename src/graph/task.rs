use super::notifier::DetailLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Task identifier: the location that added (and runs) the task, and its
/// index among that location's tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    location: u32,
    index: u32,
}

impl TaskId {
    pub const fn new(location: u32, index: u32) -> Self {
        Self { location, index }
    }

    /// Owning location
    pub fn location(&self) -> usize {
        self.location as usize
    }

    pub fn local_index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.location, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Unspawned,
    Ready,
    Running,
    Done,
}

/// Transformation applied to a producer's value before it reaches a consumer
pub type Filter<V> = Rc<dyn Fn(&V) -> V>;

/// One input of a task: which output it reads, and how
pub struct ProducerInfo<V> {
    pub(crate) task: TaskId,
    pub(crate) level: DetailLevel,
    pub(crate) filter: Option<Filter<V>>,
}

impl<V> ProducerInfo<V> {
    /// Read the producer's value
    pub fn value(task: TaskId) -> Self {
        Self {
            task,
            level: DetailLevel::Full,
            filter: None,
        }
    }

    /// Only wait for the producer to run; the input carries no value
    pub fn signal(task: TaskId) -> Self {
        Self {
            task,
            level: DetailLevel::Signal,
            filter: None,
        }
    }

    /// Read the producer's value through `filter`
    pub fn filtered(task: TaskId, filter: impl Fn(&V) -> V + 'static) -> Self {
        Self {
            task,
            level: DetailLevel::Full,
            filter: Some(Rc::new(filter)),
        }
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn level(&self) -> DetailLevel {
        self.level
    }
}

impl<V> Clone for ProducerInfo<V> {
    fn clone(&self) -> Self {
        Self {
            task: self.task,
            level: self.level,
            filter: self.filter.clone(),
        }
    }
}

impl<V> fmt::Debug for ProducerInfo<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerInfo")
            .field("task", &self.task)
            .field("level", &self.level)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl<V> From<TaskId> for ProducerInfo<V> {
    fn from(task: TaskId) -> Self {
        ProducerInfo::value(task)
    }
}

/// Input values handed to a work callable, in declaration order.
/// Signal-only inputs are `None`.
#[derive(Debug)]
pub struct Inputs<V> {
    values: Vec<Option<V>>,
}

impl<V> Inputs<V> {
    pub(crate) fn new(values: Vec<Option<V>>) -> Self {
        Self { values }
    }

    pub fn get(&self, slot: usize) -> Option<&V> {
        self.values.get(slot).and_then(Option::as_ref)
    }

    /// The value of input `slot`, or an error naming the missing slot
    pub fn value(&self, slot: usize) -> anyhow::Result<&V> {
        self.get(slot)
            .ok_or_else(|| anyhow::anyhow!("input {} carries no value", slot))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Every value-carrying input, in order
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.values.iter().flatten()
    }
}

/// The work a task performs once its inputs are available
pub trait Work<V> {
    fn execute(&mut self, inputs: &Inputs<V>) -> anyhow::Result<V>;
}

impl<V, F> Work<V> for F
where
    F: FnMut(&Inputs<V>) -> anyhow::Result<V>,
{
    fn execute(&mut self, inputs: &Inputs<V>) -> anyhow::Result<V> {
        self(inputs)
    }
}

/// Input slot of a task in the arena
pub(crate) struct InputSlot<V> {
    pub producer: TaskId,
    pub level: DetailLevel,
    pub filter: Option<Filter<V>>,
    pub value: Option<V>,
    pub resolved: bool,
}

/// Task record in the graph arena
pub(crate) struct TaskSlot<V> {
    pub id: TaskId,
    /// `None` while running, and always for placeholders
    pub work: Option<Box<dyn Work<V>>>,
    pub placeholder: bool,
    pub inputs: Vec<InputSlot<V>>,
    pub pending: usize,
    pub state: TaskState,
}

impl<V> TaskSlot<V> {
    /// Restore the slot to the start of an epoch
    pub fn rewind(&mut self) {
        self.pending = self.inputs.len();
        for input in &mut self.inputs {
            input.value = None;
            input.resolved = false;
        }
        self.state = TaskState::Unspawned;
    }
}
