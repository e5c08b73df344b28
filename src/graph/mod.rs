//! Distributed task graph.
//!
//! Every location builds its own instance of a graph; instances share one
//! object id because locations create graphs in the same order. A task runs
//! on the location that added it. Inputs naming tasks of other locations are
//! resolved through the edge container: the consumer's location asks the
//! producer's location once for the output and fans it out locally.
//!
//! ```ignore
//! runtime.execute(|location| {
//!     let graph = TaskGraph::<i64>::new(location);
//!     let a = graph.add_task(|_| Ok(20), NO_INPUTS)?;
//!     let b = graph.add_task(|inputs| Ok(inputs.value(0)? + 1), [a])?;
//!     graph.fence()?;
//!     Ok(graph.result(b))
//! })?;
//! ```

mod core;
mod edge;
mod notifier;
mod protocol;
mod task;

pub use edge::{Dispatch, EdgeContainer};
pub use notifier::{
    Callback, DetailLevel, Delivery, Flow, FlowState, Notifier, NotifierList, Requester,
};
pub use protocol::{AddNotifier, Deliver, ADD_NOTIFIER, DELIVER};
pub use task::{Filter, Inputs, ProducerInfo, TaskId, TaskState, Work};

use self::core::{GraphCore, GraphShared};
use crate::core::errors::{Result, TesseraError};
use crate::location::{Location, ObjectHandle, Progress};
use crate::scheduler::{FifoScheduler, Scheduler};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::{Ref, RefMut};
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// Values that flow along graph edges
pub trait Value: Clone + Serialize + DeserializeOwned + 'static {}

impl<T> Value for T where T: Clone + Serialize + DeserializeOwned + 'static {}

/// Input list for tasks with no inputs
pub const NO_INPUTS: [TaskId; 0] = [];

/// Builder for [`TaskGraph`]
pub struct GraphBuilder {
    persistent: bool,
    scheduler: Option<Box<dyn Scheduler>>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            persistent: false,
            scheduler: None,
        }
    }

    /// Keep the graph's shape across epochs so it can be `reset` and re-run
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Ready-task policy. Defaults to FIFO.
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    pub fn build<V: Value>(self, location: &Location) -> TaskGraph<'_, V> {
        let persistent = self.persistent;
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Box::new(FifoScheduler::new()));

        let (handle, shared) = location.register_with(|handle| {
            Rc::new(GraphShared::new(GraphCore::new(
                location.id(),
                location.locations(),
                handle,
                persistent,
                scheduler,
            )))
        });
        let progress: Weak<dyn Progress> = Rc::downgrade(&shared) as Weak<dyn Progress>;
        location.attach_progress(progress);
        debug!(%handle, persistent, "task graph created");

        TaskGraph {
            location,
            shared,
            handle,
        }
    }
}

/// One location's instance of a distributed task graph
pub struct TaskGraph<'loc, V: Value> {
    location: &'loc Location,
    shared: Rc<GraphShared<V>>,
    handle: ObjectHandle,
}

impl<'loc, V: Value> TaskGraph<'loc, V> {
    pub fn new(location: &'loc Location) -> Self {
        GraphBuilder::new().build(location)
    }

    /// A graph whose tasks can be re-run with [`TaskGraph::reset`]
    pub fn persistent(location: &'loc Location) -> Self {
        GraphBuilder::new().persistent(true).build(location)
    }

    fn core(&self) -> Ref<'_, GraphCore<V>> {
        self.shared.core.borrow()
    }

    fn core_mut(&self) -> RefMut<'_, GraphCore<V>> {
        self.shared.core.borrow_mut()
    }

    /// Add a task that runs `work` once every input is available.
    ///
    /// Inputs are task ids (read the value) or [`ProducerInfo`]s (signal only,
    /// or filtered). They may name tasks of any location, including tasks
    /// that have not been added yet.
    pub fn add_task<F, I, P>(&self, work: F, inputs: I) -> Result<TaskId>
    where
        F: FnMut(&Inputs<V>) -> anyhow::Result<V> + 'static,
        I: IntoIterator<Item = P>,
        P: Into<ProducerInfo<V>>,
    {
        self.add_work(work, inputs)
    }

    /// Like [`TaskGraph::add_task`] for any [`Work`] implementation
    pub fn add_work<W, I, P>(&self, work: W, inputs: I) -> Result<TaskId>
    where
        W: Work<V> + 'static,
        I: IntoIterator<Item = P>,
        P: Into<ProducerInfo<V>>,
    {
        let inputs: Vec<ProducerInfo<V>> = inputs.into_iter().map(Into::into).collect();
        self.core_mut()
            .add_task(self.location, Some(Box::new(work)), inputs)
    }

    /// A task with no work whose output is supplied by [`TaskGraph::set_value`]
    /// or [`TaskGraph::signal`]
    pub fn add_placeholder(&self) -> Result<TaskId> {
        self.core_mut().add_task(self.location, None, Vec::new())
    }

    /// Supply a placeholder's value.
    ///
    /// # Panics
    ///
    /// Panics if `task` is not a local placeholder or its value was already
    /// set this epoch.
    pub fn set_value(&self, task: TaskId, value: V) -> Result<()> {
        self.core_mut()
            .complete_placeholder(self.location, task, Some(value))
    }

    /// Mark a placeholder as run without supplying a value
    pub fn signal(&self, task: TaskId) -> Result<()> {
        self.core_mut().complete_placeholder(self.location, task, None)
    }

    /// Input that reads `task`'s value through `filter`
    pub fn consume_from(
        &self,
        task: TaskId,
        filter: impl Fn(&V) -> V + 'static,
    ) -> ProducerInfo<V> {
        ProducerInfo::filtered(task, filter)
    }

    /// Call `callback` on this location once `task`'s output reaches `level`.
    /// `task` may belong to any location. The callback must not use the graph.
    pub fn add_notifier(
        &self,
        task: TaskId,
        level: DetailLevel,
        callback: impl FnMut(TaskId, Flow<'_, V>) + 'static,
    ) -> Result<()> {
        self.core_mut()
            .add_callback(self.location, task, level, Box::new(callback))
    }

    /// Wait for global quiescence. Fails with [`TesseraError::Incomplete`]
    /// when local tasks are still unexecuted afterwards, which happens when
    /// a placeholder is never completed or an input names a task that was
    /// never added.
    pub fn fence(&self) -> Result<()> {
        self.location.fence()?;
        let core = self.core();
        let pending = core.outstanding();
        if pending > 0 {
            warn!(handle = %self.handle, epoch = core.epoch(), pending, "graph quiescent with unexecuted tasks");
            return Err(TesseraError::Incomplete {
                location: self.location.id(),
                pending,
            });
        }
        Ok(())
    }

    /// Start the next epoch of a persistent graph. All locations must reset
    /// between the same pair of fences.
    ///
    /// # Panics
    ///
    /// Panics if the graph is not persistent or tasks of the current epoch
    /// are still outstanding.
    pub fn reset(&self) -> Result<()> {
        self.core_mut().reset(self.location)
    }

    /// Value of `task`'s output, if known on this location
    pub fn result(&self, task: TaskId) -> Option<V> {
        self.core().value(task).cloned()
    }

    /// State of a local task; `None` for tasks of other locations
    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        self.core().task_state(task)
    }

    pub fn flow_state(&self, task: TaskId) -> FlowState {
        self.core().flow_state(task)
    }

    pub fn epoch(&self) -> u64 {
        self.core().epoch()
    }

    /// Local tasks not yet run this epoch
    pub fn outstanding(&self) -> usize {
        self.core().outstanding()
    }

    /// Number of local tasks
    pub fn len(&self) -> usize {
        self.core().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_persistent(&self) -> bool {
        self.core().is_persistent()
    }

    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    pub fn location(&self) -> &'loc Location {
        self.location
    }
}

impl<V: Value> Drop for TaskGraph<'_, V> {
    fn drop(&mut self) {
        self.location.unregister(self.handle);
    }
}
