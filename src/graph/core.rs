use super::edge::{Dispatch, EdgeContainer};
use super::notifier::{Callback, DetailLevel, Delivery, FlowState, Notifier};
use super::protocol::{AddNotifier, Deliver, ADD_NOTIFIER, DELIVER};
use super::task::{InputSlot, Inputs, ProducerInfo, TaskId, TaskSlot, TaskState, Work};
use super::Value;
use crate::core::errors::{Result, TesseraError};
use crate::location::{Location, LocationId, ObjectHandle, Progress, RemoteObject, Reply, Request};
use crate::scheduler::Scheduler;
use crate::transport::MethodId;
use bytes::Bytes;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// A task taken out of the arena to run
pub(crate) struct Job<V> {
    pub task: TaskId,
    pub work: Box<dyn Work<V>>,
    pub inputs: Inputs<V>,
}

/// State of one graph instance on one location
pub(crate) struct GraphCore<V: Value> {
    here: LocationId,
    locations: usize,
    handle: ObjectHandle,
    persistent: bool,
    epoch: u64,
    tasks: Vec<TaskSlot<V>>,
    edges: EdgeContainer<V>,
    scheduler: Box<dyn Scheduler>,
    outstanding: usize,
    /// Messages from epochs this location has not reached yet
    early: BTreeMap<u64, Vec<(LocationId, MethodId, Bytes)>>,
    next_token: u64,
}

impl<V: Value> GraphCore<V> {
    pub fn new(
        here: LocationId,
        locations: usize,
        handle: ObjectHandle,
        persistent: bool,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        Self {
            here,
            locations,
            handle,
            persistent,
            epoch: 0,
            tasks: Vec::new(),
            edges: EdgeContainer::new(persistent),
            scheduler,
            outstanding: 0,
            early: BTreeMap::new(),
            next_token: 0,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_active(&self) -> bool {
        !self.scheduler.global_empty()
    }

    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        if task.location() != self.here {
            return None;
        }
        self.tasks
            .get(task.local_index() as usize)
            .map(|slot| slot.state)
    }

    pub fn flow_state(&self, task: TaskId) -> FlowState {
        self.edges.state(task)
    }

    pub fn value(&self, task: TaskId) -> Option<&V> {
        self.edges.value(task)
    }

    fn local_slot(&mut self, task: TaskId) -> &mut TaskSlot<V> {
        assert_eq!(
            task.location(),
            self.here,
            "task {} is not owned by location {}",
            task,
            self.here
        );
        match self.tasks.get_mut(task.local_index() as usize) {
            Some(slot) => slot,
            None => panic!("unknown task {}", task),
        }
    }

    /// Add a task (or, without work, a placeholder) and wire its inputs
    pub fn add_task(
        &mut self,
        ctx: &Location,
        work: Option<Box<dyn Work<V>>>,
        inputs: Vec<ProducerInfo<V>>,
    ) -> Result<TaskId> {
        let index = u32::try_from(self.tasks.len())
            .map_err(|_| TesseraError::internal("task index space exhausted"))?;
        let id = TaskId::new(self.here as u32, index);
        let placeholder = work.is_none();

        self.tasks.push(TaskSlot {
            id,
            work,
            placeholder,
            inputs: inputs
                .iter()
                .map(|input| InputSlot {
                    producer: input.task,
                    level: input.level,
                    filter: input.filter.clone(),
                    value: None,
                    resolved: false,
                })
                .collect(),
            pending: inputs.len(),
            state: TaskState::Unspawned,
        });
        self.outstanding += 1;

        for (slot, input) in inputs.iter().enumerate() {
            self.subscribe(
                ctx,
                input.task,
                input.level,
                Delivery::Task { consumer: id, slot },
            )?;
        }
        self.maybe_ready(index as usize);
        trace!(task = %id, inputs = inputs.len(), placeholder, "task added");
        Ok(id)
    }

    /// Register an application callback on `task`'s output
    pub fn add_callback(
        &mut self,
        ctx: &Location,
        task: TaskId,
        level: DetailLevel,
        callback: Callback<V>,
    ) -> Result<()> {
        let token = self.next_token;
        self.next_token += 1;
        self.subscribe(ctx, task, level, Delivery::Callback { token, callback })
    }

    /// Register `delivery` on `producer`'s edge. A remote producer's location
    /// is asked for the edge only the first time this location needs it at
    /// a given level.
    fn subscribe(
        &mut self,
        ctx: &Location,
        producer: TaskId,
        level: DetailLevel,
        delivery: Delivery<V>,
    ) -> Result<()> {
        let owner = producer.location();
        if owner >= self.locations {
            return Err(TesseraError::Unreachable { location: owner });
        }
        let request = if owner == self.here {
            None
        } else {
            self.edges.note_request(producer, level)
        };

        let dispatches = self
            .edges
            .add_notifier(producer, Notifier::new(delivery, level, self.persistent));
        self.apply(ctx, dispatches)?;

        if let Some(level) = request {
            trace!(task = %producer, ?level, "requesting remote edge");
            ctx.invoke_async(
                owner,
                self.handle,
                ADD_NOTIFIER,
                &AddNotifier {
                    epoch: self.epoch,
                    task: producer,
                    level,
                },
            )?;
        }
        Ok(())
    }

    fn apply(&mut self, ctx: &Location, dispatches: Vec<Dispatch<V>>) -> Result<()> {
        for dispatch in dispatches {
            match dispatch {
                Dispatch::Task {
                    consumer,
                    slot,
                    value,
                } => self.feed_input(consumer, slot, value),
                Dispatch::Remote {
                    producer,
                    location,
                    level,
                } => {
                    let value = match level {
                        DetailLevel::Full => self.edges.value(producer),
                        DetailLevel::Signal => None,
                    };
                    let message = Deliver {
                        epoch: self.epoch,
                        task: producer,
                        value,
                    };
                    ctx.invoke_async(location, self.handle, DELIVER, &message)?;
                }
            }
        }
        Ok(())
    }

    fn feed_input(&mut self, consumer: TaskId, slot: usize, value: Option<V>) {
        let index = consumer.local_index() as usize;
        let task = self.local_slot(consumer);
        let input = &mut task.inputs[slot];
        if input.resolved {
            panic!(
                "input {} of task {} (from {}) resolved twice",
                slot, consumer, input.producer
            );
        }
        debug_assert!(
            input.level == DetailLevel::Signal || value.is_some(),
            "value input {} of task {} resolved without a value",
            slot,
            consumer
        );
        input.resolved = true;
        input.value = match (&input.filter, value) {
            (Some(filter), Some(value)) => Some(filter(&value)),
            (_, value) => value,
        };
        task.pending -= 1;
        self.maybe_ready(index);
    }

    fn maybe_ready(&mut self, index: usize) {
        let task = &mut self.tasks[index];
        if task.pending == 0 && task.state == TaskState::Unspawned && !task.placeholder {
            task.state = TaskState::Ready;
            let id = task.id;
            self.scheduler.push(&[id]);
        }
    }

    /// Complete a placeholder with a value (`Some`) or a bare signal (`None`)
    pub fn complete_placeholder(
        &mut self,
        ctx: &Location,
        task: TaskId,
        value: Option<V>,
    ) -> Result<()> {
        let slot = self.local_slot(task);
        assert!(slot.placeholder, "task {} is not a placeholder", task);
        if slot.state != TaskState::Done {
            slot.state = TaskState::Done;
            self.outstanding -= 1;
        }
        let dispatches = match value {
            Some(value) => self.edges.set_value(task, value),
            None => self.edges.signal(task),
        };
        self.apply(ctx, dispatches)
    }

    pub fn next_job(&mut self) -> Option<Job<V>> {
        let task = self.scheduler.pop()?;
        let slot = self.local_slot(task);
        assert_eq!(
            slot.state,
            TaskState::Ready,
            "scheduler returned task {} which is not ready",
            task
        );
        let work = match slot.work.take() {
            Some(work) => work,
            None => panic!("task {} has no work", task),
        };
        slot.state = TaskState::Running;
        let inputs = Inputs::new(slot.inputs.iter_mut().map(|i| i.value.take()).collect());
        Some(Job { task, work, inputs })
    }

    pub fn finish_job(
        &mut self,
        ctx: &Location,
        job: Job<V>,
        output: anyhow::Result<V>,
    ) -> Result<()> {
        let here = self.here;
        let slot = self.local_slot(job.task);
        slot.work = Some(job.work);
        match output {
            Ok(value) => {
                slot.state = TaskState::Done;
                self.outstanding -= 1;
                let dispatches = self.edges.set_value(job.task, value);
                self.apply(ctx, dispatches)
            }
            Err(error) => {
                warn!(task = %job.task, error = %error, "task failed");
                Err(TesseraError::task_failed(job.task, here, error))
            }
        }
    }

    /// Handle a message from the graph's instance on `source`
    pub fn process(
        &mut self,
        ctx: &Location,
        source: LocationId,
        method: MethodId,
        payload: &[u8],
    ) -> Result<()> {
        let codec = ctx.codec();
        match method {
            ADD_NOTIFIER => {
                let message: AddNotifier = codec.decode(payload)?;
                if self.hold_early(message.epoch, source, method, payload) {
                    return Ok(());
                }
                assert_eq!(
                    message.task.location(),
                    self.here,
                    "edge request for task {} sent to location {}",
                    message.task,
                    self.here
                );
                let dispatches = self.edges.add_notifier(
                    message.task,
                    Notifier::new(Delivery::Remote(source), message.level, self.persistent),
                );
                self.apply(ctx, dispatches)
            }
            DELIVER => {
                let message: Deliver<V> = codec.decode(payload)?;
                if self.hold_early(message.epoch, source, method, payload) {
                    return Ok(());
                }
                let dispatches = match message.value {
                    Some(value) => self.edges.set_value(message.task, value),
                    None => self.edges.signal(message.task),
                };
                self.apply(ctx, dispatches)
            }
            other => Err(TesseraError::internal(format!(
                "unknown graph method {} from location {}",
                other, source
            ))),
        }
    }

    fn hold_early(
        &mut self,
        epoch: u64,
        source: LocationId,
        method: MethodId,
        payload: &[u8],
    ) -> bool {
        match epoch.cmp(&self.epoch) {
            Ordering::Equal => false,
            Ordering::Greater => {
                trace!(epoch, current = self.epoch, source, "holding message for later epoch");
                self.early.entry(epoch).or_default().push((
                    source,
                    method,
                    Bytes::copy_from_slice(payload),
                ));
                true
            }
            Ordering::Less => panic!(
                "graph message from epoch {} arrived in epoch {}",
                epoch, self.epoch
            ),
        }
    }

    /// Begin the next epoch of a persistent graph
    pub fn reset(&mut self, ctx: &Location) -> Result<()> {
        assert!(self.persistent, "reset of a non-persistent graph");
        assert!(
            self.outstanding == 0,
            "reset with {} task(s) of epoch {} outstanding",
            self.outstanding,
            self.epoch
        );

        self.epoch += 1;
        self.edges.reset();
        let mut ready = Vec::new();
        for slot in &mut self.tasks {
            slot.rewind();
            if slot.pending == 0 && !slot.placeholder {
                slot.state = TaskState::Ready;
                ready.push(slot.id);
            }
        }
        self.scheduler.push(&ready);
        self.outstanding = self.tasks.len();
        debug!(epoch = self.epoch, ready = ready.len(), "graph reset");

        if let Some(held) = self.early.remove(&self.epoch) {
            for (source, method, payload) in held {
                self.process(ctx, source, method, &payload)?;
            }
        }
        Ok(())
    }
}

/// A graph instance as registered with its location
pub(crate) struct GraphShared<V: Value> {
    pub core: RefCell<GraphCore<V>>,
}

impl<V: Value> GraphShared<V> {
    pub fn new(core: GraphCore<V>) -> Self {
        Self {
            core: RefCell::new(core),
        }
    }
}

impl<V: Value> RemoteObject for GraphShared<V> {
    fn handle(&self, ctx: &Location, request: &Request<'_>) -> Result<Reply> {
        let Ok(mut core) = self.core.try_borrow_mut() else {
            return Ok(Reply::Busy);
        };
        core.process(ctx, request.source, request.method, request.payload())?;
        Ok(Reply::Done)
    }
}

impl<V: Value> Progress for GraphShared<V> {
    fn run_one(&self, ctx: &Location) -> Result<bool> {
        let job = match self.core.try_borrow_mut() {
            Ok(mut core) => core.next_job(),
            Err(_) => return Ok(false),
        };
        let Some(mut job) = job else {
            return Ok(false);
        };

        trace!(task = %job.task, "running task");
        let output = ctx.run_task(|| job.work.execute(&job.inputs));

        let mut core = self
            .core
            .try_borrow_mut()
            .map_err(|_| TesseraError::internal("graph borrowed while finishing a task"))?;
        core.finish_job(ctx, job, output)?;
        Ok(true)
    }

    fn is_active(&self) -> bool {
        self.core.try_borrow().map_or(true, |core| core.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RuntimeConfig;
    use crate::scheduler::FifoScheduler;
    use pretty_assertions::assert_eq;

    fn core(location: &Location, persistent: bool) -> GraphCore<i64> {
        GraphCore::new(
            location.id(),
            location.locations(),
            ObjectHandle::new(1, location.id()),
            persistent,
            Box::new(FifoScheduler::new()),
        )
    }

    fn constant(value: i64) -> Option<Box<dyn Work<i64>>> {
        Some(Box::new(move |_: &Inputs<i64>| -> anyhow::Result<i64> { Ok(value) }))
    }

    fn sum() -> Option<Box<dyn Work<i64>>> {
        Some(Box::new(|inputs: &Inputs<i64>| -> anyhow::Result<i64> {
            Ok(inputs.values().sum())
        }))
    }

    fn run_all(location: &Location, core: &mut GraphCore<i64>) -> Vec<TaskId> {
        let mut ran = Vec::new();
        while let Some(mut job) = core.next_job() {
            ran.push(job.task);
            let output = job.work.execute(&job.inputs);
            core.finish_job(location, job, output).unwrap();
        }
        ran
    }

    #[test]
    fn test_readiness_follows_inputs() {
        let location = Location::standalone(RuntimeConfig::default());
        let mut graph = core(&location, false);

        let a = graph.add_task(&location, constant(2), vec![]).unwrap();
        let b = graph.add_task(&location, constant(3), vec![]).unwrap();
        let c = graph
            .add_task(&location, sum(), vec![a.into(), b.into()])
            .unwrap();
        assert_eq!(graph.task_state(a), Some(TaskState::Ready));
        assert_eq!(graph.task_state(c), Some(TaskState::Unspawned));
        assert_eq!(graph.outstanding(), 3);

        assert_eq!(run_all(&location, &mut graph), vec![a, b, c]);
        assert_eq!(graph.value(c), Some(&5));
        assert_eq!(graph.outstanding(), 0);
        assert!(!graph.is_active());

        // inputs that are already done make a new task ready at once
        let d = graph.add_task(&location, sum(), vec![c.into()]).unwrap();
        assert_eq!(graph.task_state(d), Some(TaskState::Ready));
    }

    #[test]
    fn test_filters_and_signals() {
        let location = Location::standalone(RuntimeConfig::default());
        let mut graph = core(&location, false);

        let a = graph.add_task(&location, constant(4), vec![]).unwrap();
        let b = graph
            .add_task(
                &location,
                sum(),
                vec![
                    ProducerInfo::filtered(a, |v: &i64| v * 10),
                    ProducerInfo::signal(a),
                ],
            )
            .unwrap();
        run_all(&location, &mut graph);
        assert_eq!(graph.value(b), Some(&40));
    }

    #[test]
    fn test_placeholder_completion() {
        let location = Location::standalone(RuntimeConfig::default());
        let mut graph = core(&location, false);

        let p = graph.add_task(&location, None, vec![]).unwrap();
        let c = graph.add_task(&location, sum(), vec![p.into()]).unwrap();
        assert!(run_all(&location, &mut graph).is_empty());
        assert_eq!(graph.outstanding(), 2);

        graph.complete_placeholder(&location, p, Some(9)).unwrap();
        assert_eq!(graph.task_state(p), Some(TaskState::Done));
        assert_eq!(run_all(&location, &mut graph), vec![c]);
        assert_eq!(graph.value(c), Some(&9));
    }

    #[test]
    fn test_failed_work_is_reported() {
        let location = Location::standalone(RuntimeConfig::default());
        let mut graph = core(&location, false);
        let failing: Option<Box<dyn Work<i64>>> =
            Some(Box::new(|_: &Inputs<i64>| -> anyhow::Result<i64> {
                anyhow::bail!("no value today")
            }));
        let t = graph.add_task(&location, failing, vec![]).unwrap();

        let mut job = graph.next_job().unwrap();
        let output = job.work.execute(&job.inputs);
        let err = graph.finish_job(&location, job, output).unwrap_err();
        assert!(matches!(err, TesseraError::TaskFailed { task, .. } if task == t));
    }

    #[test]
    fn test_reset_restores_static_shape() {
        let location = Location::standalone(RuntimeConfig::default());
        let mut graph = core(&location, true);

        let a = graph.add_task(&location, constant(1), vec![]).unwrap();
        let b = graph.add_task(&location, sum(), vec![a.into()]).unwrap();
        run_all(&location, &mut graph);
        assert_eq!(graph.value(b), Some(&1));

        graph.reset(&location).unwrap();
        assert_eq!(graph.epoch(), 1);
        assert_eq!(graph.outstanding(), 2);
        assert_eq!(graph.task_state(a), Some(TaskState::Ready));
        assert_eq!(graph.task_state(b), Some(TaskState::Unspawned));
        assert_eq!(graph.flow_state(b), FlowState::Empty);

        assert_eq!(run_all(&location, &mut graph), vec![a, b]);
        assert_eq!(graph.value(b), Some(&1));
    }

    #[test]
    #[should_panic(expected = "outstanding")]
    fn test_reset_before_drain_is_fatal() {
        let location = Location::standalone(RuntimeConfig::default());
        let mut graph = core(&location, true);
        graph.add_task(&location, constant(1), vec![]).unwrap();
        let _ = graph.reset(&location);
    }

    #[test]
    #[should_panic(expected = "non-persistent")]
    fn test_reset_of_non_persistent_is_fatal() {
        let location = Location::standalone(RuntimeConfig::default());
        let mut graph = core(&location, false);
        let _ = graph.reset(&location);
    }

    #[test]
    fn test_remote_input_outside_job_is_unreachable() {
        let location = Location::standalone(RuntimeConfig::default());
        let mut graph = core(&location, false);
        let err = graph
            .add_task(&location, sum(), vec![TaskId::new(4, 0).into()])
            .unwrap_err();
        assert!(matches!(err, TesseraError::Unreachable { location: 4 }));
    }
}
