//! Location context: one participant of a parallel job.
//!
//! A `Location` is confined to the thread that runs it. All state it owns is
//! mutated only from that thread, either by the code running on it or by the
//! message pump servicing requests from other locations. Blocking operations
//! (`invoke_sync`, `invoke_reduce`, `fence`) keep pumping while they wait.

mod handle;
mod registry;

pub use handle::ObjectHandle;
pub use registry::{Lookup, Registry};

use crate::core::config::RuntimeConfig;
use crate::core::errors::{Result, TesseraError};
use crate::transport::{
    Codec, Collectives, Envelope, Fabric, MethodId, Opcode, Packet, PendingCalls, StatsSnapshot,
    Transport, TransportStats, ROOT,
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, trace};

pub type LocationId = usize;

/// An incoming request as seen by the object it addresses
pub struct Request<'a> {
    pub source: LocationId,
    pub method: MethodId,
    pub opcode: Opcode,
    payload: &'a [u8],
    codec: Codec,
}

impl<'a> Request<'a> {
    /// Decode the call arguments
    pub fn args<T: DeserializeOwned>(&self) -> Result<T> {
        self.codec.decode(self.payload)
    }

    pub fn payload(&self) -> &[u8] {
        self.payload
    }

    /// Whether the caller is blocked waiting for the reply
    pub fn is_sync(&self) -> bool {
        self.opcode == Opcode::SyncRequest
    }
}

/// Outcome of handling a request
#[derive(Debug)]
pub enum Reply {
    /// Handled; a blocked caller receives `()`
    Done,
    /// Handled; a blocked caller receives these encoded bytes
    Value(Bytes),
    /// The object cannot take requests right now; retry later in order
    Busy,
}

/// An object addressable through an [`ObjectHandle`]
pub trait RemoteObject {
    fn handle(&self, ctx: &Location, request: &Request<'_>) -> Result<Reply>;
}

/// A local source of runnable work driven by the location's scheduling loop
pub trait Progress {
    /// Run at most one unit of work; returns whether anything ran
    fn run_one(&self, ctx: &Location) -> Result<bool>;

    /// Whether runnable or pending work remains
    fn is_active(&self) -> bool;
}

/// Restores a cell's previous value when dropped
struct Restore<'a, T: Copy> {
    cell: &'a Cell<T>,
    previous: T,
}

impl<'a, T: Copy> Restore<'a, T> {
    fn set(cell: &'a Cell<T>, value: T) -> Self {
        let previous = cell.replace(value);
        Self { cell, previous }
    }
}

impl<T: Copy> Drop for Restore<'_, T> {
    fn drop(&mut self) {
        self.cell.set(self.previous);
    }
}

pub struct Location {
    id: LocationId,
    count: usize,
    config: Arc<RuntimeConfig>,
    codec: Codec,
    fabric: Arc<Fabric>,
    inbox: RefCell<UnboundedReceiver<Packet>>,
    registry: RefCell<Registry>,
    transport: RefCell<Transport>,
    calls: RefCell<PendingCalls>,
    collectives: RefCell<Collectives>,
    admitted: RefCell<VecDeque<Envelope>>,
    deferred: RefCell<VecDeque<Envelope>>,
    retrying: Cell<bool>,
    progress: RefCell<Vec<Weak<dyn Progress>>>,
    next_progress: Cell<usize>,
    stats: Arc<TransportStats>,
    in_task: Cell<bool>,
    pump_depth: Cell<usize>,
}

impl Location {
    pub(crate) fn new(
        id: LocationId,
        config: Arc<RuntimeConfig>,
        fabric: Arc<Fabric>,
        inbox: UnboundedReceiver<Packet>,
    ) -> Self {
        let count = fabric.locations();
        let stats = Arc::new(TransportStats::new(count));
        let transport = Transport::new(id, &config, fabric.clone(), stats.clone());
        Self {
            id,
            count,
            codec: config.codec,
            config,
            fabric,
            inbox: RefCell::new(inbox),
            registry: RefCell::new(Registry::new()),
            transport: RefCell::new(transport),
            calls: RefCell::new(PendingCalls::new()),
            collectives: RefCell::new(Collectives::new()),
            admitted: RefCell::new(VecDeque::new()),
            deferred: RefCell::new(VecDeque::new()),
            retrying: Cell::new(false),
            progress: RefCell::new(Vec::new()),
            next_progress: Cell::new(0),
            stats,
            in_task: Cell::new(false),
            pump_depth: Cell::new(0),
        }
    }

    pub fn id(&self) -> LocationId {
        self.id
    }

    /// Number of locations in the job
    pub fn locations(&self) -> usize {
        self.count
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn transport_stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Whether a task body is executing on this location
    pub fn in_task(&self) -> bool {
        self.in_task.get()
    }

    /// Current nesting of blocking calls that pump messages
    pub fn pump_depth(&self) -> usize {
        self.pump_depth.get()
    }

    /// Round-trip calls currently suspended on this location
    pub fn pending_calls(&self) -> usize {
        self.calls.borrow().depth()
    }

    pub fn has_unflushed(&self) -> bool {
        self.transport.borrow().has_unflushed()
    }

    /// Encode `value` as the reply to a synchronous request
    pub fn reply<T: Serialize + ?Sized>(&self, value: &T) -> Result<Reply> {
        Ok(Reply::Value(self.codec.encode(value)?))
    }

    // Registry

    pub fn register<T: RemoteObject + 'static>(&self, object: Rc<T>) -> ObjectHandle {
        self.register_with(|_| object).0
    }

    /// Register an object that needs to know its own handle
    pub fn register_with<T, F>(&self, build: F) -> (ObjectHandle, Rc<T>)
    where
        T: RemoteObject + 'static,
        F: FnOnce(ObjectHandle) -> Rc<T>,
    {
        let id = self.registry.borrow_mut().reserve();
        let handle = ObjectHandle::new(id, self.id);
        let object = build(handle);
        let released = self.registry.borrow_mut().insert(id, object.clone());
        if !released.is_empty() {
            debug!(%handle, requests = released.len(), "releasing parked requests");
            self.deferred.borrow_mut().extend(released);
        }
        debug!(%handle, "registered object");
        (handle, object)
    }

    /// Remove a registration. Requests that reach the handle afterwards are fatal.
    pub fn unregister(&self, handle: ObjectHandle) {
        let object = self.registry.borrow_mut().remove(handle.id());
        drop(object);
        debug!(%handle, "unregistered object");
    }

    /// Drive `source` from this location's scheduling loop
    pub fn attach_progress(&self, source: Weak<dyn Progress>) {
        self.progress.borrow_mut().push(source);
    }

    /// Run a task body, marking the location as inside it
    pub fn run_task<R>(&self, body: impl FnOnce() -> R) -> R {
        let _in_task = Restore::set(&self.in_task, true);
        body()
    }

    // Sending

    fn check_destination(&self, destination: LocationId) -> Result<()> {
        if destination >= self.count {
            return Err(TesseraError::Unreachable {
                location: destination,
            });
        }
        Ok(())
    }

    /// Fire-and-forget request. Requests from this location to `destination`
    /// are applied there in the order they are issued here.
    pub fn invoke_async<A: Serialize + ?Sized>(
        &self,
        destination: LocationId,
        handle: ObjectHandle,
        method: MethodId,
        args: &A,
    ) -> Result<()> {
        self.check_destination(destination)?;
        let payload = self.codec.encode(args)?;
        self.stats.record_async_sent(destination);
        self.transport.borrow_mut().enqueue(
            destination,
            Envelope::new(Opcode::Async, self.id, handle, method, 0, payload),
        )
    }

    /// Round-trip request. Incoming requests keep being serviced until the
    /// reply arrives.
    pub fn invoke_sync<A, R>(
        &self,
        destination: LocationId,
        handle: ObjectHandle,
        method: MethodId,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.check_destination(destination)?;
        let _pump = self.enter_pump()?;
        let payload = self.codec.encode(args)?;
        let call = self.calls.borrow_mut().open(destination);
        self.stats.record_sync_call();
        {
            let mut transport = self.transport.borrow_mut();
            transport.enqueue(
                destination,
                Envelope::new(Opcode::SyncRequest, self.id, handle, method, call, payload),
            )?;
            transport.flush(destination)?;
        }
        trace!(destination, call, "waiting for reply");

        loop {
            let reply = self.calls.borrow_mut().take(call);
            if let Some(bytes) = reply {
                return self.codec.decode(&bytes);
            }
            if !self.poll()? {
                self.wait()?;
            }
        }
    }

    /// Every location contributes `value`; all receive the fold of every
    /// contribution in location order. Must be entered by all locations.
    pub fn invoke_reduce<T, F>(&self, handle: ObjectHandle, value: T, combine: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T, T) -> T,
    {
        self.stats.record_reduction();
        self.flush()?;
        if self.count == 1 {
            return Ok(value);
        }
        let _pump = self.enter_pump()?;
        let object = handle.id();
        let round = self.collectives.borrow_mut().next_round(object);
        let payload = self.codec.encode(&value)?;

        if self.id != ROOT {
            {
                let mut transport = self.transport.borrow_mut();
                transport.enqueue(
                    ROOT,
                    Envelope::new(Opcode::Reduce, self.id, handle, 0, round, payload),
                )?;
                transport.flush(ROOT)?;
            }
            loop {
                let result = self.collectives.borrow_mut().take_result(object, round);
                if let Some(bytes) = result {
                    return self.codec.decode(&bytes);
                }
                if !self.poll()? {
                    self.wait()?;
                }
            }
        }

        self.collectives
            .borrow_mut()
            .contribute(object, round, self.id, payload, self.count);
        let contributions = loop {
            let gathered = self.collectives.borrow_mut().take_gathered(object, round);
            if let Some(contributions) = gathered {
                break contributions;
            }
            if !self.poll()? {
                self.wait()?;
            }
        };

        let mut folded: Option<T> = None;
        for bytes in &contributions {
            let value: T = self.codec.decode(bytes)?;
            folded = Some(match folded {
                Some(acc) => combine(acc, value),
                None => value,
            });
        }
        let result = folded.ok_or_else(|| TesseraError::internal("reduction without contributions"))?;

        let encoded = self.codec.encode(&result)?;
        let mut transport = self.transport.borrow_mut();
        for destination in (0..self.count).filter(|d| *d != self.id) {
            transport.enqueue(
                destination,
                Envelope::new(Opcode::Broadcast, self.id, handle, 0, round, encoded.clone()),
            )?;
            transport.flush(destination)?;
        }
        Ok(result)
    }

    /// Every location receives the value supplied by `root`
    pub fn broadcast<T>(&self, handle: ObjectHandle, root: LocationId, value: Option<T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.check_destination(root)?;
        let value = if self.id == root { value } else { None };
        self.invoke_reduce(handle, value, |a, b| a.or(b))?
            .ok_or_else(|| TesseraError::internal(format!("broadcast root {} supplied no value", root)))
    }

    /// Wait until every location has entered the barrier
    pub fn barrier(&self) -> Result<()> {
        self.invoke_reduce(ObjectHandle::LOCATION, (), |_, _| ())
    }

    /// Hand every buffered envelope to the fabric
    pub fn flush(&self) -> Result<()> {
        self.transport.borrow_mut().flush_all()
    }

    /// Ask `destination` to flush its outgoing buffers
    pub fn request_flush(&self, destination: LocationId) -> Result<()> {
        self.check_destination(destination)?;
        let mut transport = self.transport.borrow_mut();
        transport.enqueue(
            destination,
            Envelope::new(Opcode::Flush, self.id, ObjectHandle::LOCATION, 0, 0, Bytes::new()),
        )?;
        transport.flush(destination)
    }

    fn enter_pump(&self) -> Result<Restore<'_, usize>> {
        let depth = self.pump_depth.get() + 1;
        let limit = self.config.max_pump_depth;
        if depth > limit {
            return Err(TesseraError::PumpDepthExceeded { depth, limit });
        }
        Ok(Restore::set(&self.pump_depth, depth))
    }

    // Receiving

    /// Service everything that has arrived, without blocking.
    /// Returns whether any packet or deferred request was processed.
    pub fn poll(&self) -> Result<bool> {
        let mut progressed = self.retry_deferred()?;
        progressed |= self.dispatch_admitted()?;
        loop {
            let next = self.inbox.borrow_mut().try_recv();
            match next {
                Ok(packet) => {
                    self.accept(packet)?;
                    progressed = true;
                }
                Err(TryRecvError::Empty) => return Ok(progressed),
                Err(TryRecvError::Disconnected) => {
                    return Err(TesseraError::internal("location inbox closed"))
                }
            }
        }
    }

    /// Flush, then block until the next packet arrives and service it.
    ///
    /// Must not be called from an async context.
    pub fn wait(&self) -> Result<()> {
        self.flush()?;
        if let Some((origin, reason)) = self.fabric.abort_reason() {
            if origin != self.id {
                return Err(TesseraError::aborted(origin, reason));
            }
        }
        let next = self.inbox.borrow_mut().blocking_recv();
        match next {
            Some(packet) => self.accept(packet),
            None => Err(TesseraError::internal("location inbox closed")),
        }
    }

    /// Alternate between servicing messages and running local work until
    /// neither makes progress, then flush.
    pub fn drain(&self) -> Result<()> {
        let interval = self.config.flush_interval;
        let mut iterations = 0usize;
        loop {
            let polled = self.poll()?;
            let ran = self.run_progress()?;
            iterations += 1;
            if iterations % interval == 0 {
                self.flush()?;
            }
            if !polled && !ran {
                // messages to ourselves only arrive once flushed
                if !self.has_unflushed() {
                    break;
                }
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Whether any attached work source or deferred request is pending
    pub(crate) fn is_active(&self) -> bool {
        if !self.admitted.borrow().is_empty() || !self.deferred.borrow().is_empty() {
            return true;
        }
        self.progress
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .any(|source| source.is_active())
    }

    fn run_progress(&self) -> Result<bool> {
        let sources: Vec<Rc<dyn Progress>> = {
            let mut progress = self.progress.borrow_mut();
            progress.retain(|source| source.strong_count() > 0);
            progress.iter().filter_map(Weak::upgrade).collect()
        };
        if sources.is_empty() {
            return Ok(false);
        }
        let start = self.next_progress.get() % sources.len();
        for offset in 0..sources.len() {
            let index = (start + offset) % sources.len();
            if sources[index].run_one(self)? {
                self.next_progress.set(index + 1);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn accept(&self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Abort { origin, reason } => Err(TesseraError::aborted(origin, reason)),
            Packet::Batch { envelopes, .. } => {
                for envelope in envelopes {
                    let ready = self.transport.borrow_mut().admit(envelope);
                    self.admitted.borrow_mut().extend(ready);
                }
                self.dispatch_admitted()?;
                Ok(())
            }
        }
    }

    /// Dispatch admitted envelopes in sequence order. A handler that pumps
    /// from inside `dispatch` continues from the front of the same queue, so
    /// nothing admitted later overtakes an envelope still waiting here.
    fn dispatch_admitted(&self) -> Result<bool> {
        let mut progressed = false;
        loop {
            let next = self.admitted.borrow_mut().pop_front();
            match next {
                Some(envelope) => {
                    self.dispatch(envelope)?;
                    progressed = true;
                }
                None => return Ok(progressed),
            }
        }
    }

    fn dispatch(&self, envelope: Envelope) -> Result<()> {
        match envelope.opcode {
            Opcode::Async | Opcode::SyncRequest => {
                if envelope.opcode == Opcode::Async {
                    self.stats.record_async_received();
                }
                if self.has_deferred(envelope.handle.id()) {
                    self.stats.record_deferred();
                    self.deferred.borrow_mut().push_back(envelope);
                    return Ok(());
                }
                if let Some(envelope) = self.deliver(envelope)? {
                    self.deferred.borrow_mut().push_back(envelope);
                }
                Ok(())
            }
            Opcode::SyncReply => {
                self.calls
                    .borrow_mut()
                    .complete(envelope.tag, envelope.payload);
                Ok(())
            }
            Opcode::Reduce => {
                self.collectives.borrow_mut().contribute(
                    envelope.handle.id(),
                    envelope.tag,
                    envelope.source,
                    envelope.payload,
                    self.count,
                );
                Ok(())
            }
            Opcode::Broadcast => {
                self.collectives.borrow_mut().deliver(
                    envelope.handle.id(),
                    envelope.tag,
                    envelope.payload,
                );
                Ok(())
            }
            Opcode::Flush => self.flush(),
        }
    }

    fn has_deferred(&self, object: u32) -> bool {
        self.deferred
            .borrow()
            .iter()
            .any(|envelope| envelope.handle.id() == object)
    }

    /// Hand a request to its object. The envelope is given back when the
    /// object is busy.
    fn deliver(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let lookup = self.registry.borrow().lookup(envelope.handle.id());
        let object = match lookup {
            Lookup::Live(object) => object,
            Lookup::NotYetRegistered => {
                trace!(handle = %envelope.handle, source = envelope.source, "parking request");
                self.stats.record_parked();
                self.registry.borrow_mut().park(envelope);
                return Ok(None);
            }
            Lookup::Unregistered => panic!(
                "request from location {} for unregistered object {}",
                envelope.source, envelope.handle
            ),
        };

        let request = Request {
            source: envelope.source,
            method: envelope.method,
            opcode: envelope.opcode,
            payload: &envelope.payload,
            codec: self.codec,
        };
        let reply = match object.handle(self, &request)? {
            Reply::Busy => {
                self.stats.record_deferred();
                return Ok(Some(envelope));
            }
            Reply::Done => None,
            Reply::Value(bytes) => Some(bytes),
        };
        self.stats.record_processed();

        if envelope.opcode == Opcode::SyncRequest {
            let payload = match reply {
                Some(bytes) => bytes,
                None => self.codec.encode(&())?,
            };
            let mut transport = self.transport.borrow_mut();
            transport.enqueue(
                envelope.source,
                Envelope::new(
                    Opcode::SyncReply,
                    self.id,
                    envelope.handle,
                    envelope.method,
                    envelope.tag,
                    payload,
                ),
            )?;
            transport.flush(envelope.source)?;
        }
        Ok(None)
    }

    /// Retry deferred requests in arrival order. A request whose object is
    /// still busy blocks the later requests for the same object.
    fn retry_deferred(&self) -> Result<bool> {
        if self.retrying.get() || self.deferred.borrow().is_empty() {
            return Ok(false);
        }
        let _retrying = Restore::set(&self.retrying, true);

        let mut progressed = false;
        let mut blocked: HashSet<u32> = HashSet::new();
        let mut index = 0;
        loop {
            let next = {
                let mut deferred = self.deferred.borrow_mut();
                loop {
                    match deferred.get(index) {
                        None => break None,
                        Some(envelope) if blocked.contains(&envelope.handle.id()) => index += 1,
                        Some(_) => break deferred.remove(index),
                    }
                }
            };
            let Some(envelope) = next else {
                break;
            };
            let object = envelope.handle.id();
            match self.deliver(envelope)? {
                Some(envelope) => {
                    blocked.insert(object);
                    self.deferred.borrow_mut().insert(index, envelope);
                    index += 1;
                }
                None => progressed = true,
            }
        }
        Ok(progressed)
    }
}

#[cfg(test)]
impl Location {
    /// A location that is the only member of its job
    pub(crate) fn standalone(config: RuntimeConfig) -> Self {
        let (fabric, mut inboxes) = Fabric::new(1);
        let inbox = inboxes.remove(0);
        Self::new(0, Arc::new(config), fabric, inbox)
    }
}
