//! Remote invocation across locations: ordering, reentrant round trips,
//! collectives and late registration.

use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;
use tessera::{
    Location, LocationId, MethodId, ObjectHandle, RemoteObject, Reply, Request, Runtime,
    RuntimeConfig, TesseraError,
};

const RECORD: MethodId = 1;
const PING: MethodId = 2;
const BOUNCE: MethodId = 3;
const NEST: MethodId = 4;
const SLOW: MethodId = 5;

#[derive(Default)]
struct Recorder {
    seen: RefCell<Vec<(LocationId, u32)>>,
}

impl RemoteObject for Recorder {
    fn handle(&self, _ctx: &Location, request: &Request<'_>) -> tessera::Result<Reply> {
        match request.method {
            RECORD => {
                let value: u32 = request.args()?;
                self.seen.borrow_mut().push((request.source, value));
                Ok(Reply::Done)
            }
            other => Err(TesseraError::internal(format!("unknown method {}", other))),
        }
    }
}

struct PingPong {
    handle: ObjectHandle,
}

impl RemoteObject for PingPong {
    fn handle(&self, ctx: &Location, request: &Request<'_>) -> tessera::Result<Reply> {
        match request.method {
            PING => {
                let value: u64 = request.args()?;
                // calls back into the location that is blocked on us
                let bounced: u64 = ctx.invoke_sync(request.source, self.handle, BOUNCE, &value)?;
                ctx.reply(&(bounced * 2))
            }
            BOUNCE => {
                let value: u64 = request.args()?;
                ctx.reply(&(value + 1))
            }
            other => Err(TesseraError::internal(format!("unknown method {}", other))),
        }
    }
}

/// Records values; NEST additionally blocks on a slow round trip to
/// location 2 before returning.
struct Nesting {
    handle: ObjectHandle,
    seen: RefCell<Vec<u32>>,
}

impl RemoteObject for Nesting {
    fn handle(&self, ctx: &Location, request: &Request<'_>) -> tessera::Result<Reply> {
        match request.method {
            RECORD => {
                self.seen.borrow_mut().push(request.args()?);
                Ok(Reply::Done)
            }
            NEST => {
                let value: u32 = request.args()?;
                self.seen.borrow_mut().push(value);
                let _: u32 = ctx.invoke_sync(2, self.handle, SLOW, &value)?;
                Ok(Reply::Done)
            }
            SLOW => {
                let value: u32 = request.args()?;
                thread::sleep(Duration::from_millis(200));
                ctx.reply(&value)
            }
            other => Err(TesseraError::internal(format!("unknown method {}", other))),
        }
    }
}

fn small_buffers(locations: usize) -> RuntimeConfig {
    RuntimeConfig::builder()
        .locations(locations)
        .aggregation(3, 1024)
        .flush_interval(2)
        .build()
        .unwrap()
}

#[test]
fn test_async_requests_keep_sender_order() {
    let runtime = Runtime::new(small_buffers(3)).unwrap();
    let seen = runtime
        .execute(|location| {
            let recorder = Rc::new(Recorder::default());
            let handle = location.register(recorder.clone());
            if location.id() != 0 {
                for value in 0..100u32 {
                    location.invoke_async(0, handle, RECORD, &value)?;
                }
            }
            location.fence()?;
            let seen = recorder.seen.borrow().clone();
            Ok(seen)
        })
        .unwrap();

    assert!(seen[1].is_empty());
    assert!(seen[2].is_empty());
    for source in [1, 2] {
        let values: Vec<u32> = seen[0]
            .iter()
            .filter(|(from, _)| *from == source)
            .map(|(_, value)| *value)
            .collect();
        assert_eq!(values, (0..100).collect::<Vec<_>>());
    }
}

#[test]
fn test_sender_order_survives_blocked_handlers() {
    let runtime = Runtime::with_locations(3).unwrap();
    let seen = runtime
        .execute(|location| {
            let (handle, nesting) = location.register_with(|handle| {
                Rc::new(Nesting {
                    handle,
                    seen: RefCell::new(Vec::new()),
                })
            });
            if location.id() == 1 {
                location.invoke_async(0, handle, NEST, &10u32)?;
                location.invoke_async(0, handle, NEST, &20u32)?;
                location.flush()?;
                thread::sleep(Duration::from_millis(50));
                // arrives while location 0 is blocked inside the first NEST
                location.invoke_async(0, handle, RECORD, &30u32)?;
                location.flush()?;
                thread::sleep(Duration::from_millis(300));
                location.invoke_async(0, handle, RECORD, &40u32)?;
                location.flush()?;
            }
            location.fence()?;
            let seen = nesting.seen.borrow().clone();
            Ok(seen)
        })
        .unwrap();

    assert_eq!(seen[0], vec![10, 20, 30, 40]);
    assert!(seen[1].is_empty());
    assert!(seen[2].is_empty());
}

#[test]
fn test_sync_call_services_callbacks_while_blocked() {
    let runtime = Runtime::with_locations(2).unwrap();
    let replies = runtime
        .execute(|location| {
            let (handle, _object) =
                location.register_with(|handle| Rc::new(PingPong { handle }));
            if location.id() == 0 {
                let reply: u64 = location.invoke_sync(1, handle, PING, &5u64)?;
                return Ok(Some(reply));
            }
            Ok(None)
        })
        .unwrap();
    assert_eq!(replies, vec![Some(12), None]);
}

#[test]
fn test_collectives() {
    let runtime = Runtime::with_locations(3).unwrap();
    let results = runtime
        .execute(|location| {
            let handle = location.register(Rc::new(Recorder::default()));
            let id = location.id() as u64;

            let total = location.invoke_reduce(handle, id + 1, |a, b| a + b)?;
            let ordered = location.invoke_reduce(handle, vec![id], |mut a, b| {
                a.extend(b);
                a
            })?;
            let message = location.broadcast(
                handle,
                2,
                (location.id() == 2).then(|| "from two".to_string()),
            )?;
            location.barrier()?;
            Ok((total, ordered, message))
        })
        .unwrap();

    for (total, ordered, message) in results {
        assert_eq!(total, 6);
        assert_eq!(ordered, vec![0, 1, 2]);
        assert_eq!(message, "from two");
    }
}

#[test]
fn test_requests_wait_for_late_registration() {
    let runtime = Runtime::with_locations(2).unwrap();
    let outcome = runtime
        .execute(|location| {
            if location.id() == 1 {
                let handle = location.register(Rc::new(Recorder::default()));
                location.invoke_async(0, handle, RECORD, &42u32)?;
                location.barrier()?;
                location.fence()?;
                return Ok(None);
            }

            location.barrier()?;
            let recorder = Rc::new(Recorder::default());
            location.register(recorder.clone());
            location.fence()?;
            let seen = recorder.seen.borrow().clone();
            Ok(Some((seen, location.stats().parked)))
        })
        .unwrap();

    assert_eq!(outcome[0], Some((vec![(1, 42)], 1)));
}

#[test]
fn test_request_flush_and_stats() {
    let config = RuntimeConfig::builder()
        .locations(2)
        .aggregation(1000, 1 << 20)
        .build()
        .unwrap();
    let runtime = Runtime::new(config).unwrap();
    let stats = runtime
        .execute(|location| {
            let recorder = Rc::new(Recorder::default());
            let handle = location.register(recorder.clone());
            let before = location.stats();
            if location.id() == 0 {
                for value in 0..10u32 {
                    location.invoke_async(1, handle, RECORD, &value)?;
                }
                assert!(location.has_unflushed());
                location.request_flush(1)?;
            }
            location.fence()?;
            let received = recorder.seen.borrow().len();
            Ok((location.stats().since(&before), received))
        })
        .unwrap();

    let (sender, _) = &stats[0];
    assert_eq!(sender.async_sent, 10);
    assert_eq!(sender.async_sent_to, vec![0, 10]);
    assert!(sender.fence_rounds >= 2);
    let (receiver, received) = &stats[1];
    assert_eq!(receiver.async_received, 10);
    assert_eq!(*received, 10);
}

#[test]
fn test_unknown_destination_is_unreachable() {
    let runtime = Runtime::with_locations(1).unwrap();
    let err = runtime
        .execute(|location| {
            let handle = location.register(Rc::new(Recorder::default()));
            location.invoke_async(3, handle, RECORD, &1u32)
        })
        .unwrap_err();
    assert!(matches!(err, TesseraError::Unreachable { location: 3 }));
}
