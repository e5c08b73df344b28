//! Task graphs spanning several locations.

use pretty_assertions::assert_eq;
use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;
use tessera::{
    DetailLevel, FlowState, ProducerInfo, Runtime, RuntimeConfig, TaskGraph, TaskId, TaskState,
    TesseraError, NO_INPUTS,
};

#[test]
fn test_fence_waits_for_a_ring_of_dependencies() {
    const N: usize = 4;
    let runtime = Runtime::with_locations(N).unwrap();
    let results = runtime
        .execute(|location| {
            let graph = TaskGraph::<u64>::new(location);
            let here = location.id();
            let seed = graph.add_task(
                move |_| {
                    if here == 0 {
                        thread::sleep(Duration::from_millis(20));
                    }
                    Ok(here as u64)
                },
                NO_INPUTS,
            )?;
            let previous = TaskId::new(((here + N - 1) % N) as u32, 0);
            let ring = graph.add_task(|inputs| Ok(inputs.value(0)? + 100), [previous])?;

            graph.fence()?;
            assert_eq!(graph.task_state(seed), Some(TaskState::Done));
            assert_eq!(graph.task_state(ring), Some(TaskState::Done));
            Ok(graph.result(ring))
        })
        .unwrap();

    assert_eq!(results, vec![Some(103), Some(100), Some(101), Some(102)]);
}

#[test]
fn test_chain_across_four_locations() {
    let runtime = Runtime::with_locations(4).unwrap();
    let results = runtime
        .execute(|location| {
            let graph = TaskGraph::<i64>::new(location);
            let here = location.id() as u32;
            if here == 0 {
                graph.add_task(|_| Ok(1), NO_INPUTS)?;
            } else {
                graph.add_task(
                    |inputs| Ok(inputs.value(0)? + 10),
                    [TaskId::new(here - 1, 0)],
                )?;
            }

            let observed = Rc::new(Cell::new(None));
            if here == 0 {
                let sink = observed.clone();
                graph.add_notifier(TaskId::new(3, 0), DetailLevel::Full, move |_, flow| {
                    sink.set(flow.value().copied())
                })?;
            }

            graph.fence()?;
            assert_eq!(graph.outstanding(), 0);
            Ok((observed.get(), graph.result(TaskId::new(here, 0))))
        })
        .unwrap();

    assert_eq!(results[0].0, Some(31));
    let own: Vec<Option<i64>> = results.iter().map(|(_, own)| *own).collect();
    assert_eq!(own, vec![Some(1), Some(11), Some(21), Some(31)]);
}

#[test]
fn test_persistent_graph_epochs_are_independent() {
    let runtime = Runtime::new(RuntimeConfig::development()).unwrap();
    let results = runtime
        .execute(|location| {
            let graph = TaskGraph::<i64>::persistent(location);
            let producer = TaskId::new(0, 0);
            let consumer = TaskId::new(1, 0);
            if location.id() == 0 {
                graph.add_placeholder()?;
            } else {
                graph.add_task(|inputs| Ok(inputs.value(0)? + 1), [producer])?;
            }

            let mut seen = Vec::new();
            for input in [5, 100] {
                if graph.epoch() > 0 {
                    assert_eq!(graph.flow_state(consumer), FlowState::Empty);
                }
                if location.id() == 0 {
                    graph.set_value(producer, input)?;
                }
                graph.fence()?;
                seen.push(graph.result(consumer));
                graph.reset()?;
            }
            Ok(seen)
        })
        .unwrap();

    assert_eq!(results[1], vec![Some(6), Some(101)]);
}

#[test]
fn test_remote_deliveries_are_coalesced_per_location() {
    let runtime = Runtime::with_locations(3).unwrap();
    let results = runtime
        .execute(|location| {
            let graph = TaskGraph::<i64>::new(location);
            let producer = TaskId::new(0, 0);
            let mut consumers = Vec::new();
            match location.id() {
                0 => {
                    graph.add_task(|_| Ok(7), NO_INPUTS)?;
                }
                1 => {
                    consumers.push(graph.add_task(|inputs| Ok(inputs.value(0)? + 1), [producer])?);
                    consumers.push(graph.add_task(|inputs| Ok(inputs.value(0)? * 2), [producer])?);
                }
                _ => {
                    consumers.push(graph.add_task(|inputs| Ok(-*inputs.value(0)?), [producer])?);
                }
            }
            graph.fence()?;

            let values: Vec<Option<i64>> = consumers.iter().map(|t| graph.result(*t)).collect();
            Ok((values, location.stats()))
        })
        .unwrap();

    let (_, producer_stats) = &results[0];
    assert_eq!(producer_stats.async_sent, 2);
    assert_eq!(producer_stats.async_sent_to, vec![0, 1, 1]);
    assert_eq!(results[1].0, vec![Some(8), Some(14)]);
    assert_eq!(results[1].1.async_sent, 1);
    assert_eq!(results[2].0, vec![Some(-7)]);
    assert_eq!(results[2].1.async_sent, 1);
}

#[test]
fn test_signal_and_value_consumers_of_one_remote_task() {
    let runtime = Runtime::with_locations(2).unwrap();
    let results = runtime
        .execute(|location| {
            let graph = TaskGraph::<i64>::new(location);
            let producer = TaskId::new(0, 0);
            let before = location.stats();
            if location.id() == 0 {
                let placeholder = graph.add_placeholder()?;
                // both requests from location 1 are in before the value is
                location.barrier()?;
                graph.set_value(placeholder, 3)?;
                graph.fence()?;
                return Ok((None, location.stats().since(&before)));
            }

            let after = graph.add_task(|inputs| Ok(inputs.len() as i64), [ProducerInfo::signal(producer)])?;
            let scaled = graph.add_task(
                |inputs| Ok(inputs.values().sum::<i64>()),
                [graph.consume_from(producer, |v| v * 10)],
            )?;
            location.barrier()?;
            graph.fence()?;
            let outputs = (graph.result(after), graph.result(scaled));
            Ok((Some(outputs), location.stats().since(&before)))
        })
        .unwrap();

    // the signal registration was upgraded in place: one delivery carries the value
    assert_eq!(results[0].1.async_sent, 1);
    assert_eq!(results[1].1.async_sent, 2);
    assert_eq!(results[1].0, Some((Some(1), Some(30))));
}

#[test]
fn test_failed_task_aborts_the_job() {
    let runtime = Runtime::with_locations(2).unwrap();
    let err = runtime
        .execute(|location| {
            let graph = TaskGraph::<i64>::new(location);
            if location.id() == 1 {
                graph.add_task(|_| Err(anyhow::anyhow!("no input today")), NO_INPUTS)?;
            }
            graph.fence()
        })
        .unwrap_err();

    assert_eq!(err.category(), "task");
    match err {
        TesseraError::TaskFailed { task, location, .. } => {
            assert_eq!(task, TaskId::new(1, 0));
            assert_eq!(location, 1);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_unsatisfied_placeholder_reports_incomplete() {
    let runtime = Runtime::with_locations(2).unwrap();
    let err = runtime
        .execute(|location| {
            let graph = TaskGraph::<i64>::new(location);
            if location.id() == 0 {
                graph.add_placeholder()?;
            } else {
                graph.add_task(|inputs| Ok(*inputs.value(0)?), [TaskId::new(0, 0)])?;
            }
            graph.fence()
        })
        .unwrap_err();

    assert!(matches!(
        err,
        TesseraError::Incomplete {
            location: 0,
            pending: 1
        }
    ));
}

#[test]
#[should_panic(expected = "set twice")]
fn test_second_value_for_a_placeholder_is_fatal() {
    let runtime = Runtime::with_locations(1).unwrap();
    let _ = runtime.execute(|location| {
        let graph = TaskGraph::<i64>::new(location);
        let p = graph.add_placeholder()?;
        graph.set_value(p, 1)?;
        graph.set_value(p, 2)?;
        graph.fence()
    });
}
