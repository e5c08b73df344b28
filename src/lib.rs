//! Distributed task-dependency-graph runtime.
//!
//! A job runs the same code on a fixed set of locations. Locations exchange
//! remote invocations over an aggregating, order-preserving transport, agree
//! on global quiescence through a fence, and build task graphs whose edges
//! may cross location boundaries.

// Core infrastructure modules
pub mod core;

// Messaging and locations
pub mod location;
pub mod transport;

// Termination detection and the task graph on top of it
pub mod fence;
pub mod graph;
pub mod scheduler;

// Job driver
pub mod runtime;

// Re-exports for convenience
pub use crate::core::config::{RuntimeConfig, RuntimeConfigBuilder};
pub use crate::core::errors::{Result, TesseraError};
pub use crate::core::logging::init_logging;
pub use fence::{FenceState, FenceVote};
pub use graph::{
    DetailLevel, Flow, FlowState, GraphBuilder, Inputs, ProducerInfo, TaskGraph, TaskId,
    TaskState, Value, Work, NO_INPUTS,
};
pub use location::{Location, LocationId, ObjectHandle, Progress, RemoteObject, Reply, Request};
pub use runtime::Runtime;
pub use scheduler::{FifoScheduler, LifoScheduler, PriorityScheduler, Scheduler};
pub use transport::{Codec, MethodId, StatsSnapshot};
