//! Job driver: one thread per location, all sharing one fabric.
//!
//! The same body runs on every location (SPMD). After the body returns, each
//! location takes part in one last fence so no request is left in flight
//! when the job ends. A location that fails or panics aborts the job; the
//! others observe [`TesseraError::Aborted`] at their next blocking point.

use crate::core::config::RuntimeConfig;
use crate::core::errors::{Result, TesseraError};
use crate::location::{Location, LocationId};
use crate::transport::{Fabric, Packet};
use futures::future::join_all;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, info_span};

#[derive(Debug, Clone)]
pub struct Runtime {
    config: Arc<RuntimeConfig>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Default configuration with `locations` locations
    pub fn with_locations(locations: usize) -> Result<Self> {
        Self::new(RuntimeConfig::with_locations(locations))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn locations(&self) -> usize {
        self.config.locations
    }

    /// Run `body` on every location and collect the results in location
    /// order.
    ///
    /// A panic on any location is resumed here after all location threads
    /// have stopped. Otherwise the first error that originated on a
    /// location is returned in preference to errors reporting the abort.
    pub fn execute<F, R>(&self, body: F) -> Result<Vec<R>>
    where
        F: Fn(&Location) -> Result<R> + Sync,
        R: Send,
    {
        let locations = self.config.locations;
        let (fabric, inboxes) = Fabric::new(locations);
        info!(
            locations,
            codec = self.config.codec.name(),
            "starting job"
        );
        let started = Instant::now();

        let outcomes: Vec<thread::Result<Result<R>>> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(locations);
            for (id, inbox) in inboxes.into_iter().enumerate() {
                let mut builder =
                    thread::Builder::new().name(format!("{}-{}", self.config.thread_name, id));
                if let Some(size) = self.config.stack_size {
                    builder = builder.stack_size(size);
                }

                let config = self.config.clone();
                let shared = fabric.clone();
                let body = &body;
                match builder.spawn_scoped(scope, move || {
                    run_location(id, config, shared, inbox, body)
                }) {
                    Ok(handle) => handles.push(Ok(handle)),
                    Err(err) => {
                        let reason = format!("failed to spawn location thread: {}", err);
                        error!(location = id, %reason);
                        fabric.abort(id, reason.clone());
                        handles.push(Err(TesseraError::internal(reason)));
                    }
                }
            }

            handles
                .into_iter()
                .map(|handle| match handle {
                    Ok(handle) => handle.join(),
                    Err(err) => Ok(Err(err)),
                })
                .collect()
        });

        let result = collect_outcomes(outcomes);
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "job finished"
        );
        result
    }

    /// [`Runtime::execute`] from async code. Each location runs on the
    /// executor's blocking pool, which must have room for all of them at once.
    pub async fn execute_async<F, R>(&self, body: F) -> Result<Vec<R>>
    where
        F: Fn(&Location) -> Result<R> + Send + Sync + 'static,
        R: Send + 'static,
    {
        let locations = self.config.locations;
        let (fabric, inboxes) = Fabric::new(locations);
        info!(
            locations,
            codec = self.config.codec.name(),
            "starting job on blocking pool"
        );
        let body = Arc::new(body);

        let handles = inboxes.into_iter().enumerate().map(|(id, inbox)| {
            let config = self.config.clone();
            let fabric = fabric.clone();
            let body = body.clone();
            tokio::task::spawn_blocking(move || run_location(id, config, fabric, inbox, &*body))
        });

        let outcomes = join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(result) => Ok(result),
                Err(err) if err.is_panic() => Err(err.into_panic()),
                Err(err) => Ok(Err(TesseraError::internal(format!(
                    "location task cancelled: {}",
                    err
                )))),
            })
            .collect();
        collect_outcomes(outcomes)
    }
}

fn run_location<F, R>(
    id: LocationId,
    config: Arc<RuntimeConfig>,
    fabric: Arc<Fabric>,
    inbox: UnboundedReceiver<Packet>,
    body: &F,
) -> Result<R>
where
    F: Fn(&Location) -> Result<R>,
{
    let span = info_span!("location", id);
    let _entered = span.enter();

    let location = Location::new(id, config, fabric.clone(), inbox);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let value = body(&location)?;
        location.fence()?;
        Ok::<R, TesseraError>(value)
    }));

    match outcome {
        Ok(Ok(value)) => {
            debug!(stats = ?location.stats(), "location finished");
            Ok(value)
        }
        Ok(Err(err)) => {
            if !err.is_remote() {
                error!(category = err.category(), error = %err, "location failed");
            }
            fabric.abort(id, err.to_string());
            Err(err)
        }
        Err(payload) => {
            let reason = panic_message(&*payload);
            error!(%reason, "location panicked");
            fabric.abort(id, reason);
            panic::resume_unwind(payload)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "location panicked".to_string()
    }
}

fn collect_outcomes<R>(outcomes: Vec<thread::Result<Result<R>>>) -> Result<Vec<R>> {
    let mut values = Vec::with_capacity(outcomes.len());
    let mut local_error = None;
    let mut remote_error = None;
    let mut panicked = None;

    for outcome in outcomes {
        match outcome {
            Ok(Ok(value)) => values.push(value),
            Ok(Err(err)) if err.is_remote() => {
                remote_error.get_or_insert(err);
            }
            Ok(Err(err)) => {
                local_error.get_or_insert(err);
            }
            Err(payload) => {
                panicked.get_or_insert(payload);
            }
        }
    }

    if let Some(payload) = panicked {
        panic::resume_unwind(payload);
    }
    match local_error.or(remote_error) {
        Some(err) => Err(err),
        None => Ok(values),
    }
}
