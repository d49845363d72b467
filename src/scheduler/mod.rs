//! Per-destination FIFO scheduling
//!
//! Producers enqueue [`WorkUnit`]s tagged with a [`DestinationId`]. Each destination
//! has its own queue and at most one worker task draining it, so units for one
//! destination run strictly one after another in submission order while different
//! destinations make progress concurrently.
//!
//! Both the queues and the worker registry live behind a single lock. A worker
//! removes its own registration under that lock at the moment it finds its queue
//! empty, so an `enqueue` either lands in a queue that a live worker will still
//! pop, or finds no worker and starts one.

use crate::error::Result;
use crate::types::{DestinationId, Event, RequestContext};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Interval at which [`DestinationScheduler::wait_idle`] re-checks the registry
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

type Action = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// One schedulable action plus its destination and caller context
///
/// The action runs exactly once, on the worker of its destination.
pub struct WorkUnit {
    /// Destination the unit belongs to
    pub destination: DestinationId,
    /// Caller context, handed to the drain notification
    pub context: RequestContext,
    action: Action,
}

impl WorkUnit {
    /// Wrap an async action
    ///
    /// # Examples
    ///
    /// ```
    /// use media_ferry::scheduler::WorkUnit;
    /// use media_ferry::types::{DeliveryTarget, DestinationId, RequestContext};
    ///
    /// let ctx = RequestContext::new("someone", 1, DeliveryTarget::Reply);
    /// let unit = WorkUnit::new(DestinationId(1), ctx, || async {
    ///     println!("running");
    ///     Ok(())
    /// });
    /// assert_eq!(unit.destination, DestinationId(1));
    /// ```
    pub fn new<F, Fut>(destination: DestinationId, context: RequestContext, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            destination,
            context,
            action: Box::new(move || Box::pin(action())),
        }
    }
}

impl std::fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit")
            .field("destination", &self.destination)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// What a worker did before its destination's queue ran dry
#[derive(Clone, Debug)]
pub struct DrainSummary {
    /// Destination that drained
    pub destination: DestinationId,
    /// Context of the last unit the worker ran
    pub context: RequestContext,
    /// Units whose action returned `Ok`
    pub completed: usize,
    /// Units whose action returned an error or panicked
    pub failed: usize,
}

/// Receives a [`DrainSummary`] each time a destination's worker exits
#[async_trait]
pub trait DrainObserver: Send + Sync {
    /// Called once per worker, after its last unit
    async fn drained(&self, summary: DrainSummary);
}

/// Observer that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDrainObserver;

#[async_trait]
impl DrainObserver for LogDrainObserver {
    async fn drained(&self, summary: DrainSummary) {
        info!(
            destination = %summary.destination,
            completed = summary.completed,
            failed = summary.failed,
            "destination drained"
        );
    }
}

#[derive(Default)]
struct SchedulerState {
    queues: HashMap<DestinationId, VecDeque<WorkUnit>>,
    workers: HashMap<DestinationId, JoinHandle<()>>,
    /// Workers that deregistered and are still reporting their drain
    reporting: usize,
}

/// Per-destination FIFO scheduler with one worker per active destination
#[derive(Clone)]
pub struct DestinationScheduler {
    state: Arc<Mutex<SchedulerState>>,
    on_drain: Arc<dyn DrainObserver>,
    events: Option<broadcast::Sender<Event>>,
}

impl DestinationScheduler {
    /// Create a scheduler that reports drained destinations to `on_drain`
    pub fn new(on_drain: Arc<dyn DrainObserver>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState::default())),
            on_drain,
            events: None,
        }
    }

    /// Publish worker lifecycle events on `events`
    pub fn with_events(mut self, events: broadcast::Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    /// Append a unit to its destination's queue, starting a worker if none is running
    pub async fn enqueue(&self, unit: WorkUnit) {
        let destination = unit.destination;
        let mut state = self.state.lock().await;
        let queue = state.queues.entry(destination).or_default();
        queue.push_back(unit);
        let depth = queue.len();

        if state.workers.contains_key(&destination) {
            debug!(destination = %destination, depth, "queued behind active worker");
            return;
        }

        let worker = tokio::spawn(self.clone().run_worker(destination));
        state.workers.insert(destination, worker);
        debug!(destination = %destination, "started destination worker");
    }

    /// Whether a worker is currently registered for `destination`
    pub async fn is_active(&self, destination: DestinationId) -> bool {
        self.state.lock().await.workers.contains_key(&destination)
    }

    /// Units waiting for `destination` (not counting the one running)
    pub async fn pending(&self, destination: DestinationId) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(&destination)
            .map_or(0, VecDeque::len)
    }

    /// Number of destinations with a running worker
    pub async fn active_destinations(&self) -> usize {
        self.state.lock().await.workers.len()
    }

    /// Whether no worker is running or still reporting its drain
    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        state.workers.is_empty() && state.reporting == 0
    }

    /// Wait until every destination has drained and its drain has been reported
    pub async fn wait_idle(&self) {
        loop {
            if self.is_idle().await {
                return;
            }
            let active = self.active_destinations().await;
            debug!(
                active,
                "waiting for destination workers to drain"
            );
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    async fn run_worker(self, destination: DestinationId) {
        self.emit(Event::WorkerStarted { destination });

        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut last_context: Option<RequestContext> = None;

        loop {
            let next = {
                let mut state = self.state.lock().await;
                match state.queues.get_mut(&destination).and_then(VecDeque::pop_front) {
                    Some(unit) => unit,
                    None => {
                        state.queues.remove(&destination);
                        state.workers.remove(&destination);
                        state.reporting += 1;
                        break;
                    }
                }
            };

            let WorkUnit {
                context, action, ..
            } = next;
            last_context = Some(context);

            // A separate task so a panicking action surfaces as a JoinError here.
            match tokio::spawn(async move { action().await }).await {
                Ok(Ok(())) => completed += 1,
                Ok(Err(e)) => {
                    warn!(destination = %destination, error = %e, "work unit failed");
                    failed += 1;
                    self.emit(Event::UnitFailed {
                        destination,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    error!(destination = %destination, error = %e, "work unit panicked");
                    failed += 1;
                    self.emit(Event::UnitFailed {
                        destination,
                        error: format!("work unit panicked: {}", e),
                    });
                }
            }
        }

        info!(destination = %destination, completed, failed, "destination worker finished");
        self.emit(Event::Drained {
            destination,
            completed,
            failed,
        });

        if let Some(context) = last_context {
            let on_drain = self.on_drain.clone();
            let summary = DrainSummary {
                destination,
                context,
                completed,
                failed,
            };
            if let Err(e) = tokio::spawn(async move { on_drain.drained(summary).await }).await {
                error!(destination = %destination, error = %e, "drain observer panicked");
            }
        }

        self.state.lock().await.reporting -= 1;
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            events.send(event).ok();
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
